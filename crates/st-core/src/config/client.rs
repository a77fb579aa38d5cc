//! Measurement client configuration

use serde::{Deserialize, Serialize};

/// A controlled measurement client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProfile {
    /// `host:port` of the client's control port
    pub control_address: String,

    /// Control-port password, if the client requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Relay used as the second hop of every circuit this client builds
    pub partner: PartnerRelay,
}

impl ClientProfile {
    /// Create a profile with no password and an unnamed partner
    pub fn new(control_address: impl Into<String>, partner_fingerprint: impl Into<String>) -> Self {
        Self {
            control_address: control_address.into(),
            password: None,
            partner: PartnerRelay {
                fingerprint: partner_fingerprint.into(),
                nickname: None,
            },
        }
    }
}

/// The support relay a client is paired with for the whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRelay {
    /// Relay fingerprint
    pub fingerprint: String,

    /// Relay nickname, for logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}
