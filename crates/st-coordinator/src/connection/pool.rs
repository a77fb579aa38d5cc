//! Controller pool implementation

use dashmap::DashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use st_core::config::{ConnectFailurePolicy, CoordinatorConfig};
use st_core::error::ConnectionError;
use st_core::traits::CommandSink;
use st_core::ClientId;
use st_protocol::Command;

use super::controller::{self, ControllerHandle};
use crate::dispatcher::ControlEvent;

/// Pool of live control connections
pub struct ControllerPool {
    /// Connections indexed by client ID
    controllers: DashMap<ClientId, Arc<ControllerHandle>>,
}

impl ControllerPool {
    /// Create a new empty pool
    pub fn new() -> Self {
        Self {
            controllers: DashMap::new(),
        }
    }

    /// Bring up every configured client concurrently.
    ///
    /// A client that fails is logged and left out of the pool, unless the
    /// config says to abort, in which case the first failure is returned
    /// and the connections that did come up are closed again.
    pub async fn connect_all(
        config: &CoordinatorConfig,
        events: mpsc::Sender<ControlEvent>,
    ) -> Result<Self, ConnectionError> {
        let attempts = config.clients.iter().map(|(name, profile)| {
            let client = ClientId::new(name.clone());
            let events = events.clone();
            async move {
                let result =
                    controller::connect(client.clone(), profile, config.connect_timeout, events)
                        .await;
                (client, result)
            }
        });

        let pool = Self::new();
        let mut failure = None;

        for (client, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(handle) => pool.insert(client, handle),
                Err(e) => {
                    tracing::error!("Failed to bring up {}: {}", client, e);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            if config.on_connect_failure == ConnectFailurePolicy::Abort {
                pool.close_all().await;
                return Err(e);
            }
            tracing::warn!(
                "Continuing with {} of {} clients",
                pool.len(),
                config.clients.len()
            );
        }

        Ok(pool)
    }

    /// Add a connection
    pub fn insert(&self, client: ClientId, handle: ControllerHandle) {
        self.controllers.insert(client, Arc::new(handle));
    }

    /// Get a connection by client ID
    pub fn get(&self, client: &ClientId) -> Option<Arc<ControllerHandle>> {
        self.controllers.get(client).map(|r| Arc::clone(&r))
    }

    /// Whether a client has a connection
    pub fn contains(&self, client: &ClientId) -> bool {
        self.controllers.contains_key(client)
    }

    /// Connected client IDs
    pub fn ids(&self) -> Vec<ClientId> {
        self.controllers.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of connections
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Check if pool is empty
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Close every connection, tolerating ones that are already gone
    pub async fn close_all(&self) {
        let handles: Vec<_> = self
            .controllers
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        futures::future::join_all(handles.iter().map(|h| h.close())).await;
        self.controllers.clear();
    }
}

impl Default for ControllerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSink for ControllerPool {
    fn send(&self, client: &ClientId, command: Command) -> Result<(), ConnectionError> {
        let handle = self
            .get(client)
            .ok_or_else(|| ConnectionError::UnknownClient(client.clone()))?;
        tracing::info!("{} <- {}", client, command);
        handle.send(command)
    }
}
