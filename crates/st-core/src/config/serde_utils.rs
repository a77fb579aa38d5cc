//! Serde helpers for coordinator timing knobs

/// Durations written as whole seconds.
///
/// Operators may write a bare integer (`burst_duration = 20`) or a string
/// with a unit suffix (`hard_expiry = "2m"`). Values are always written
/// back as integers.
pub mod duration_secs {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SecondsVisitor)
    }

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number of seconds or a string such as \"30s\", \"5m\" or \"1h\"")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("negative duration: {}", secs)))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse(value).ok_or_else(|| E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    fn parse(value: &str) -> Option<Duration> {
        let value = value.trim();
        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (digits, unit) = value.split_at(split);
        let n: u64 = digits.parse().ok()?;
        let scale = match unit.trim() {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => return None,
        };
        n.checked_mul(scale).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timing {
        #[serde(with = "duration_secs")]
        soft_timeout: Duration,
    }

    #[test]
    fn test_written_as_integer_seconds() {
        let timing = Timing {
            soft_timeout: Duration::from_secs(25),
        };
        let toml = toml::to_string(&timing).unwrap();
        assert_eq!(toml.trim(), "soft_timeout = 25");
    }

    #[test]
    fn test_bare_integer() {
        let timing: Timing = toml::from_str("soft_timeout = 30").unwrap();
        assert_eq!(timing.soft_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_unit_suffixes() {
        for (text, secs) in [("\"45\"", 45), ("\"45s\"", 45), ("\"2m\"", 120), ("\"1h\"", 3600)] {
            let timing: Timing = toml::from_str(&format!("soft_timeout = {}", text)).unwrap();
            assert_eq!(timing.soft_timeout, Duration::from_secs(secs), "{}", text);
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(toml::from_str::<Timing>("soft_timeout = -5").is_err());
        assert!(toml::from_str::<Timing>("soft_timeout = \"5 days\"").is_err());
        assert!(toml::from_str::<Timing>("soft_timeout = \"m\"").is_err());
    }
}
