use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabshelf_core::UserId;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Connection and caching settings for a shelf client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub user: UserId,
    /// How long a fetched list is served from the mirror before it is re-fetched.
    #[serde(default = "default_cache_ttl", with = "ttl_seconds")]
    pub cache_ttl: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, user: UserId) -> Self {
        Self { base_url: base_url.into(), user, cache_ttl: DEFAULT_CACHE_TTL }
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

mod ttl_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test IDs: TCFG-001
    #[test]
    fn cache_ttl_defaults_to_five_minutes() -> Result<(), serde_json::Error> {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url":"http://127.0.0.1:4020","user":"ada@example.com"}"#,
        )?;
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.user.as_str(), "ada@example.com");

        let tuned: ClientConfig = serde_json::from_str(
            r#"{"base_url":"http://127.0.0.1:4020","user":"ada@example.com","cache_ttl":30}"#,
        )?;
        assert_eq!(tuned.cache_ttl, Duration::from_secs(30));
        Ok(())
    }

    // Test IDs: TCFG-002
    #[test]
    fn blank_user_is_rejected_when_loading_config() {
        let parsed = serde_json::from_str::<ClientConfig>(r#"{"base_url":"http://x","user":" "}"#);
        assert!(parsed.is_err());
    }
}
