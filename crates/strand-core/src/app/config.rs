//! RuntimeConfig - 起動時の設定
//!
//! ```json
//! {
//!   "strict-binding": false,
//!   "outgoing": {
//!     "prices": { "topic": "prices-v1", "retries": 3 }
//!   }
//! }
//! ```
//!
//! `outgoing` のキーがチャネル名になります。

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::channel::ChannelName;
use crate::outbound::config::{ConfigError, OutgoingChannelConfig};
use crate::weave::weaver::WeavingMode;

/// Environment variable forcing strict (`true`) or lenient (`false`) binding.
pub const STRICT_BINDING_ENV: &str = "STRAND_STRICT_BINDING";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Abort startup when some mediators cannot be connected.
    pub strict_binding: bool,
    pub outgoing: BTreeMap<ChannelName, OutgoingChannelConfig>,
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: RuntimeConfig = serde_json::from_str(json)?;
        for (name, channel) in &mut config.outgoing {
            channel.channel = name.clone();
        }
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;
        Self::from_json_str(&json)
    }

    /// Adds (or replaces) an outbound channel.
    pub fn with_outgoing(mut self, channel: OutgoingChannelConfig) -> Self {
        self.outgoing.insert(channel.channel.clone(), channel);
        self
    }

    /// Applies [`STRICT_BINDING_ENV`] when set.
    pub fn with_env_overrides(self) -> Self {
        let value = std::env::var(STRICT_BINDING_ENV).ok();
        self.with_strict_override(value.as_deref())
    }

    fn with_strict_override(mut self, value: Option<&str>) -> Self {
        let Some(value) = value else {
            return self;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => self.strict_binding = true,
            "false" | "0" | "no" => self.strict_binding = false,
            other => warn!(variable = STRICT_BINDING_ENV, value = other, "ignoring unrecognized value"),
        }
        self
    }

    pub fn weaving_mode(&self) -> WeavingMode {
        if self.strict_binding {
            WeavingMode::Strict
        } else {
            WeavingMode::Lenient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn channel_names_come_from_map_keys() {
        let config = RuntimeConfig::from_json_str(
            r#"{"strict-binding": true, "outgoing": {"prices": {"retries": 3}, "orders": {}}}"#,
        )
        .unwrap();

        assert_eq!(config.weaving_mode(), WeavingMode::Strict);
        assert_eq!(config.outgoing.len(), 2);
        let prices = &config.outgoing[&ChannelName::from("prices")];
        assert_eq!(prices.channel.as_str(), "prices");
        assert_eq!(prices.retries, 3);
        assert_eq!(config.outgoing[&ChannelName::from("orders")].topic_or_channel(), "orders");
    }

    #[test]
    fn empty_document_is_lenient_without_channels() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config.weaving_mode(), WeavingMode::Lenient);
        assert!(config.outgoing.is_empty());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = RuntimeConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Missing { path } if path.ends_with("here.json")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"outgoing": []}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[rstest]
    #[case::unset(None, false)]
    #[case::truthy(Some("TRUE"), true)]
    #[case::numeric(Some("1"), true)]
    #[case::falsy(Some("no"), false)]
    #[case::garbage(Some("maybe"), false)]
    fn strict_override(#[case] value: Option<&str>, #[case] strict: bool) {
        let config = RuntimeConfig::default().with_strict_override(value);
        assert_eq!(config.strict_binding, strict);
    }

    #[test]
    fn override_can_relax_a_strict_file() {
        let config = RuntimeConfig {
            strict_binding: true,
            ..RuntimeConfig::default()
        };
        assert!(!config.with_strict_override(Some("false")).strict_binding);
    }
}
