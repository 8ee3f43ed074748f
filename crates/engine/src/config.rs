use std::time::Duration;

use serde::Deserialize;

use assetline_core::ActorId;

use crate::error::EngineError;

/// Engine settings. Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on one persistence call before it counts as failed.
    pub commit_timeout_ms: u64,
    /// Total attempts for an audit append after a confirmed counter change.
    pub audit_retry_attempts: u32,
    pub audit_retry_backoff_ms: u64,
    /// Recorded as `performed_by` on audit records.
    pub performed_by: ActorId,
    /// Raise a warning when a reconciled part is at or below its minimum.
    pub low_stock_warnings: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_timeout_ms: 10_000,
            audit_retry_attempts: 3,
            audit_retry_backoff_ms: 200,
            performed_by: ActorId::from("system"),
            low_stock_warnings: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(source).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.commit_timeout_ms == 0 {
            return Err(EngineError::Config("commit_timeout_ms must be positive".into()));
        }
        if self.audit_retry_attempts == 0 {
            return Err(EngineError::Config("audit_retry_attempts must be at least 1".into()));
        }
        if self.performed_by.as_str().is_empty() {
            return Err(EngineError::Config("performed_by must not be empty".into()));
        }
        Ok(())
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn audit_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.audit_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config = EngineConfig::from_toml_str("")?;
        assert_eq!(config.commit_timeout(), Duration::from_secs(10));
        assert_eq!(config.audit_retry_attempts, 3);
        assert_eq!(config.performed_by.as_str(), "system");
        Ok(())
    }

    #[test]
    fn overrides_are_applied() -> Result<(), Box<dyn std::error::Error>> {
        let config = EngineConfig::from_toml_str(
            r#"
            commit_timeout_ms = 2500
            performed_by = "tech-7"
            low_stock_warnings = false
            "#,
        )?;
        assert_eq!(config.commit_timeout(), Duration::from_millis(2500));
        assert_eq!(config.performed_by.as_str(), "tech-7");
        assert!(!config.low_stock_warnings);
        Ok(())
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = EngineConfig::from_toml_str("commit_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("commit_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
