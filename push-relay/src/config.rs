//! Process configuration loaded from the environment.
//!
//! Every setting has a default; a value that is present but cannot be parsed is
//! a configuration error rather than being silently ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::error::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite:push-relay.db?mode=rwc";
const DEFAULT_ESCALATION_INTERVAL_SECS: u64 = 60;
const DEFAULT_ESCALATION_GRACE_SECS: u64 = 5 * 60;
const DEFAULT_BROADCAST_CONCURRENCY: usize = 4;

/// Violation types that are escalated to a tow when left in `reported`.
pub const DEFAULT_TOW_VIOLATION_TYPES: &[&str] =
    &["fire_lane", "blocking_access", "unauthorized_parking"];

/// Settings consulted by the dispatchers.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Move a record `pending -> processing` before sending so a redelivered
    /// creation event cannot send it twice.
    pub claim_records: bool,
    /// Chunks of a broadcast in flight at once.
    pub broadcast_concurrency: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            claim_records: true,
            broadcast_concurrency: DEFAULT_BROADCAST_CONCURRENCY,
        }
    }
}

/// Escalation sweep timing and filters.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    pub interval: Duration,
    pub grace: Duration,
    pub tow_violation_types: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_ESCALATION_INTERVAL_SECS),
            grace: Duration::from_secs(DEFAULT_ESCALATION_GRACE_SECS),
            tow_violation_types: DEFAULT_TOW_VIOLATION_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

/// Push provider settings.
#[derive(Debug, Clone, Default)]
pub struct FcmSettings {
    /// Service-account JSON key.
    pub credentials_file: Option<PathBuf>,
    /// Fixed bearer token, used instead of a key file (emulators).
    pub access_token: Option<String>,
    /// Overrides the key's `project_id`.
    pub project_id: Option<String>,
    pub endpoint: Option<String>,
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub fcm: FcmSettings,
    pub api: ApiServerConfig,
    pub log_dir: Option<PathBuf>,
    pub notify: NotifyConfig,
    pub escalation: EscalationConfig,
}

impl AppConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let fcm = FcmSettings {
            credentials_file: var("FCM_CREDENTIALS_FILE")
                .or_else(|| var("GOOGLE_APPLICATION_CREDENTIALS"))
                .map(PathBuf::from),
            access_token: var("FCM_ACCESS_TOKEN"),
            project_id: var("FCM_PROJECT_ID"),
            endpoint: var("FCM_ENDPOINT"),
        };

        let mut api = ApiServerConfig::default();
        if let Some(bind_address) = var("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        if let Some(port) = parse_var::<u16>(&var, "API_PORT")? {
            api.port = port;
        }

        let mut notify = NotifyConfig::default();
        if let Some(claim) = parse_var::<bool>(&var, "CLAIM_NOTIFICATION_RECORDS")? {
            notify.claim_records = claim;
        }
        if let Some(concurrency) = parse_var::<usize>(&var, "BROADCAST_CONCURRENCY")? {
            if concurrency == 0 {
                return Err(Error::config("BROADCAST_CONCURRENCY must be at least 1"));
            }
            notify.broadcast_concurrency = concurrency;
        }

        let mut escalation = EscalationConfig::default();
        if let Some(secs) = parse_var::<u64>(&var, "ESCALATION_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(Error::config("ESCALATION_INTERVAL_SECS must be at least 1"));
            }
            escalation.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "ESCALATION_GRACE_SECS")? {
            escalation.grace = Duration::from_secs(secs);
        }
        if let Some(types) = var("TOW_VIOLATION_TYPES") {
            escalation.tow_violation_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(Self {
            database_url,
            fcm,
            api,
            log_dir: var("LOG_DIR").map(PathBuf::from),
            notify,
            escalation,
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid {} '{}': {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.notify.claim_records);
        assert_eq!(config.escalation.interval, Duration::from_secs(60));
        assert_eq!(config.escalation.grace, Duration::from_secs(300));
        assert!(config.log_dir.is_none());
        assert!(config.fcm.credentials_file.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("GOOGLE_APPLICATION_CREDENTIALS", "/etc/key.json"),
            ("API_PORT", "9000"),
            ("CLAIM_NOTIFICATION_RECORDS", "false"),
            ("TOW_VIOLATION_TYPES", "fire_lane, ,double_parked"),
            ("ESCALATION_GRACE_SECS", "120"),
        ])
        .unwrap();
        assert_eq!(
            config.fcm.credentials_file,
            Some(PathBuf::from("/etc/key.json"))
        );
        assert_eq!(config.api.port, 9000);
        assert!(!config.notify.claim_records);
        assert_eq!(
            config.escalation.tow_violation_types,
            vec!["fire_lane".to_string(), "double_parked".to_string()]
        );
        assert_eq!(config.escalation.grace, Duration::from_secs(120));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            load(&[("API_PORT", "http")]),
            Err(Error::Configuration(_))
        ));
        assert!(load(&[("BROADCAST_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("ESCALATION_INTERVAL_SECS", "-1")]).is_err());
    }
}
