//! Typed session configuration, loaded from the environment.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::FixError;

/// Everything the session owner needs to connect, authenticate, and run
/// timers. Construct via [`SessionConfig::from_env`] or build one directly
/// for tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub username: String,
    pub password: String,
    pub heartbeat_interval_secs: u64,
    pub reset_on_logon: bool,
    pub connect_timeout_ms: u64,
    pub party_id: String,
    pub on_behalf_of_comp_id: Option<String>,
    pub raw_data: Option<String>,
    pub raw_data_length: Option<String>,
    pub max_test_request_retries: u32,
    pub reconnect_delay_secs: u64,
    pub reconnect_delay_max_secs: u64,
    pub write_timeout_secs: u64,
    pub security_list_initial_outgoing: u64,
}

fn required(key: &str) -> Result<String, FixError> {
    env::var(key).map_err(|_| FixError::MissingConfig(key.to_string()))
}

fn optional_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl SessionConfig {
    /// Loads `.env` (if present, via `dotenvy`) once, then reads typed
    /// values from the process environment, applying defaults for every
    /// optional field.
    pub fn from_env() -> Result<Self, FixError> {
        dotenvy::dotenv().ok();

        let sender_comp_id = required("PSX_FIX_SENDER_COMP_ID")?;
        let party_id = env::var("PSX_FIX_PARTY_ID").unwrap_or_else(|_| sender_comp_id.clone());

        Ok(Self {
            host: required("PSX_FIX_HOST")?,
            port: required("PSX_FIX_PORT")?
                .parse()
                .map_err(|_| FixError::MissingConfig("PSX_FIX_PORT".into()))?,
            target_comp_id: required("PSX_FIX_TARGET_COMP_ID")?,
            username: required("PSX_FIX_USERNAME")?,
            password: required("PSX_FIX_PASSWORD")?,
            heartbeat_interval_secs: optional_parsed("PSX_FIX_HEARTBEAT_SECS", 30),
            reset_on_logon: optional_parsed("PSX_FIX_RESET_ON_LOGON", true),
            connect_timeout_ms: optional_parsed("PSX_FIX_CONNECT_TIMEOUT_MS", 5000),
            party_id,
            on_behalf_of_comp_id: env::var("PSX_FIX_ON_BEHALF_OF").ok(),
            raw_data: env::var("PSX_FIX_RAW_DATA").ok(),
            raw_data_length: env::var("PSX_FIX_RAW_DATA_LENGTH").ok(),
            max_test_request_retries: optional_parsed("PSX_FIX_MAX_TEST_REQUEST_RETRIES", 3),
            reconnect_delay_secs: optional_parsed("PSX_FIX_RECONNECT_DELAY_SECS", 5),
            reconnect_delay_max_secs: optional_parsed("PSX_FIX_RECONNECT_DELAY_MAX_SECS", 30),
            write_timeout_secs: optional_parsed("PSX_FIX_WRITE_TIMEOUT_SECS", 5),
            security_list_initial_outgoing: optional_parsed("PSX_FIX_SECLIST_INITIAL_SEQ", 2),
            sender_comp_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_psx_env() {
        for (key, _) in env::vars() {
            if key.starts_with("PSX_FIX_") {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn missing_required_field_is_reported_by_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_psx_env();
        let err = SessionConfig::from_env().unwrap_err();
        match err {
            FixError::MissingConfig(key) => assert_eq!(key, "PSX_FIX_HOST"),
            other => panic!("expected MissingConfig, got {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_psx_env();
        env::set_var("PSX_FIX_HOST", "127.0.0.1");
        env::set_var("PSX_FIX_PORT", "9000");
        env::set_var("PSX_FIX_SENDER_COMP_ID", "realtime");
        env::set_var("PSX_FIX_TARGET_COMP_ID", "NMDUFISQ0001");
        env::set_var("PSX_FIX_USERNAME", "realtime");
        env::set_var("PSX_FIX_PASSWORD", "secret");

        let config = SessionConfig::from_env().unwrap();
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert!(config.reset_on_logon);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.party_id, "realtime");
        assert_eq!(config.max_test_request_retries, 3);
        assert_eq!(config.security_list_initial_outgoing, 2);
        clear_psx_env();
    }

    #[test]
    fn party_id_defaults_to_sender_comp_id_but_is_overridable() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_psx_env();
        env::set_var("PSX_FIX_HOST", "127.0.0.1");
        env::set_var("PSX_FIX_PORT", "9000");
        env::set_var("PSX_FIX_SENDER_COMP_ID", "realtime");
        env::set_var("PSX_FIX_TARGET_COMP_ID", "NMDUFISQ0001");
        env::set_var("PSX_FIX_USERNAME", "realtime");
        env::set_var("PSX_FIX_PASSWORD", "secret");
        env::set_var("PSX_FIX_PARTY_ID", "custom-party");

        let config = SessionConfig::from_env().unwrap();
        assert_eq!(config.party_id, "custom-party");
        clear_psx_env();
    }
}
