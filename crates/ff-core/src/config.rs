use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

pub fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing env: {name}"))
}

pub fn socket_addr_from_env(name: &str, default: &str) -> Result<SocketAddr> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    SocketAddr::from_str(&value).map_err(|err| anyhow!("invalid socket addr for {name}: {err}"))
}

/// Typed configuration for the whole capture pipeline. Defaults are the
/// reference deployment values; `FIELDFLOW_*` environment variables override
/// individual knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub gps: GpsConfig,
    pub sync: SyncConfig,
    pub staging: StagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsConfig {
    /// Accuracy a fix must reach to be accepted without review, in meters.
    pub required_accuracy_m: f64,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    /// Pause between attempts so the receiver can settle.
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub auto_sync: bool,
    /// Records per drain chunk. Backend commits are capped at 500 operations,
    /// so values above that are rejected by `validate`.
    pub chunk_size: usize,
    /// Concurrent uploads within one chunk.
    pub concurrent_uploads: usize,
    /// Status reporter poll interval.
    pub status_poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    pub bulk_max_items: usize,
    /// Photo slots a submission must cover to pass the completeness check.
    pub required_photo_slots: Vec<String>,
    /// GPS accuracy beyond this is flagged for review, in meters.
    pub max_gps_accuracy_m: f64,
    /// Whether resubmitting an already-known pole number upserts (advisory
    /// duplicate) or is rejected with a 409.
    pub allow_pole_update: bool,
    pub allow_sow_update: bool,
    pub promotion_max_attempts: u32,
    pub promotion_poll_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/fieldflow.db".to_string(),
                max_connections: 5,
            },
            gps: GpsConfig {
                required_accuracy_m: 5.0,
                max_attempts: 5,
                timeout_secs: 10,
                settle_delay_ms: 1000,
            },
            sync: SyncConfig {
                auto_sync: true,
                chunk_size: 100,
                concurrent_uploads: 4,
                status_poll_secs: 10,
            },
            staging: StagingConfig {
                bulk_max_items: 100,
                required_photo_slots: default_photo_slots(),
                max_gps_accuracy_m: 15.0,
                allow_pole_update: true,
                allow_sow_update: true,
                promotion_max_attempts: 3,
                promotion_poll_secs: 30,
            },
        }
    }
}

fn default_photo_slots() -> Vec<String> {
    ["before", "front", "side", "depth", "concrete", "compaction"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("FIELDFLOW_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v;
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_DB_MAX_CONNECTIONS") {
            if let Some(value) = parse_u32(&v) {
                cfg.database.max_connections = value;
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_GPS_REQUIRED_ACCURACY_M") {
            if let Some(value) = parse_f64(&v) {
                cfg.gps.required_accuracy_m = value;
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_GPS_MAX_ATTEMPTS") {
            if let Some(value) = parse_u32(&v) {
                cfg.gps.max_attempts = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_GPS_TIMEOUT_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.gps.timeout_secs = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_SYNC_AUTO") {
            cfg.sync.auto_sync = parse_bool(&v, cfg.sync.auto_sync);
        }
        if let Ok(v) = env::var("FIELDFLOW_SYNC_CHUNK_SIZE") {
            if let Some(value) = parse_usize(&v) {
                cfg.sync.chunk_size = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_SYNC_CONCURRENT_UPLOADS") {
            if let Some(value) = parse_usize(&v) {
                cfg.sync.concurrent_uploads = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_STATUS_POLL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.status_poll_secs = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_BULK_MAX_ITEMS") {
            if let Some(value) = parse_usize(&v) {
                cfg.staging.bulk_max_items = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_REQUIRED_PHOTO_SLOTS") {
            let slots: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !slots.is_empty() {
                cfg.staging.required_photo_slots = slots;
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_MAX_GPS_ACCURACY_M") {
            if let Some(value) = parse_f64(&v) {
                cfg.staging.max_gps_accuracy_m = value;
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_ALLOW_POLE_UPDATE") {
            cfg.staging.allow_pole_update = parse_bool(&v, cfg.staging.allow_pole_update);
        }
        if let Ok(v) = env::var("FIELDFLOW_ALLOW_SOW_UPDATE") {
            cfg.staging.allow_sow_update = parse_bool(&v, cfg.staging.allow_sow_update);
        }
        if let Ok(v) = env::var("FIELDFLOW_PROMOTION_MAX_ATTEMPTS") {
            if let Some(value) = parse_u32(&v) {
                cfg.staging.promotion_max_attempts = value.max(1);
            }
        }
        if let Ok(v) = env::var("FIELDFLOW_PROMOTION_POLL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.staging.promotion_poll_secs = value.max(1);
            }
        }

        cfg
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.gps.required_accuracy_m <= 0.0 {
            return Err("GPS required_accuracy_m must be positive".to_string());
        }
        if self.gps.max_attempts == 0 {
            return Err("GPS max_attempts must be greater than 0".to_string());
        }
        if self.sync.chunk_size == 0 || self.sync.chunk_size > 500 {
            return Err("Sync chunk_size must be between 1 and 500".to_string());
        }
        if self.sync.concurrent_uploads == 0 {
            return Err("Sync concurrent_uploads must be greater than 0".to_string());
        }
        if self.staging.bulk_max_items == 0 {
            return Err("Staging bulk_max_items must be greater than 0".to_string());
        }
        if self.staging.required_photo_slots.is_empty() {
            return Err("Staging required_photo_slots must not be empty".to_string());
        }
        Ok(())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}

fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        key: &'static str,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            env::remove_var(self.key);
        }
    }

    fn set_env(key: &'static str, value: &str) -> EnvGuard {
        env::set_var(key, value);
        EnvGuard { key }
    }

    #[test]
    fn required_env_reads_value() {
        let _guard = set_env("FF_TEST_REQUIRED_ENV_PRESENT", "value");
        let value = required_env("FF_TEST_REQUIRED_ENV_PRESENT").unwrap();
        assert_eq!(value, "value");
    }

    #[test]
    fn required_env_missing_returns_error() {
        env::remove_var("FF_TEST_REQUIRED_ENV_MISSING");
        assert!(required_env("FF_TEST_REQUIRED_ENV_MISSING").is_err());
    }

    #[test]
    fn socket_addr_from_env_uses_default() {
        env::remove_var("FF_TEST_SOCKET_DEFAULT");
        let addr = socket_addr_from_env("FF_TEST_SOCKET_DEFAULT", "127.0.0.1:1234").unwrap();
        assert_eq!(addr, "127.0.0.1:1234".parse().unwrap());
    }

    #[test]
    fn default_config_validates() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.staging.required_photo_slots.len(), 6);
    }

    #[test]
    fn chunk_size_capped_at_backend_limit() {
        let mut cfg = PipelineConfig::default();
        cfg.sync.chunk_size = 501;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn photo_slots_override_from_env() {
        let _guard = set_env("FIELDFLOW_REQUIRED_PHOTO_SLOTS", "front, side");
        let cfg = PipelineConfig::from_env();
        assert_eq!(cfg.staging.required_photo_slots, vec!["front", "side"]);
    }
}
