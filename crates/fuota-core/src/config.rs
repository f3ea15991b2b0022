//! Runtime configuration.
//!
//! Built once at startup and handed to the scheduler, the loops and the
//! uplink handlers. Every section falls back to its defaults when missing
//! from the TOML file.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::applayer::fragmentation::MAX_FRAG_INDEX;
use crate::applayer::multicastsetup::MAX_MC_GROUP_ID;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub fuota_deployment: FuotaDeploymentConfig,
    pub remote_multicast_setup: SyncConfig,
    pub fragmentation_session: SyncConfig,
}

/// FUOTA deployment loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuotaDeploymentConfig {
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Deployments processed per transaction.
    pub batch_size: usize,
    /// Device-side multicast slot used by deployments.
    pub mc_group_id: u8,
    /// Device-side fragmentation session index.
    pub frag_index: u8,
    pub remote_multicast_setup_retries: u32,
    pub remote_fragmentation_session_retries: u32,
    /// Routing profile the multicast groups are created under.
    pub application_server_id: Uuid,
}

impl Default for FuotaDeploymentConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            batch_size: 1,
            mc_group_id: 0,
            frag_index: 0,
            remote_multicast_setup_retries: 3,
            remote_fragmentation_session_retries: 3,
            application_server_id: Uuid::from_u128(0x6d5db27e_4ce2_4b2b_b5d7_91f069397978),
        }
    }
}

impl FuotaDeploymentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Remote session sync loop (shared by the multicast setup, Class-C session
/// and fragmentation session loops).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub sync_interval_ms: u64,
    /// Downlinks sent per row before giving up.
    pub sync_retries: u32,
    pub sync_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 1000,
            sync_retries: 3,
            sync_batch_size: 100,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("parse config error")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("serialize config error")?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fd = &self.fuota_deployment;
        if fd.batch_size == 0 {
            bail!("fuota_deployment.batch_size must be greater than zero");
        }
        if fd.mc_group_id > MAX_MC_GROUP_ID {
            bail!(
                "fuota_deployment.mc_group_id must be <= {MAX_MC_GROUP_ID}, got {}",
                fd.mc_group_id
            );
        }
        if fd.frag_index > MAX_FRAG_INDEX {
            bail!(
                "fuota_deployment.frag_index must be <= {MAX_FRAG_INDEX}, got {}",
                fd.frag_index
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.fuota_deployment.batch_size, 1);
        assert_eq!(c.remote_multicast_setup.sync_batch_size, 100);
        assert_eq!(c.fragmentation_session.interval(), Duration::from_secs(1));
        assert_eq!(
            c.fuota_deployment.application_server_id.to_string(),
            "6d5db27e-4ce2-4b2b-b5d7-91f069397978"
        );
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let c: Config = toml::from_str(
            r#"
            [fuota_deployment]
            batch_size = 5

            [fragmentation_session]
            sync_retries = 7
            "#,
        )
        .unwrap();
        assert_eq!(c.fuota_deployment.batch_size, 5);
        assert_eq!(c.fuota_deployment.interval_ms, 1000);
        assert_eq!(c.fragmentation_session.sync_retries, 7);
        assert_eq!(c.remote_multicast_setup, SyncConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_slots() {
        let mut c = Config::default();
        c.fuota_deployment.mc_group_id = 4;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.fuota_deployment.frag_index = 9;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.fuota_deployment.batch_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("fuota-config-{}.toml", Uuid::new_v4()));
        let mut c = Config::default();
        c.remote_multicast_setup.sync_interval_ms = 250;
        c.save_to_file(&path).unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, c);
    }
}
