//! Persisted records.
//!
//! These are the rows the store keeps for deployments and for the per-device
//! remote provisioning of multicast setup, Class-C sessions and
//! fragmentation sessions. Nothing here performs I/O.

use std::fmt;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lorawan::{Aes128Key, DevAddr, Eui64};
use crate::state::DeploymentState;

/// Multicast group class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    B,
    C,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupType::B => write!(f, "B"),
            GroupType::C => write!(f, "C"),
        }
    }
}

/// Largest Class-C session timeout exponent McClassCSessionReq can carry.
pub const MAX_MULTICAST_TIMEOUT: u8 = 15;

/// One firmware rollout campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuotaDeployment {
    pub id: Uuid,
    pub name: String,
    /// Set by the MC_CREATE step, cleared again by CLEANUP.
    pub multicast_group_id: Option<Uuid>,
    pub group_type: GroupType,
    pub dr: u8,
    /// Multicast downlink frequency in Hz.
    pub frequency: u32,
    pub ping_slot_period: u32,
    pub fragmentation_matrix: u8,
    pub descriptor: [u8; 4],
    pub payload: Vec<u8>,
    pub frag_size: usize,
    pub redundancy: usize,
    pub block_ack_delay: u8,
    /// Class-C session timeout exponent: the session lasts 2^n seconds.
    pub multicast_timeout: u8,
    pub unicast_timeout: Duration,
    pub state: DeploymentState,
    pub next_step_after: DateTime<Utc>,
}

impl FuotaDeployment {
    /// A new deployment in MC_CREATE, eligible immediately.
    pub fn new(name: impl Into<String>, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            multicast_group_id: None,
            group_type: GroupType::C,
            dr: 0,
            frequency: 869_525_000,
            ping_slot_period: 0,
            fragmentation_matrix: 0,
            descriptor: [0; 4],
            payload,
            frag_size: 50,
            redundancy: 0,
            block_ack_delay: 0,
            multicast_timeout: 0,
            unicast_timeout: Duration::from_secs(60),
            state: DeploymentState::default(),
            next_step_after: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("invalid fuota deployment name");
        }
        if self.payload.is_empty() {
            bail!("fuota deployment payload must not be empty");
        }
        if self.frag_size == 0 {
            bail!("FragSize must not be 0");
        }
        if self.multicast_timeout > MAX_MULTICAST_TIMEOUT {
            bail!(
                "multicast timeout {} exceeds {}",
                self.multicast_timeout,
                MAX_MULTICAST_TIMEOUT
            );
        }
        // Sent as Hz / 100 in 24 bits.
        if self.frequency % 100 != 0 || self.frequency / 100 > 0x00FF_FFFF {
            bail!("invalid multicast frequency: {}", self.frequency);
        }
        Ok(())
    }
}

/// Outcome of a deployment for a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Pending,
    Success,
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Pending => write!(f, "PENDING"),
            DeviceState::Success => write!(f, "SUCCESS"),
            DeviceState::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuotaDeploymentDevice {
    pub fuota_deployment_id: Uuid,
    pub dev_eui: Eui64,
    pub state: DeviceState,
    pub error_message: String,
}

impl FuotaDeploymentDevice {
    pub fn pending(fuota_deployment_id: Uuid, dev_eui: Eui64) -> Self {
        Self {
            fuota_deployment_id,
            dev_eui,
            state: DeviceState::Pending,
            error_message: String::new(),
        }
    }
}

/// Root keys and profile of a device taking part in deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeys {
    pub dev_eui: Eui64,
    #[serde(default)]
    pub app_key: Aes128Key,
    #[serde(default)]
    pub gen_app_key: Aes128Key,
    #[serde(default)]
    pub service_profile_id: Uuid,
}

/// Whether a remote record installs or removes the device-side context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteState {
    #[default]
    Setup,
    Delete,
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteState::Setup => write!(f, "SETUP"),
            RemoteState::Delete => write!(f, "DELETE"),
        }
    }
}

/// Retry bookkeeping shared by every remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioning {
    /// Set once the device acknowledged the request.
    pub state_provisioned: bool,
    pub retry_count: u32,
    pub retry_after: DateTime<Utc>,
    pub retry_interval: Duration,
}

impl Provisioning {
    /// Unprovisioned and immediately eligible.
    pub fn new(retry_interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            state_provisioned: false,
            retry_count: 0,
            retry_after: now,
            retry_interval,
        }
    }

    pub fn is_pending(&self, max_retry: u32, now: DateTime<Utc>) -> bool {
        !self.state_provisioned && self.retry_count < max_retry && self.retry_after <= now
    }

    /// Book one sent request.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.retry_after = now + chrono::Duration::from_std(self.retry_interval)
            .unwrap_or(chrono::Duration::zero());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMulticastSetup {
    pub dev_eui: Eui64,
    pub multicast_group_id: Uuid,
    pub mc_group_id: u8,
    pub mc_addr: DevAddr,
    /// Group McKey wrapped with the device McKEKey.
    pub mc_key_encrypted: Aes128Key,
    pub min_mc_f_cnt: u32,
    pub max_mc_f_cnt: u32,
    pub state: RemoteState,
    pub provisioning: Provisioning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMulticastClassCSession {
    pub dev_eui: Eui64,
    pub multicast_group_id: Uuid,
    pub mc_group_id: u8,
    pub session_time: DateTime<Utc>,
    pub session_time_out: u8,
    pub dl_frequency: u32,
    pub dr: u8,
    pub provisioning: Provisioning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFragmentationSession {
    pub dev_eui: Eui64,
    pub frag_index: u8,
    /// Multicast slots the session listens on; empty for unicast sessions.
    pub mc_group_ids: Vec<u8>,
    pub nb_frag: u16,
    pub frag_size: u8,
    pub fragmentation_matrix: u8,
    pub block_ack_delay: u8,
    pub padding: u8,
    pub descriptor: [u8; 4],
    pub state: RemoteState,
    pub provisioning: Provisioning,
}

/// Multicast group as held by the network server. `mc_key` never leaves the
/// server in clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastGroup {
    pub id: Uuid,
    pub name: String,
    pub mc_addr: DevAddr,
    pub mc_nwk_s_key: Aes128Key,
    pub mc_app_s_key: Aes128Key,
    pub mc_key: Aes128Key,
    pub f_cnt: u32,
    pub group_type: GroupType,
    pub dr: u8,
    pub frequency: u32,
    pub ping_slot_period: u32,
    pub service_profile_id: Uuid,
    pub routing_profile_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_provisioning_pending_gate() {
        let mut p = Provisioning::new(Duration::from_secs(30), now());
        assert!(p.is_pending(2, now()));

        p.record_attempt(now());
        assert_eq!(p.retry_count, 1);
        assert!(!p.is_pending(2, now()));
        assert!(p.is_pending(2, now() + chrono::Duration::seconds(30)));

        p.record_attempt(now());
        assert!(!p.is_pending(2, now() + chrono::Duration::days(1)));
    }

    #[test]
    fn test_provisioned_is_never_pending() {
        let mut p = Provisioning::new(Duration::ZERO, now());
        p.state_provisioned = true;
        assert!(!p.is_pending(10, now()));
    }

    #[test]
    fn test_deployment_validate() {
        let mut d = FuotaDeployment::new("fw-1.2", vec![1, 2, 3], now());
        assert!(d.validate().is_ok());
        d.frag_size = 0;
        assert!(d.validate().is_err());
        let d = FuotaDeployment::new(" ", vec![1], now());
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_deployment_validate_class_c_session() {
        let mut d = FuotaDeployment::new("fw", vec![1], now());
        d.multicast_timeout = 15;
        assert!(d.validate().is_ok());
        d.multicast_timeout = 16;
        assert_eq!(
            d.validate().unwrap_err().to_string(),
            "multicast timeout 16 exceeds 15"
        );

        d.multicast_timeout = 0;
        d.frequency = 869_525_050;
        assert!(d.validate().is_err());
        d.frequency = u32::MAX - 95;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DeviceState::Error.to_string(), "ERROR");
        assert_eq!(RemoteState::Delete.to_string(), "DELETE");
        assert_eq!(GroupType::C.to_string(), "C");
    }
}
