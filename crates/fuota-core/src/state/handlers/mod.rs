//! Step handlers - one per deployment state.
//!
//! This module is split into submodules by functionality:
//! - `multicast`: multicast group creation, remote multicast setup and Class-C sessions
//! - `fragmentation`: fragmentation sessions, fragment enqueueing and status requests
//! - `control`: device status reconciliation and cleanup
//!
//! A handler performs the side effects of its step and sets
//! `next_step_after`; the machine advances `state` and persists the row.

mod control;
mod fragmentation;
mod multicast;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::FuotaDeploymentConfig;
use crate::events::FuotaEvent;
use crate::model::FuotaDeployment;
use crate::services::Services;
use crate::state::DeploymentState;
use crate::store::StoreTx;

use control::{step_cleanup, step_set_device_status};
use fragmentation::{step_enqueue, step_fragmentation_sess_setup, step_status_request};
use multicast::{step_multicast_create, step_multicast_sess_c_setup, step_multicast_setup};

/// Resources available to a step.
pub struct StepContext<'a> {
    pub tx: &'a mut dyn StoreTx,
    pub services: &'a Services,
    pub config: &'a FuotaDeploymentConfig,
    /// Time the batch started; every timer of the step is relative to it.
    pub now: DateTime<Utc>,
    events: Vec<FuotaEvent>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        tx: &'a mut dyn StoreTx,
        services: &'a Services,
        config: &'a FuotaDeploymentConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tx,
            services,
            config,
            now,
            events: Vec::new(),
        }
    }

    /// Queue an event for publication after commit.
    pub(crate) fn emit(&mut self, event: FuotaEvent) {
        self.events.push(event);
    }

    pub(crate) fn into_events(self) -> Vec<FuotaEvent> {
        self.events
    }

    /// `now + d`.
    pub(crate) fn after(&self, d: Duration) -> Result<DateTime<Utc>> {
        let d = chrono::Duration::from_std(d).context("duration out of range")?;
        self.now
            .checked_add_signed(d)
            .ok_or_else(|| anyhow!("timestamp out of range"))
    }
}

/// `retries × unicast_timeout`.
pub(crate) fn retry_window(retries: u32, unicast_timeout: Duration) -> Duration {
    unicast_timeout.saturating_mul(retries)
}

pub(crate) fn multicast_group_id(item: &FuotaDeployment) -> Result<Uuid> {
    item.multicast_group_id
        .ok_or_else(|| anyhow!("MulticastGroupID must not be nil"))
}

/// Run the step of the deployment's current state.
pub async fn run_step(ctx: &mut StepContext<'_>, item: &mut FuotaDeployment) -> Result<()> {
    match item.state {
        DeploymentState::McCreate => step_multicast_create(ctx, item).await,
        DeploymentState::McSetup => step_multicast_setup(ctx, item).await,
        DeploymentState::FragSessSetup => step_fragmentation_sess_setup(ctx, item).await,
        DeploymentState::McSessCSetup => step_multicast_sess_c_setup(ctx, item).await,
        DeploymentState::Enqueue => step_enqueue(ctx, item).await,
        DeploymentState::StatusRequest => step_status_request(ctx, item).await,
        DeploymentState::SetDeviceStatus => step_set_device_status(ctx, item).await,
        DeploymentState::Cleanup => step_cleanup(ctx, item).await,
        DeploymentState::Done => Err(anyhow!("unexpected state: {}", item.state)),
    }
}
