//! FUOTA deployment state machine.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};

use super::handlers::{StepContext, run_step};
use crate::config::FuotaDeploymentConfig;
use crate::events::FuotaEvent;
use crate::services::Services;
use crate::store::{StoreTx, finish};

/// Step a deployment is waiting to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DeploymentState {
    /// Create the multicast group.
    #[default]
    McCreate,
    /// Create a remote multicast setup per device.
    McSetup,
    /// Create a fragmentation session per device in the group.
    FragSessSetup,
    /// Create a Class-C session per device with a fragmentation session.
    McSessCSetup,
    /// Enqueue the fragments to the multicast group.
    Enqueue,
    /// Ask every participant for its fragmentation status.
    StatusRequest,
    /// Settle the outcome of every device still pending.
    SetDeviceStatus,
    /// Delete the multicast group.
    Cleanup,
    /// Terminal.
    Done,
}

impl DeploymentState {
    /// Every state in execution order.
    pub const ORDER: [DeploymentState; 9] = [
        DeploymentState::McCreate,
        DeploymentState::McSetup,
        DeploymentState::FragSessSetup,
        DeploymentState::McSessCSetup,
        DeploymentState::Enqueue,
        DeploymentState::StatusRequest,
        DeploymentState::SetDeviceStatus,
        DeploymentState::Cleanup,
        DeploymentState::Done,
    ];

    /// The state a successful step moves to. `Done` stays `Done`.
    pub fn next(self) -> DeploymentState {
        match self {
            DeploymentState::McCreate => DeploymentState::McSetup,
            DeploymentState::McSetup => DeploymentState::FragSessSetup,
            DeploymentState::FragSessSetup => DeploymentState::McSessCSetup,
            DeploymentState::McSessCSetup => DeploymentState::Enqueue,
            DeploymentState::Enqueue => DeploymentState::StatusRequest,
            DeploymentState::StatusRequest => DeploymentState::SetDeviceStatus,
            DeploymentState::SetDeviceStatus => DeploymentState::Cleanup,
            DeploymentState::Cleanup | DeploymentState::Done => DeploymentState::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, DeploymentState::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::McCreate => "MC_CREATE",
            DeploymentState::McSetup => "MC_SETUP",
            DeploymentState::FragSessSetup => "FRAG_SESS_SETUP",
            DeploymentState::McSessCSetup => "MC_SESS_C_SETUP",
            DeploymentState::Enqueue => "ENQUEUE",
            DeploymentState::StatusRequest => "STATUS_REQUEST",
            DeploymentState::SetDeviceStatus => "SET_DEVICE_STATUS",
            DeploymentState::Cleanup => "CLEANUP",
            DeploymentState::Done => "DONE",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unexpected state: {0}")]
pub struct UnknownState(String);

impl FromStr for DeploymentState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentState::ORDER
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Run one step for every deployment that is due, inside `tx`. Returns the
/// events to publish once the transaction commits.
pub async fn step_pending_deployments(
    tx: &mut dyn StoreTx,
    services: &Services,
    config: &FuotaDeploymentConfig,
) -> Result<Vec<FuotaEvent>> {
    let now = services.clock.now();
    let items = tx
        .get_pending_fuota_deployments(config.batch_size, now)
        .await
        .context("get pending fuota deployments error")?;

    let mut events = Vec::new();
    for mut item in items {
        let from = item.state;
        let mut ctx = StepContext::new(&mut *tx, services, config, now);

        run_step(&mut ctx, &mut item)
            .await
            .with_context(|| format!("fuota deployment {} step {} error", item.id, from))?;
        item.state = from.next();

        ctx.tx
            .update_fuota_deployment(&item)
            .await
            .context("update fuota deployment error")?;

        tracing::debug!(
            deployment_id = %item.id,
            from = %from,
            to = %item.state,
            next_step_after = %item.next_step_after,
            "Step complete"
        );

        events.extend(ctx.into_events());
        events.push(FuotaEvent::StateChanged {
            deployment_id: item.id,
            from,
            to: item.state,
        });
    }

    Ok(events)
}

/// One pass of the deployment loop in its own transaction. Returns the
/// number of deployments that moved on.
pub async fn process_batch(services: &Services, config: &FuotaDeploymentConfig) -> Result<usize> {
    let mut tx = services
        .store
        .begin()
        .await
        .context("begin transaction error")?;
    let result = step_pending_deployments(tx.as_mut(), services, config).await;
    let events = finish(tx, result).await?;

    let mut stepped = 0;
    for event in &events {
        if matches!(event, FuotaEvent::StateChanged { .. }) {
            stepped += 1;
        }
        services.observer.on_event(event);
    }
    Ok(stepped)
}
