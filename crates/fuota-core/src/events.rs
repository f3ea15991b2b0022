//! Event system for progress reporting.
//!
//! The deployment loop and the sync loops publish what they do through a
//! [`FuotaObserver`], so a CLI or a test can follow progress without reading
//! the store.

use uuid::Uuid;

use crate::lorawan::Eui64;
use crate::model::DeviceState;
use crate::state::DeploymentState;

/// Which remote provisioning record a downlink belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    MulticastSetup,
    MulticastClassCSession,
    FragmentationSession,
}

impl std::fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteKind::MulticastSetup => write!(f, "remote multicast setup"),
            RemoteKind::MulticastClassCSession => write!(f, "remote multicast class-c session"),
            RemoteKind::FragmentationSession => write!(f, "remote fragmentation session"),
        }
    }
}

/// Events emitted by the loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuotaEvent {
    /// A deployment step committed.
    StateChanged {
        deployment_id: Uuid,
        from: DeploymentState,
        to: DeploymentState,
    },
    /// A remote provisioning request was enqueued.
    RemoteRequestSent {
        kind: RemoteKind,
        dev_eui: Eui64,
        command: &'static str,
        retry_count: u32,
    },
    /// Fragments were enqueued to the multicast group.
    FragmentsEnqueued {
        deployment_id: Uuid,
        multicast_group_id: Uuid,
        count: usize,
    },
    /// Final state of a device, as reported by the device or by reconciliation.
    DeviceStatus {
        deployment_id: Uuid,
        dev_eui: Eui64,
        state: DeviceState,
        error_message: String,
    },
}

/// Observer trait for receiving FUOTA events.
pub trait FuotaObserver: Send + Sync {
    fn on_event(&self, event: &FuotaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FuotaObserver for NullObserver {
    fn on_event(&self, _event: &FuotaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FuotaObserver for TracingObserver {
    fn on_event(&self, event: &FuotaEvent) {
        match event {
            FuotaEvent::StateChanged {
                deployment_id,
                from,
                to,
            } => {
                tracing::info!(deployment_id = %deployment_id, from = %from, to = %to, "State transition");
            }
            FuotaEvent::RemoteRequestSent {
                kind,
                dev_eui,
                command,
                retry_count,
            } => {
                tracing::debug!(kind = %kind, dev_eui = %dev_eui, command, retry_count, "Remote request sent");
            }
            FuotaEvent::FragmentsEnqueued {
                deployment_id,
                multicast_group_id,
                count,
            } => {
                tracing::info!(
                    deployment_id = %deployment_id,
                    multicast_group_id = %multicast_group_id,
                    count,
                    "Fragments enqueued"
                );
            }
            FuotaEvent::DeviceStatus {
                deployment_id,
                dev_eui,
                state,
                error_message,
            } => {
                if error_message.is_empty() {
                    tracing::info!(deployment_id = %deployment_id, dev_eui = %dev_eui, state = %state, "Device status");
                } else {
                    tracing::warn!(
                        deployment_id = %deployment_id,
                        dev_eui = %dev_eui,
                        state = %state,
                        error = %error_message,
                        "Device status"
                    );
                }
            }
        }
    }
}

/// Observer that keeps every event, for tests and dry runs.
#[derive(Default)]
pub struct CollectingObserver {
    events: std::sync::Mutex<Vec<FuotaEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FuotaEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// States a deployment went through, in order.
    pub fn transitions(&self, deployment_id: Uuid) -> Vec<DeploymentState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FuotaEvent::StateChanged {
                    deployment_id: id,
                    to,
                    ..
                } if id == deployment_id => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl FuotaObserver for CollectingObserver {
    fn on_event(&self, event: &FuotaEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
