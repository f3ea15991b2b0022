//! Collaborators shared by the loops and the uplink handlers.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::dispatch::{DownlinkDispatcher, MulticastGroupManager};
use crate::events::{FuotaObserver, TracingObserver};
use crate::store::Store;

/// Everything a step, a sync pass or an uplink handler talks to. Cheap to
/// clone.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<dyn DownlinkDispatcher>,
    pub multicast: Arc<dyn MulticastGroupManager>,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn FuotaObserver>,
}

impl Services {
    /// Services on the wall clock, reporting through tracing.
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn DownlinkDispatcher>,
        multicast: Arc<dyn MulticastGroupManager>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            multicast,
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn FuotaObserver>) -> Self {
        self.observer = observer;
        self
    }
}
