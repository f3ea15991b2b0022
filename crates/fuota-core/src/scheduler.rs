//! Background loops.
//!
//! - **FUOTA deployments**: steps every deployment that is due.
//! - **Remote multicast setup**: sends McGroupSetupReq / McGroupDeleteReq.
//! - **Remote multicast Class-C sessions**: sends McClassCSessionReq.
//! - **Remote fragmentation sessions**: sends FragSessionSetupReq / FragSessionDeleteReq.
//!
//! Every iteration runs in its own store transaction. The loops share no
//! in-process state; all coordination goes through the store.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::services::Services;
use crate::state::process_batch;
use crate::store::traits::is_retryable;
use crate::sync::{
    sync_remote_fragmentation_sessions, sync_remote_multicast_class_c_sessions,
    sync_remote_multicast_setups,
};

/// Start the four loops. Cancelling the returned token stops them between
/// iterations.
pub fn start(config: &Config, services: Services) -> CancellationToken {
    let cancel = CancellationToken::new();

    {
        let config = config.fuota_deployment.clone();
        spawn_loop(
            "fuota deployment",
            config.interval(),
            cancel.clone(),
            services.clone(),
            move |s| {
                let config = config.clone();
                async move { process_batch(&s, &config).await }
            },
        );
    }

    {
        let config = config.remote_multicast_setup.clone();
        spawn_loop(
            "remote multicast setup",
            config.interval(),
            cancel.clone(),
            services.clone(),
            move |s| {
                let config = config.clone();
                async move { sync_remote_multicast_setups(&s, &config).await }
            },
        );
    }

    {
        let config = config.remote_multicast_setup.clone();
        spawn_loop(
            "remote multicast class-c session",
            config.interval(),
            cancel.clone(),
            services.clone(),
            move |s| {
                let config = config.clone();
                async move { sync_remote_multicast_class_c_sessions(&s, &config).await }
            },
        );
    }

    {
        let config = config.fragmentation_session.clone();
        spawn_loop(
            "remote fragmentation session",
            config.interval(),
            cancel.clone(),
            services,
            move |s| {
                let config = config.clone();
                async move { sync_remote_fragmentation_sessions(&s, &config).await }
            },
        );
    }

    cancel
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    services: Services,
    mut iteration: F,
) where
    F: FnMut(Services) -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send,
{
    tokio::spawn(async move {
        info!(interval = ?interval, "{name} loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("{name} loop stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    match iteration(services.clone()).await {
                        Ok(0) => {}
                        Ok(n) => debug!(count = n, "{name} loop handled {n} items"),
                        Err(e) if is_retryable(&e) => warn!(error = %format!("{e:#}"), "{name} loop conflict"),
                        Err(e) => error!(error = %format!("{e:#}"), "{name} error"),
                    }
                }
            }
        }
    });
}
