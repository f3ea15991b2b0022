use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RemoteSession, Request, run_once};
use crate::applayer::CodecError;
use crate::applayer::multicastsetup::{self, Command, McGroupDeleteReq, McGroupSetupReq};
use crate::config::SyncConfig;
use crate::events::RemoteKind;
use crate::lorawan::Eui64;
use crate::model::{Provisioning, RemoteMulticastSetup, RemoteState};
use crate::services::Services;
use crate::store::{StoreError, StoreTx};

#[async_trait]
impl RemoteSession for RemoteMulticastSetup {
    const KIND: RemoteKind = RemoteKind::MulticastSetup;

    fn dev_eui(&self) -> Eui64 {
        self.dev_eui
    }

    fn provisioning_mut(&mut self) -> &mut Provisioning {
        &mut self.provisioning
    }

    fn request(&self) -> Result<Request, CodecError> {
        let cmd = match self.state {
            RemoteState::Setup => Command::McGroupSetupReq(McGroupSetupReq {
                mc_group_id: self.mc_group_id,
                mc_addr: self.mc_addr,
                mc_key_encrypted: self.mc_key_encrypted,
                min_mc_f_cnt: self.min_mc_f_cnt,
                max_mc_f_cnt: self.max_mc_f_cnt,
            }),
            RemoteState::Delete => Command::McGroupDeleteReq(McGroupDeleteReq {
                mc_group_id: self.mc_group_id,
            }),
        };
        Ok(Request {
            name: cmd.name(),
            f_port: multicastsetup::DEFAULT_FPORT,
            payload: cmd.to_bytes()?,
        })
    }

    fn log_enqueued(&self, request: &Request) {
        tracing::info!(
            dev_eui = %self.dev_eui,
            mc_group_id = self.mc_group_id,
            "{} enqueued",
            request.name
        );
    }

    async fn pending(
        tx: &mut dyn StoreTx,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, StoreError> {
        tx.get_pending_remote_multicast_setups(limit, max_retry, now)
            .await
    }

    async fn save(&self, tx: &mut dyn StoreTx) -> Result<(), StoreError> {
        tx.update_remote_multicast_setup(self).await
    }
}

/// Send McGroupSetupReq / McGroupDeleteReq for every pending multicast setup.
pub async fn sync_remote_multicast_setups(services: &Services, config: &SyncConfig) -> Result<usize> {
    run_once::<RemoteMulticastSetup>(services, config)
        .await
        .context("sync remote multicast setup error")
}
