use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RemoteSession, Request, run_once};
use crate::applayer::CodecError;
use crate::applayer::fragmentation::{
    self, Command, FragSessionDeleteReq, FragSessionSetupReq,
};
use crate::config::SyncConfig;
use crate::events::RemoteKind;
use crate::lorawan::Eui64;
use crate::model::{Provisioning, RemoteFragmentationSession, RemoteState};
use crate::services::Services;
use crate::store::{StoreError, StoreTx};

impl RemoteFragmentationSession {
    /// McGroupBitMask of the session. IDs above 3 cannot be expressed and
    /// are left out.
    pub fn mc_group_bit_mask(&self) -> [bool; 4] {
        let mut mask = [false; 4];
        for id in &self.mc_group_ids {
            if let Some(bit) = mask.get_mut(*id as usize) {
                *bit = true;
            }
        }
        mask
    }
}

#[async_trait]
impl RemoteSession for RemoteFragmentationSession {
    const KIND: RemoteKind = RemoteKind::FragmentationSession;

    fn dev_eui(&self) -> Eui64 {
        self.dev_eui
    }

    fn provisioning_mut(&mut self) -> &mut Provisioning {
        &mut self.provisioning
    }

    fn request(&self) -> Result<Request, CodecError> {
        let cmd = match self.state {
            RemoteState::Setup => Command::FragSessionSetupReq(FragSessionSetupReq {
                frag_index: self.frag_index,
                mc_group_bit_mask: self.mc_group_bit_mask(),
                nb_frag: self.nb_frag,
                frag_size: self.frag_size,
                fragmentation_matrix: self.fragmentation_matrix,
                block_ack_delay: self.block_ack_delay,
                padding: self.padding,
                descriptor: self.descriptor,
            }),
            RemoteState::Delete => Command::FragSessionDeleteReq(FragSessionDeleteReq {
                frag_index: self.frag_index,
            }),
        };
        Ok(Request {
            name: cmd.name(),
            f_port: fragmentation::DEFAULT_FPORT,
            payload: cmd.to_bytes()?,
        })
    }

    fn log_enqueued(&self, request: &Request) {
        tracing::info!(
            dev_eui = %self.dev_eui,
            frag_index = self.frag_index,
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
        tx.get_pending_remote_fragmentation_sessions(limit, max_retry, now)
            .await
    }

    async fn save(&self, tx: &mut dyn StoreTx) -> Result<(), StoreError> {
        tx.update_remote_fragmentation_session(self).await
    }
}

/// Send FragSessionSetupReq / FragSessionDeleteReq for every pending
/// fragmentation session.
pub async fn sync_remote_fragmentation_sessions(
    services: &Services,
    config: &SyncConfig,
) -> Result<usize> {
    run_once::<RemoteFragmentationSession>(services, config)
        .await
        .context("sync remote fragmentation session error")
}
