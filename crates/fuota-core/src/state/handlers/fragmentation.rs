//! Fragmentation handlers (FRAG_SESS_SETUP, ENQUEUE, STATUS_REQUEST).

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use super::{StepContext, multicast_group_id, retry_window};
use crate::applayer::fragmentation::{self, Command, FragSessionStatusReq};
use crate::events::FuotaEvent;
use crate::model::{
    FuotaDeployment, GroupType, MAX_MULTICAST_TIMEOUT, Provisioning, RemoteFragmentationSession,
    RemoteState,
};
use crate::payload::FirmwareImage;
use crate::store::StoreError;

/// FRAG_SESS_SETUP - queue a fragmentation session for every device that
/// accepted the multicast setup.
pub async fn step_fragmentation_sess_setup(
    ctx: &mut StepContext<'_>,
    item: &mut FuotaDeployment,
) -> Result<()> {
    let group_id = multicast_group_id(item)?;

    if item.frag_size == 0 {
        bail!("FragSize must not be 0");
    }
    let frag_size = u8::try_from(item.frag_size)
        .with_context(|| format!("FragSize {} does not fit in one byte", item.frag_size))?;

    let image = FirmwareImage::new(item.payload.clone(), item.frag_size)?;
    let padding = u8::try_from(image.padding()).context("padding out of range")?;
    let nb_frag = u16::try_from(image.nb_frag())
        .with_context(|| format!("NbFrag {} out of range", image.nb_frag()))?;

    let dev_euis = ctx
        .tx
        .get_dev_euis_with_multicast_setup(group_id)
        .await
        .context("get devices with multicast setup error")?;

    let frag_index = ctx.config.frag_index;
    for dev_eui in &dev_euis {
        // Drop a stale session left at this index by an earlier deployment.
        match ctx
            .tx
            .delete_remote_fragmentation_session(*dev_eui, frag_index)
            .await
        {
            Ok(()) | Err(StoreError::DoesNotExist) => {}
            Err(e) => return Err(e).context("delete remote fragmentation session error"),
        }

        let fs = RemoteFragmentationSession {
            dev_eui: *dev_eui,
            frag_index,
            mc_group_ids: vec![ctx.config.mc_group_id],
            nb_frag,
            frag_size,
            fragmentation_matrix: item.fragmentation_matrix,
            block_ack_delay: item.block_ack_delay,
            padding,
            descriptor: item.descriptor,
            state: RemoteState::Setup,
            provisioning: Provisioning::new(item.unicast_timeout, ctx.now),
        };
        ctx.tx
            .create_remote_fragmentation_session(&fs)
            .await
            .context("create remote fragmentation session error")?;
    }

    info!(
        deployment_id = %item.id,
        devices = dev_euis.len(),
        nb_frag,
        padding,
        "Remote fragmentation sessions created"
    );

    item.next_step_after = ctx.after(retry_window(
        ctx.config.remote_fragmentation_session_retries,
        item.unicast_timeout,
    ))?;
    Ok(())
}

/// ENQUEUE - fragment the payload and hand every fragment to the multicast
/// group queue.
pub async fn step_enqueue(ctx: &mut StepContext<'_>, item: &mut FuotaDeployment) -> Result<()> {
    let group_id = multicast_group_id(item)?;

    // Checked before anything is queued.
    let session = match item.group_type {
        GroupType::C => {
            if item.multicast_timeout > MAX_MULTICAST_TIMEOUT {
                bail!(
                    "multicast timeout {} exceeds {}",
                    item.multicast_timeout,
                    MAX_MULTICAST_TIMEOUT
                );
            }
            Duration::from_secs(1u64 << item.multicast_timeout)
        }
        other => bail!("group-type not implemented: {}", other),
    };

    let image = FirmwareImage::new(item.payload.clone(), item.frag_size)?;
    let payloads = image
        .data_fragments(ctx.config.frag_index, item.redundancy)
        .context("fragment payload error")?
        .into_iter()
        .map(|f| Command::DataFragment(f).to_bytes())
        .collect::<Result<Vec<_>, _>>()
        .context("marshal binary error")?;

    ctx.services
        .dispatcher
        .enqueue_multicast(group_id, fragmentation::DEFAULT_FPORT, &payloads)
        .await
        .context("enqueue multiple error")?;

    info!(
        deployment_id = %item.id,
        multicast_group_id = %group_id,
        count = payloads.len(),
        "DataFragment enqueued"
    );
    ctx.emit(FuotaEvent::FragmentsEnqueued {
        deployment_id: item.id,
        multicast_group_id: group_id,
        count: payloads.len(),
    });

    item.next_step_after = ctx.after(session)?;
    Ok(())
}

/// STATUS_REQUEST - ask every participant how many fragments it received.
pub async fn step_status_request(
    ctx: &mut StepContext<'_>,
    item: &mut FuotaDeployment,
) -> Result<()> {
    let group_id = multicast_group_id(item)?;
    let frag_index = ctx.config.frag_index;

    let dev_euis = ctx
        .tx
        .get_dev_euis_with_fragmentation_session_setup(group_id, frag_index)
        .await
        .context("get devices with fragmentation session setup error")?;

    let cmd = Command::FragSessionStatusReq(FragSessionStatusReq {
        frag_index,
        participants: true,
    });
    let payload = cmd.to_bytes().context("marshal binary error")?;

    for dev_eui in dev_euis {
        ctx.services
            .dispatcher
            .enqueue_downlink(dev_eui, false, fragmentation::DEFAULT_FPORT, &payload)
            .await
            .context("enqueue downlink payload error")?;
        info!(dev_eui = %dev_eui, frag_index, "{} enqueued", cmd.name());
    }

    item.next_step_after = ctx.after(item.unicast_timeout)?;
    Ok(())
}
