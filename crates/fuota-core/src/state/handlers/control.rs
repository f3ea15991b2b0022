//! Control flow handlers (device status reconciliation, cleanup).

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{StepContext, multicast_group_id};
use crate::dispatch::MulticastError;
use crate::events::FuotaEvent;
use crate::model::{FuotaDeployment, FuotaDeploymentDevice};

fn device_status(ctx: &mut StepContext<'_>, devices: Vec<FuotaDeploymentDevice>) {
    for d in devices {
        ctx.emit(FuotaEvent::DeviceStatus {
            deployment_id: d.fuota_deployment_id,
            dev_eui: d.dev_eui,
            state: d.state,
            error_message: d.error_message,
        });
    }
}

/// SET_DEVICE_STATUS - turn every device still PENDING into an ERROR with
/// the most specific reason available.
pub async fn step_set_device_status(
    ctx: &mut StepContext<'_>,
    item: &mut FuotaDeployment,
) -> Result<()> {
    let group_id = multicast_group_id(item)?;

    let failed_setup = ctx
        .tx
        .set_from_remote_multicast_setup(item.id, group_id)
        .await
        .context("set remote multicast setup error")?;

    let failed_fragmentation = ctx
        .tx
        .set_from_remote_fragmentation_session(item.id, ctx.config.frag_index)
        .await
        .context("set fragmentation session setup error")?;

    let incomplete = ctx
        .tx
        .set_incomplete_fuota_deployment(item.id)
        .await
        .context("set incomplete fuota deployment error")?;

    info!(
        deployment_id = %item.id,
        multicast_setup_failed = failed_setup.len(),
        fragmentation_session_failed = failed_fragmentation.len(),
        incomplete = incomplete.len(),
        "Device status set"
    );

    device_status(ctx, failed_setup);
    device_status(ctx, failed_fragmentation);
    device_status(ctx, incomplete);

    item.next_step_after = ctx.now;
    Ok(())
}

/// CLEANUP - delete the multicast group and the remote records bound to it.
pub async fn step_cleanup(ctx: &mut StepContext<'_>, item: &mut FuotaDeployment) -> Result<()> {
    if let Some(group_id) = item.multicast_group_id {
        match ctx.services.multicast.delete_multicast_group(group_id).await {
            Ok(()) => {}
            Err(MulticastError::DoesNotExist) => {
                warn!(
                    deployment_id = %item.id,
                    multicast_group_id = %group_id,
                    "Multicast group already deleted"
                );
            }
            Err(e) => return Err(e).context("delete multicast group error"),
        }

        let removed = ctx
            .tx
            .delete_remote_multicast_records(group_id)
            .await
            .context("delete remote multicast records error")?;

        info!(
            deployment_id = %item.id,
            multicast_group_id = %group_id,
            removed,
            "Multicast group deleted"
        );
    }

    item.multicast_group_id = None;
    item.next_step_after = ctx.now;
    Ok(())
}
