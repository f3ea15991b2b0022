//! Uplink answer handlers.
//!
//! Devices acknowledge the remote provisioning requests with Ans commands
//! on the application-layer FPorts. Each handler parses one frame, applies
//! it to the store inside its own transaction and, where the protocol needs
//! it, answers with a downlink.
//!
//! - `multicastsetup`: McGroupSetupAns, McGroupDeleteAns, McClassCSessionAns
//! - `fragmentation`: FragSessionSetupAns, FragSessionDeleteAns, FragSessionStatusAns
//! - `clocksync`: AppTimeReq

mod clocksync;
mod fragmentation;
mod multicastsetup;

use thiserror::Error;

use crate::applayer::{self, CodecError};
use crate::dispatch::{DispatchError, MulticastError};
use crate::lorawan::Eui64;
use crate::services::Services;
use crate::store::{StoreError, StoreTx};

pub use clocksync::handle_clock_sync_command;
pub use fragmentation::handle_fragmentation_command;
pub use multicastsetup::handle_remote_multicast_setup_command;

#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("IDError for McGroupID: {0}")]
    IdError(u8),

    #[error("McGroupUndefined for McGroupID: {0}")]
    McGroupUndefined(u8),

    #[error(
        "DRError: {dr_error}, FreqError: {freq_error}, McGroupUndefined: {mc_group_undefined} for McGroupID: {mc_group_id}"
    )]
    ClassCSession {
        mc_group_id: u8,
        dr_error: bool,
        freq_error: bool,
        mc_group_undefined: bool,
    },

    #[error(
        "WrongDescriptor: {wrong_descriptor}, FragSessionIndexNotSupported: {frag_session_index_not_supported}, NotEnoughMemory: {not_enough_memory}, EncodingUnsupported: {encoding_unsupported}"
    )]
    FragSessionSetup {
        wrong_descriptor: bool,
        frag_session_index_not_supported: bool,
        not_enough_memory: bool,
        encoding_unsupported: bool,
    },

    #[error("FragIndex {0} does not exist")]
    FragSessionDoesNotExist(u8),

    #[error("CID not implemented: {0}")]
    CidNotImplemented(String),

    #[error("No handler for FPort {0}")]
    UnknownFPort(u8),

    #[error("unmarshal command error: {0}")]
    Codec(CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Multicast(#[from] MulticastError),
}

impl UplinkError {
    /// Whether the uplink may be handled again once the conflicting
    /// transaction is gone.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UplinkError::Store(e) if e.is_retryable())
    }
}

impl From<CodecError> for UplinkError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownCid(cid) => UplinkError::CidNotImplemented(format!("0x{cid:02X}")),
            other => UplinkError::Codec(other),
        }
    }
}

/// Route an uplink frame to the handler of its application-layer FPort.
pub async fn handle_uplink(
    services: &Services,
    dev_eui: Eui64,
    f_port: u8,
    data: &[u8],
) -> Result<(), UplinkError> {
    match f_port {
        applayer::multicastsetup::DEFAULT_FPORT => {
            handle_remote_multicast_setup_command(services, dev_eui, data).await
        }
        applayer::fragmentation::DEFAULT_FPORT => {
            handle_fragmentation_command(services, dev_eui, data).await
        }
        applayer::clocksync::DEFAULT_FPORT => {
            handle_clock_sync_command(services, dev_eui, data).await
        }
        other => Err(UplinkError::UnknownFPort(other)),
    }
}

/// Commit `tx` when `result` is Ok, roll it back otherwise.
async fn complete<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, UplinkError>,
) -> Result<T, UplinkError> {
    match result {
        Ok(v) => {
            tx.commit().await?;
            Ok(v)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
