//! Firmware payload handling.
//!
//! Pads a firmware image to whole fragments and produces the forward
//! error corrected fragment stream sent to the multicast group.

pub mod fragmenter;

pub use fragmenter::{FirmwareImage, FragmentError, fragment, matrix_line};
