//! Fragmented data block transport commands.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{CodecError, check_max, ensure_len, split_cid};

pub const DEFAULT_FPORT: u8 = 201;

pub const CID_FRAG_SESSION_STATUS: u8 = 0x01;
pub const CID_FRAG_SESSION_SETUP: u8 = 0x02;
pub const CID_FRAG_SESSION_DELETE: u8 = 0x03;
pub const CID_DATA_FRAGMENT: u8 = 0x08;

/// Highest device-side fragmentation session index (2-bit field).
pub const MAX_FRAG_INDEX: u8 = 3;

/// Largest fragment number N (14-bit field).
pub const MAX_FRAGMENT_N: u16 = (1 << 14) - 1;

fn frag_index(frag_index: u8) -> Result<u8, CodecError> {
    check_max("FragIndex", frag_index as u64, MAX_FRAG_INDEX as u64)?;
    Ok(frag_index)
}

/// FragSessionStatusReq (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionStatusReq {
    pub frag_index: u8,
    /// Only devices that have not yet received every fragment answer when
    /// this is false; with true, all participants answer.
    pub participants: bool,
}

impl FragSessionStatusReq {
    pub const SIZE: usize = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = frag_index(self.frag_index)? << 1;
        if self.participants {
            b |= 0x01;
        }
        Ok(vec![b])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            frag_index: (data[0] >> 1) & 0x03,
            participants: data[0] & 0x01 != 0,
        })
    }
}

/// FragSessionStatusAns (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionStatusAns {
    pub frag_index: u8,
    pub nb_frag_received: u16,
    pub missing_frag: u8,
    pub not_enough_matrix_memory: bool,
}

impl FragSessionStatusAns {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        check_max(
            "NbFragReceived",
            self.nb_frag_received as u64,
            MAX_FRAGMENT_N as u64,
        )?;
        let received_and_index =
            self.nb_frag_received | ((frag_index(self.frag_index)? as u16) << 14);
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u16::<LittleEndian>(received_and_index)?;
        buf.push(self.missing_frag);
        buf.push(self.not_enough_matrix_memory as u8);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let received_and_index = cursor.read_u16::<LittleEndian>()?;
        let missing_frag = cursor.read_u8()?;
        let status = cursor.read_u8()?;
        Ok(Self {
            frag_index: (received_and_index >> 14) as u8,
            nb_frag_received: received_and_index & MAX_FRAGMENT_N,
            missing_frag,
            not_enough_matrix_memory: status & 0x01 != 0,
        })
    }
}

/// FragSessionSetupReq (10 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionSetupReq {
    pub frag_index: u8,
    /// Multicast groups (McGroupID 0..=3) the session is bound to.
    pub mc_group_bit_mask: [bool; 4],
    pub nb_frag: u16,
    pub frag_size: u8,
    pub fragmentation_matrix: u8,
    pub block_ack_delay: u8,
    pub padding: u8,
    pub descriptor: [u8; 4],
}

impl FragSessionSetupReq {
    pub const SIZE: usize = 10;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        check_max("FragmentationMatrix", self.fragmentation_matrix as u64, 7)?;
        check_max("BlockAckDelay", self.block_ack_delay as u64, 7)?;

        let mut session = frag_index(self.frag_index)? << 4;
        for (i, set) in self.mc_group_bit_mask.iter().enumerate() {
            if *set {
                session |= 1 << i;
            }
        }

        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(session);
        buf.write_u16::<LittleEndian>(self.nb_frag)?;
        buf.push(self.frag_size);
        buf.push((self.fragmentation_matrix << 3) | self.block_ack_delay);
        buf.push(self.padding);
        buf.extend_from_slice(&self.descriptor);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(&data[1..]);
        let nb_frag = cursor.read_u16::<LittleEndian>()?;
        let frag_size = cursor.read_u8()?;
        let control = cursor.read_u8()?;
        let padding = cursor.read_u8()?;
        let mut descriptor = [0u8; 4];
        descriptor.copy_from_slice(&data[6..10]);
        Ok(Self {
            frag_index: (data[0] >> 4) & 0x03,
            mc_group_bit_mask: core::array::from_fn(|i| data[0] & (1 << i) != 0),
            nb_frag,
            frag_size,
            fragmentation_matrix: (control >> 3) & 0x07,
            block_ack_delay: control & 0x07,
            padding,
            descriptor,
        })
    }
}

/// FragSessionSetupAns (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionSetupAns {
    pub frag_index: u8,
    pub encoding_unsupported: bool,
    pub not_enough_memory: bool,
    pub frag_session_index_not_supported: bool,
    pub wrong_descriptor: bool,
}

impl FragSessionSetupAns {
    pub const SIZE: usize = 1;

    pub fn has_error(&self) -> bool {
        self.encoding_unsupported
            || self.not_enough_memory
            || self.frag_session_index_not_supported
            || self.wrong_descriptor
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = frag_index(self.frag_index)? << 6;
        b |= self.encoding_unsupported as u8;
        b |= (self.not_enough_memory as u8) << 1;
        b |= (self.frag_session_index_not_supported as u8) << 2;
        b |= (self.wrong_descriptor as u8) << 3;
        Ok(vec![b])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let b = data[0];
        Ok(Self {
            frag_index: b >> 6,
            encoding_unsupported: b & 0x01 != 0,
            not_enough_memory: b & 0x02 != 0,
            frag_session_index_not_supported: b & 0x04 != 0,
            wrong_descriptor: b & 0x08 != 0,
        })
    }
}

/// FragSessionDeleteReq (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionDeleteReq {
    pub frag_index: u8,
}

impl FragSessionDeleteReq {
    pub const SIZE: usize = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(vec![frag_index(self.frag_index)?])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            frag_index: data[0] & 0x03,
        })
    }
}

/// FragSessionDeleteAns (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionDeleteAns {
    pub frag_index: u8,
    pub session_does_not_exist: bool,
}

impl FragSessionDeleteAns {
    pub const SIZE: usize = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = frag_index(self.frag_index)?;
        if self.session_does_not_exist {
            b |= 1 << 2;
        }
        Ok(vec![b])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            frag_index: data[0] & 0x03,
            session_does_not_exist: data[0] & (1 << 2) != 0,
        })
    }
}

/// DataFragment: 2-byte index header followed by the fragment bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragment {
    pub frag_index: u8,
    /// 1-based fragment number.
    pub n: u16,
    pub payload: Vec<u8>,
}

impl DataFragment {
    pub const HEADER_SIZE: usize = 2;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        check_max("N", self.n as u64, MAX_FRAGMENT_N as u64)?;
        let index_and_n = self.n | ((frag_index(self.frag_index)? as u16) << 14);
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.payload.len());
        buf.write_u16::<LittleEndian>(index_and_n)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::HEADER_SIZE)?;
        let index_and_n = Cursor::new(data).read_u16::<LittleEndian>()?;
        Ok(Self {
            frag_index: (index_and_n >> 14) as u8,
            n: index_and_n & MAX_FRAGMENT_N,
            payload: data[Self::HEADER_SIZE..].to_vec(),
        })
    }
}

/// A fragmentation package command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FragSessionStatusReq(FragSessionStatusReq),
    FragSessionStatusAns(FragSessionStatusAns),
    FragSessionSetupReq(FragSessionSetupReq),
    FragSessionSetupAns(FragSessionSetupAns),
    FragSessionDeleteReq(FragSessionDeleteReq),
    FragSessionDeleteAns(FragSessionDeleteAns),
    DataFragment(DataFragment),
}

impl Command {
    pub fn cid(&self) -> u8 {
        match self {
            Command::FragSessionStatusReq(_) | Command::FragSessionStatusAns(_) => {
                CID_FRAG_SESSION_STATUS
            }
            Command::FragSessionSetupReq(_) | Command::FragSessionSetupAns(_) => {
                CID_FRAG_SESSION_SETUP
            }
            Command::FragSessionDeleteReq(_) | Command::FragSessionDeleteAns(_) => {
                CID_FRAG_SESSION_DELETE
            }
            Command::DataFragment(_) => CID_DATA_FRAGMENT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::FragSessionStatusReq(_) => "FragSessionStatusReq",
            Command::FragSessionStatusAns(_) => "FragSessionStatusAns",
            Command::FragSessionSetupReq(_) => "FragSessionSetupReq",
            Command::FragSessionSetupAns(_) => "FragSessionSetupAns",
            Command::FragSessionDeleteReq(_) => "FragSessionDeleteReq",
            Command::FragSessionDeleteAns(_) => "FragSessionDeleteAns",
            Command::DataFragment(_) => "DataFragment",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let payload = match self {
            Command::FragSessionStatusReq(p) => p.to_bytes()?,
            Command::FragSessionStatusAns(p) => p.to_bytes()?,
            Command::FragSessionSetupReq(p) => p.to_bytes()?,
            Command::FragSessionSetupAns(p) => p.to_bytes()?,
            Command::FragSessionDeleteReq(p) => p.to_bytes()?,
            Command::FragSessionDeleteAns(p) => p.to_bytes()?,
            Command::DataFragment(p) => p.to_bytes()?,
        };
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.push(self.cid());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn from_bytes(uplink: bool, data: &[u8]) -> Result<Self, CodecError> {
        let (cid, payload) = split_cid(data)?;
        let cmd = match (cid, uplink) {
            (CID_FRAG_SESSION_STATUS, true) => {
                Command::FragSessionStatusAns(FragSessionStatusAns::from_bytes(payload)?)
            }
            (CID_FRAG_SESSION_STATUS, false) => {
                Command::FragSessionStatusReq(FragSessionStatusReq::from_bytes(payload)?)
            }
            (CID_FRAG_SESSION_SETUP, true) => {
                Command::FragSessionSetupAns(FragSessionSetupAns::from_bytes(payload)?)
            }
            (CID_FRAG_SESSION_SETUP, false) => {
                Command::FragSessionSetupReq(FragSessionSetupReq::from_bytes(payload)?)
            }
            (CID_FRAG_SESSION_DELETE, true) => {
                Command::FragSessionDeleteAns(FragSessionDeleteAns::from_bytes(payload)?)
            }
            (CID_FRAG_SESSION_DELETE, false) => {
                Command::FragSessionDeleteReq(FragSessionDeleteReq::from_bytes(payload)?)
            }
            (CID_DATA_FRAGMENT, false) => {
                Command::DataFragment(DataFragment::from_bytes(payload)?)
            }
            (other, _) => return Err(CodecError::UnknownCid(other)),
        };
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
