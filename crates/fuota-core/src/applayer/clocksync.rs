//! Application-layer clock synchronization commands.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{CodecError, check_max, ensure_len, split_cid};

pub const DEFAULT_FPORT: u8 = 202;

pub const CID_APP_TIME: u8 = 0x01;

const MAX_TOKEN: u8 = 0x0F;

/// AppTimeReq (uplink, 5 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTimeReq {
    /// Device clock as GPS seconds modulo 2^32.
    pub device_time: u32,
    pub token_req: u8,
    pub ans_required: bool,
}

impl AppTimeReq {
    pub const SIZE: usize = 5;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        check_max("TokenReq", self.token_req as u64, MAX_TOKEN as u64)?;
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u32::<LittleEndian>(self.device_time)?;
        let mut param = self.token_req;
        if self.ans_required {
            param |= 1 << 4;
        }
        buf.push(param);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let device_time = cursor.read_u32::<LittleEndian>()?;
        let param = cursor.read_u8()?;
        Ok(Self {
            device_time,
            token_req: param & MAX_TOKEN,
            ans_required: param & (1 << 4) != 0,
        })
    }
}

/// AppTimeAns (downlink, 5 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTimeAns {
    /// Seconds the device must add to its clock.
    pub time_correction: i32,
    pub token_ans: u8,
}

impl AppTimeAns {
    pub const SIZE: usize = 5;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        check_max("TokenAns", self.token_ans as u64, MAX_TOKEN as u64)?;
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_i32::<LittleEndian>(self.time_correction)?;
        buf.push(self.token_ans);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let time_correction = cursor.read_i32::<LittleEndian>()?;
        let param = cursor.read_u8()?;
        Ok(Self {
            time_correction,
            token_ans: param & MAX_TOKEN,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AppTimeReq(AppTimeReq),
    AppTimeAns(AppTimeAns),
}

impl Command {
    pub fn cid(&self) -> u8 {
        CID_APP_TIME
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::AppTimeReq(_) => "AppTimeReq",
            Command::AppTimeAns(_) => "AppTimeAns",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let payload = match self {
            Command::AppTimeReq(p) => p.to_bytes()?,
            Command::AppTimeAns(p) => p.to_bytes()?,
        };
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.push(self.cid());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// In this package the request travels uplink and the answer downlink.
    pub fn from_bytes(uplink: bool, data: &[u8]) -> Result<Self, CodecError> {
        let (cid, payload) = split_cid(data)?;
        match (cid, uplink) {
            (CID_APP_TIME, true) => Ok(Command::AppTimeReq(AppTimeReq::from_bytes(payload)?)),
            (CID_APP_TIME, false) => Ok(Command::AppTimeAns(AppTimeAns::from_bytes(payload)?)),
            (other, _) => Err(CodecError::UnknownCid(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
