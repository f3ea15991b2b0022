//! Remote multicast setup commands.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{CodecError, check_max, ensure_len, split_cid};
use crate::lorawan::{Aes128Key, DevAddr};

pub const DEFAULT_FPORT: u8 = 200;

pub const CID_MC_GROUP_SETUP: u8 = 0x02;
pub const CID_MC_GROUP_DELETE: u8 = 0x03;
pub const CID_MC_CLASS_C_SESSION: u8 = 0x04;

/// Highest device-side multicast slot (2-bit field).
pub const MAX_MC_GROUP_ID: u8 = 3;

fn mc_group_id_byte(mc_group_id: u8) -> Result<u8, CodecError> {
    check_max("McGroupID", mc_group_id as u64, MAX_MC_GROUP_ID as u64)?;
    Ok(mc_group_id)
}

/// McGroupSetupReq (29 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McGroupSetupReq {
    pub mc_group_id: u8,
    pub mc_addr: DevAddr,
    pub mc_key_encrypted: Aes128Key,
    pub min_mc_f_cnt: u32,
    pub max_mc_f_cnt: u32,
}

impl McGroupSetupReq {
    pub const SIZE: usize = 29;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(mc_group_id_byte(self.mc_group_id)?);
        buf.extend_from_slice(&self.mc_addr.to_le_bytes());
        buf.extend_from_slice(self.mc_key_encrypted.as_bytes());
        buf.write_u32::<LittleEndian>(self.min_mc_f_cnt)?;
        buf.write_u32::<LittleEndian>(self.max_mc_f_cnt)?;
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let mut addr = [0u8; 4];
        addr.copy_from_slice(&data[1..5]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&data[5..21]);
        let mut cursor = Cursor::new(&data[21..]);
        Ok(Self {
            mc_group_id: data[0] & 0x03,
            mc_addr: DevAddr::from_le_bytes(addr),
            mc_key_encrypted: Aes128Key(key),
            min_mc_f_cnt: cursor.read_u32::<LittleEndian>()?,
            max_mc_f_cnt: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// McGroupSetupAns (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupSetupAns {
    pub mc_group_id: u8,
    pub id_error: bool,
}

impl McGroupSetupAns {
    pub const SIZE: usize = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = mc_group_id_byte(self.mc_group_id)?;
        if self.id_error {
            b |= 1 << 2;
        }
        Ok(vec![b])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            mc_group_id: data[0] & 0x03,
            id_error: data[0] & (1 << 2) != 0,
        })
    }
}

/// McGroupDeleteReq (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupDeleteReq {
    pub mc_group_id: u8,
}

impl McGroupDeleteReq {
    pub const SIZE: usize = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(vec![mc_group_id_byte(self.mc_group_id)?])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            mc_group_id: data[0] & 0x03,
        })
    }
}

/// McGroupDeleteAns (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupDeleteAns {
    pub mc_group_id: u8,
    pub mc_group_undefined: bool,
}

impl McGroupDeleteAns {
    pub const SIZE: usize = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = mc_group_id_byte(self.mc_group_id)?;
        if self.mc_group_undefined {
            b |= 1 << 2;
        }
        Ok(vec![b])
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            mc_group_id: data[0] & 0x03,
            mc_group_undefined: data[0] & (1 << 2) != 0,
        })
    }
}

/// McClassCSessionReq (10 bytes).
///
/// `session_time` is in seconds since the GPS epoch modulo 2^32,
/// `dl_frequency` in Hz (sent as Hz / 100 in 24 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McClassCSessionReq {
    pub mc_group_id: u8,
    pub session_time: u32,
    pub session_time_out: u8,
    pub dl_frequency: u32,
    pub dr: u8,
}

impl McClassCSessionReq {
    pub const SIZE: usize = 10;

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        check_max("SessionTimeOut", self.session_time_out as u64, 15)?;
        if self.dl_frequency % 100 != 0 {
            return Err(CodecError::NotAMultiple {
                field: "DLFrequency",
                value: self.dl_frequency as u64,
                multiple: 100,
            });
        }
        let freq = self.dl_frequency / 100;
        check_max("DLFrequency / 100", freq as u64, (1 << 24) - 1)?;

        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(mc_group_id_byte(self.mc_group_id)?);
        buf.write_u32::<LittleEndian>(self.session_time)?;
        buf.push(self.session_time_out);
        buf.write_u24::<LittleEndian>(freq)?;
        buf.push(self.dr);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(&data[1..]);
        let session_time = cursor.read_u32::<LittleEndian>()?;
        let session_time_out = cursor.read_u8()? & 0x0f;
        let dl_frequency = cursor.read_u24::<LittleEndian>()? * 100;
        let dr = cursor.read_u8()?;
        Ok(Self {
            mc_group_id: data[0] & 0x03,
            session_time,
            session_time_out,
            dl_frequency,
            dr,
        })
    }
}

/// McClassCSessionAns (1 byte, or 4 bytes with TimeToStart when no error
/// bit is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McClassCSessionAns {
    pub mc_group_id: u8,
    pub dr_error: bool,
    pub freq_error: bool,
    pub mc_group_undefined: bool,
    pub time_to_start: Option<u32>,
}

impl McClassCSessionAns {
    pub fn has_error(&self) -> bool {
        self.dr_error || self.freq_error || self.mc_group_undefined
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut status = mc_group_id_byte(self.mc_group_id)?;
        if self.dr_error {
            status |= 1 << 2;
        }
        if self.freq_error {
            status |= 1 << 3;
        }
        if self.mc_group_undefined {
            status |= 1 << 4;
        }
        let mut buf = vec![status];
        if !self.has_error() {
            let tts = self.time_to_start.unwrap_or(0);
            check_max("TimeToStart", tts as u64, (1 << 24) - 1)?;
            buf.write_u24::<LittleEndian>(tts)?;
        }
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, 1)?;
        let status = data[0];
        let mut ans = Self {
            mc_group_id: status & 0x03,
            dr_error: status & (1 << 2) != 0,
            freq_error: status & (1 << 3) != 0,
            mc_group_undefined: status & (1 << 4) != 0,
            time_to_start: None,
        };
        if !ans.has_error() {
            ensure_len(data, 4)?;
            let mut cursor = Cursor::new(&data[1..]);
            ans.time_to_start = Some(cursor.read_u24::<LittleEndian>()?);
        }
        Ok(ans)
    }
}

/// A remote multicast setup command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    McGroupSetupReq(McGroupSetupReq),
    McGroupSetupAns(McGroupSetupAns),
    McGroupDeleteReq(McGroupDeleteReq),
    McGroupDeleteAns(McGroupDeleteAns),
    McClassCSessionReq(McClassCSessionReq),
    McClassCSessionAns(McClassCSessionAns),
}

impl Command {
    pub fn cid(&self) -> u8 {
        match self {
            Command::McGroupSetupReq(_) | Command::McGroupSetupAns(_) => CID_MC_GROUP_SETUP,
            Command::McGroupDeleteReq(_) | Command::McGroupDeleteAns(_) => CID_MC_GROUP_DELETE,
            Command::McClassCSessionReq(_) | Command::McClassCSessionAns(_) => {
                CID_MC_CLASS_C_SESSION
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::McGroupSetupReq(_) => "McGroupSetupReq",
            Command::McGroupSetupAns(_) => "McGroupSetupAns",
            Command::McGroupDeleteReq(_) => "McGroupDeleteReq",
            Command::McGroupDeleteAns(_) => "McGroupDeleteAns",
            Command::McClassCSessionReq(_) => "McClassCSessionReq",
            Command::McClassCSessionAns(_) => "McClassCSessionAns",
        }
    }

    /// Serialize as CID followed by the payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let payload = match self {
            Command::McGroupSetupReq(p) => p.to_bytes()?,
            Command::McGroupSetupAns(p) => p.to_bytes()?,
            Command::McGroupDeleteReq(p) => p.to_bytes()?,
            Command::McGroupDeleteAns(p) => p.to_bytes()?,
            Command::McClassCSessionReq(p) => p.to_bytes()?,
            Command::McClassCSessionAns(p) => p.to_bytes()?,
        };
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.push(self.cid());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Parse a command. `uplink` selects between Ans (device to server) and
    /// Req (server to device) layouts.
    pub fn from_bytes(uplink: bool, data: &[u8]) -> Result<Self, CodecError> {
        let (cid, payload) = split_cid(data)?;
        let cmd = match (cid, uplink) {
            (CID_MC_GROUP_SETUP, true) => {
                Command::McGroupSetupAns(McGroupSetupAns::from_bytes(payload)?)
            }
            (CID_MC_GROUP_SETUP, false) => {
                Command::McGroupSetupReq(McGroupSetupReq::from_bytes(payload)?)
            }
            (CID_MC_GROUP_DELETE, true) => {
                Command::McGroupDeleteAns(McGroupDeleteAns::from_bytes(payload)?)
            }
            (CID_MC_GROUP_DELETE, false) => {
                Command::McGroupDeleteReq(McGroupDeleteReq::from_bytes(payload)?)
            }
            (CID_MC_CLASS_C_SESSION, true) => {
                Command::McClassCSessionAns(McClassCSessionAns::from_bytes(payload)?)
            }
            (CID_MC_CLASS_C_SESSION, false) => {
                Command::McClassCSessionReq(McClassCSessionReq::from_bytes(payload)?)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mc_group_setup_req_layout() {
        let cmd = Command::McGroupSetupReq(McGroupSetupReq {
            mc_group_id: 2,
            mc_addr: "01020304".parse().unwrap(),
            mc_key_encrypted: Aes128Key([0xAA; 16]),
            min_mc_f_cnt: 1,
            max_mc_f_cnt: u32::MAX,
        });
        let b = cmd.to_bytes().unwrap();
        assert_eq!(b.len(), 1 + McGroupSetupReq::SIZE);
        assert_eq!(b[0], CID_MC_GROUP_SETUP);
        assert_eq!(b[1], 0x02);
        assert_eq!(&b[2..6], &[4, 3, 2, 1]);
        assert_eq!(&b[6..22], &[0xAA; 16]);
        assert_eq!(&b[22..26], &[1, 0, 0, 0]);
        assert_eq!(&b[26..30], &[0xFF; 4]);
        assert_eq!(Command::from_bytes(false, &b).unwrap(), cmd);
    }

    #[test]
    fn test_mc_group_id_out_of_range() {
        let req = McGroupDeleteReq { mc_group_id: 4 };
        assert!(matches!(
            req.to_bytes(),
            Err(CodecError::OutOfRange { field: "McGroupID", .. })
        ));
    }

    #[test]
    fn test_mc_group_setup_ans() {
        let cmd = Command::from_bytes(true, &[0x02, 0x06]).unwrap();
        assert_eq!(
            cmd,
            Command::McGroupSetupAns(McGroupSetupAns {
                mc_group_id: 2,
                id_error: true
            })
        );
    }

    #[test]
    fn test_mc_group_delete_ans() {
        let cmd = Command::from_bytes(true, &[0x03, 0x01]).unwrap();
        assert_eq!(
            cmd,
            Command::McGroupDeleteAns(McGroupDeleteAns {
                mc_group_id: 1,
                mc_group_undefined: false
            })
        );
    }

    #[test]
    fn test_class_c_session_req_layout() {
        let req = McClassCSessionReq {
            mc_group_id: 0,
            session_time: 0x0102_0304,
            session_time_out: 8,
            dl_frequency: 869_525_000,
            dr: 3,
        };
        let b = Command::McClassCSessionReq(req).to_bytes().unwrap();
        // 869525000 / 100 = 8695250 = 0x84ADD2
        assert_eq!(
            b,
            vec![0x04, 0x00, 0x04, 0x03, 0x02, 0x01, 0x08, 0xD2, 0xAD, 0x84, 0x03]
        );
        assert_eq!(McClassCSessionReq::from_bytes(&b[1..]).unwrap(), req);
    }

    #[test]
    fn test_class_c_session_req_bad_frequency() {
        let req = McClassCSessionReq {
            mc_group_id: 0,
            session_time: 0,
            session_time_out: 0,
            dl_frequency: 869_525_050,
            dr: 0,
        };
        assert!(matches!(
            req.to_bytes(),
            Err(CodecError::NotAMultiple { .. })
        ));
    }

    #[test]
    fn test_class_c_session_ans_with_error_is_short() {
        let cmd = Command::from_bytes(true, &[0x04, 0b0000_1101]).unwrap();
        match cmd {
            Command::McClassCSessionAns(ans) => {
                assert_eq!(ans.mc_group_id, 1);
                assert!(ans.dr_error);
                assert!(ans.freq_error);
                assert!(!ans.mc_group_undefined);
                assert_eq!(ans.time_to_start, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_class_c_session_ans_time_to_start() {
        let cmd = Command::from_bytes(true, &[0x04, 0x00, 0x10, 0x00, 0x00]).unwrap();
        match cmd {
            Command::McClassCSessionAns(ans) => {
                assert!(!ans.has_error());
                assert_eq!(ans.time_to_start, Some(16));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(
            Command::from_bytes(true, &[0x04, 0x00, 0x10]),
            Err(CodecError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_unknown_cid() {
        assert!(matches!(
            Command::from_bytes(true, &[0x7F, 0x00]),
            Err(CodecError::UnknownCid(0x7F))
        ));
        assert!(matches!(
            Command::from_bytes(true, &[]),
            Err(CodecError::Empty)
        ));
    }
}
