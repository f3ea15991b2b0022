//! Multicast key derivation (LoRaWAN remote multicast setup, TS005).
//!
//! Every function here is a single AES-128-ECB block operation over a fixed
//! 16-byte input, so they are pure and infallible. The device computes the
//! same functions independently, so the block layouts must match bit for bit:
//!
//! | Key        | Cipher key       | Block                       |
//! |------------|------------------|-----------------------------|
//! | McRootKey  | AppKey (1.1)     | `0x20 \| pad16`             |
//! | McRootKey  | GenAppKey (1.0)  | `0x00 \| pad16`             |
//! | McKEKey    | McRootKey        | `0x00 \| pad16`             |
//! | McAppSKey  | McKey            | `0x01 \| McAddr(LE) \| pad16` |
//! | McNetSKey  | McKey            | `0x02 \| McAddr(LE) \| pad16` |
//!
//! The encrypted McKey sent in McGroupSetupReq is `aes128_decrypt(McKEKey, McKey)`;
//! the device recovers McKey by encrypting it with its own McKEKey.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::lorawan::{Aes128Key, DevAddr};

fn aes_ecb_encrypt_block(key: &Aes128Key, block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new((&key.0).into());
    let mut output = block;
    cipher.encrypt_block((&mut output).into());
    output
}

fn aes_ecb_decrypt_block(key: &Aes128Key, block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new((&key.0).into());
    let mut output = block;
    cipher.decrypt_block((&mut output).into());
    output
}

fn session_key(mc_key: &Aes128Key, typ: u8, mc_addr: DevAddr) -> Aes128Key {
    let mut b = [0u8; 16];
    b[0] = typ;
    b[1..5].copy_from_slice(&mc_addr.to_le_bytes());
    Aes128Key(aes_ecb_encrypt_block(mc_key, b))
}

/// McRootKey for a LoRaWAN 1.1 device.
pub fn mc_root_key_for_app_key(app_key: &Aes128Key) -> Aes128Key {
    let mut b = [0u8; 16];
    b[0] = 0x20;
    Aes128Key(aes_ecb_encrypt_block(app_key, b))
}

/// McRootKey for a LoRaWAN 1.0.x device.
pub fn mc_root_key_for_gen_app_key(gen_app_key: &Aes128Key) -> Aes128Key {
    Aes128Key(aes_ecb_encrypt_block(gen_app_key, [0u8; 16]))
}

pub fn mc_ke_key(mc_root_key: &Aes128Key) -> Aes128Key {
    Aes128Key(aes_ecb_encrypt_block(mc_root_key, [0u8; 16]))
}

pub fn mc_app_s_key(mc_key: &Aes128Key, mc_addr: DevAddr) -> Aes128Key {
    session_key(mc_key, 0x01, mc_addr)
}

pub fn mc_net_s_key(mc_key: &Aes128Key, mc_addr: DevAddr) -> Aes128Key {
    session_key(mc_key, 0x02, mc_addr)
}

/// Wrap the group McKey for one device. The raw McKey never leaves the server.
pub fn encrypt_mc_key(mc_ke_key: &Aes128Key, mc_key: &Aes128Key) -> Aes128Key {
    Aes128Key(aes_ecb_decrypt_block(mc_ke_key, mc_key.0))
}

/// Inverse of [`encrypt_mc_key`], i.e. what the device does on reception.
pub fn decrypt_mc_key(mc_ke_key: &Aes128Key, mc_key_encrypted: &Aes128Key) -> Aes128Key {
    Aes128Key(aes_ecb_encrypt_block(mc_ke_key, mc_key_encrypted.0))
}

/// McRootKey from whichever root key the device has: AppKey when set,
/// GenAppKey otherwise.
pub fn mc_root_key(app_key: &Aes128Key, gen_app_key: &Aes128Key) -> Aes128Key {
    if app_key.is_zero() {
        mc_root_key_for_gen_app_key(gen_app_key)
    } else {
        mc_root_key_for_app_key(app_key)
    }
}
