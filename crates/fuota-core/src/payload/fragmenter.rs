//! Fragmentation and forward error correction.
//!
//! The encoder emits the data fragments unchanged, followed by `redundancy`
//! parity fragments. Parity fragment `y` (1-based) is the XOR of the data
//! fragments selected by [`matrix_line`]`(y, nb_frag)`, the pseudo-random
//! low-density parity matrix of the LoRaWAN fragmented data block transport.
//! The receiver regenerates the same matrix, so the sequence must be
//! reproduced exactly.

use thiserror::Error;

use crate::applayer::fragmentation::{DataFragment, MAX_FRAGMENT_N};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Fragment size must be greater than zero")]
    ZeroFragSize,
    #[error("Payload length {len} is not a multiple of the fragment size {frag_size}")]
    NotAMultiple { len: usize, frag_size: usize },
    #[error("Too many fragments: {count} (max {max})")]
    TooManyFragments { count: usize, max: usize },
}

fn prbs23(x: u32) -> u32 {
    let b0 = x & 1;
    let b1 = (x & 32) / 32;
    (x / 2) + ((b0 ^ b1) << 22)
}

fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Row `n` (1-based) of the parity matrix for `m` data fragments.
pub fn matrix_line(n: usize, m: usize) -> Vec<bool> {
    let mut line = vec![false; m];
    if m == 0 {
        return line;
    }
    let mm = if is_power_of_two(m) { 1 } else { 0 };
    let mut x = 1 + 1001 * n as u32;
    for _ in 0..m / 2 {
        let mut r = 1usize << 16;
        while r >= m {
            x = prbs23(x);
            r = x as usize % (m + mm);
        }
        line[r] = true;
    }
    line
}

/// Split `payload` into `frag_size` chunks and append `redundancy` parity
/// fragments. The payload must already be padded to a multiple of
/// `frag_size`.
pub fn fragment(
    payload: &[u8],
    frag_size: usize,
    redundancy: usize,
) -> Result<Vec<Vec<u8>>, FragmentError> {
    if frag_size == 0 {
        return Err(FragmentError::ZeroFragSize);
    }
    if payload.len() % frag_size != 0 {
        return Err(FragmentError::NotAMultiple {
            len: payload.len(),
            frag_size,
        });
    }

    let data: Vec<&[u8]> = payload.chunks(frag_size).collect();
    let mut out: Vec<Vec<u8>> = data.iter().map(|c| c.to_vec()).collect();

    for y in 0..redundancy {
        let line = matrix_line(y + 1, data.len());
        let mut parity = vec![0u8; frag_size];
        for (chunk, _) in data.iter().zip(line).filter(|(_, set)| *set) {
            for (p, b) in parity.iter_mut().zip(chunk.iter()) {
                *p ^= b;
            }
        }
        out.push(parity);
    }

    Ok(out)
}

/// A firmware image prepared for a given fragment size.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    frag_size: usize,
}

impl FirmwareImage {
    pub fn new(data: Vec<u8>, frag_size: usize) -> Result<Self, FragmentError> {
        if frag_size == 0 {
            return Err(FragmentError::ZeroFragSize);
        }
        Ok(Self { data, frag_size })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frag_size(&self) -> usize {
        self.frag_size
    }

    /// Zero bytes appended so the image fills whole fragments.
    pub fn padding(&self) -> usize {
        (self.frag_size - self.data.len() % self.frag_size) % self.frag_size
    }

    /// Number of data fragments (excluding redundancy).
    pub fn nb_frag(&self) -> usize {
        (self.data.len() + self.padding()) / self.frag_size
    }

    pub fn padded_bytes(&self) -> Vec<u8> {
        let mut b = self.data.clone();
        b.resize(self.data.len() + self.padding(), 0);
        b
    }

    pub fn fragments(&self, redundancy: usize) -> Result<Vec<Vec<u8>>, FragmentError> {
        fragment(&self.padded_bytes(), self.frag_size, redundancy)
    }

    /// DataFragment commands numbered 1..=N, ready for the downlink queue.
    pub fn data_fragments(
        &self,
        frag_index: u8,
        redundancy: usize,
    ) -> Result<Vec<DataFragment>, FragmentError> {
        let fragments = self.fragments(redundancy)?;
        if fragments.len() > MAX_FRAGMENT_N as usize {
            return Err(FragmentError::TooManyFragments {
                count: fragments.len(),
                max: MAX_FRAGMENT_N as usize,
            });
        }
        Ok(fragments
            .into_iter()
            .enumerate()
            .map(|(i, payload)| DataFragment {
                frag_index,
                n: i as u16 + 1,
                payload,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bits(v: &[u8]) -> Vec<bool> {
        v.iter().map(|b| *b == 1).collect()
    }

    fn image() -> FirmwareImage {
        FirmwareImage::new((1..=23).collect(), 10).unwrap()
    }

    #[test]
    fn test_padding_and_count() {
        let img = image();
        assert_eq!(img.padding(), 7);
        assert_eq!(img.nb_frag(), 3);
        assert_eq!(img.padded_bytes().len(), 30);

        let exact = FirmwareImage::new(vec![0; 20], 10).unwrap();
        assert_eq!(exact.padding(), 0);
        assert_eq!(exact.nb_frag(), 2);
    }

    #[test]
    fn test_matrix_lines() {
        assert_eq!(matrix_line(1, 3), bits(&[0, 1, 0]));
        assert_eq!(matrix_line(2, 3), bits(&[1, 0, 0]));
        assert_eq!(matrix_line(3, 3), bits(&[1, 0, 0]));
        assert_eq!(matrix_line(4, 3), bits(&[0, 1, 0]));

        assert_eq!(matrix_line(1, 10), bits(&[0, 0, 1, 0, 0, 1, 0, 0, 0, 0]));
        assert_eq!(matrix_line(2, 10), bits(&[1, 0, 1, 0, 1, 1, 0, 0, 0, 1]));
        assert_eq!(matrix_line(3, 10), bits(&[0, 1, 0, 1, 0, 1, 1, 1, 0, 0]));
        assert_eq!(matrix_line(4, 10), bits(&[1, 1, 1, 0, 1, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_fragment_with_redundancy() {
        let frags = image().fragments(3).unwrap();
        let hex: Vec<String> = frags.iter().map(hex::encode).collect();
        assert_eq!(
            hex,
            vec![
                "0102030405060708090a",
                "0b0c0d0e0f1011121314",
                "15161700000000000000",
                "0b0c0d0e0f1011121314",
                "0102030405060708090a",
                "0102030405060708090a",
            ]
        );
    }

    #[test]
    fn test_fragment_deterministic() {
        assert_eq!(image().fragments(5).unwrap(), image().fragments(5).unwrap());
    }

    #[test]
    fn test_fragment_rejects_unpadded() {
        assert_eq!(
            fragment(&[1, 2, 3], 2, 0),
            Err(FragmentError::NotAMultiple {
                len: 3,
                frag_size: 2
            })
        );
        assert_eq!(fragment(&[], 0, 0), Err(FragmentError::ZeroFragSize));
    }

    #[test]
    fn test_data_fragments_numbering() {
        let cmds = image().data_fragments(1, 2).unwrap();
        assert_eq!(cmds.len(), 5);
        assert_eq!(cmds.first().map(|c| c.n), Some(1));
        assert_eq!(cmds.last().map(|c| c.n), Some(5));
        assert!(cmds.iter().all(|c| c.frag_index == 1));
    }

    proptest! {
        #[test]
        fn prop_fragment_round_trip(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            frag_size in 1usize..64,
        ) {
            let img = FirmwareImage::new(payload.clone(), frag_size).unwrap();
            let frags = img.fragments(0).unwrap();
            prop_assert_eq!(frags.len(), img.nb_frag());
            prop_assert!(frags.iter().all(|f| f.len() == frag_size));

            let mut joined: Vec<u8> = frags.concat();
            joined.truncate(joined.len() - img.padding());
            prop_assert_eq!(joined, payload);
        }
    }
}
