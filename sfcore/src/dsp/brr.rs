//! Bit rate reduction sample decoding
//!
//! A BRR block is a header byte followed by 16 signed 4-bit samples. The
//! header holds the shift, one of four prediction filters and the end and
//! loop flags.
//!
//! # Literature
//!
//! - <https://wiki.superfamicom.org/bit-rate-reduction-(brr)>

use super::clip16;

pub const BLOCK_LEN: usize = 9;
pub const SAMPLES_PER_BLOCK: usize = 16;

/// The header byte of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(pub u8);

impl Header {
    pub const fn shift(self) -> u8 {
        self.0 >> 4
    }

    pub const fn filter(self) -> u8 {
        (self.0 >> 2) & 3
    }

    pub const fn is_end(self) -> bool {
        self.0 & 1 != 0
    }

    pub const fn is_loop(self) -> bool {
        self.0 & 2 != 0
    }
}

/// Decode one block given the two samples preceding it.
///
/// Returns the 16 decoded samples and the history for the next block.
pub fn decode_block(block: &[u8; BLOCK_LEN], prev: [i16; 2]) -> ([i16; SAMPLES_PER_BLOCK], [i16; 2]) {
    let header = Header(block[0]);
    let shift = header.shift();
    // shift values above 12 only keep the sign of the nibble
    let invalid = shift >= 0xd;
    let (mut prev0, mut prev1) = (i32::from(prev[0]), i32::from(prev[1]));
    let mut out = [0; SAMPLES_PER_BLOCK];
    for (i, &byte) in block[1..].iter().enumerate() {
        let mut nibbles = [(byte as i8) >> 4, ((byte << 4) as i8) >> 4];
        if invalid {
            nibbles.iter_mut().for_each(|n| *n >>= 3)
        }
        for (j, nibble) in nibbles.into_iter().enumerate() {
            let mut sample = (i32::from(nibble) << shift) >> 1;
            sample += match header.filter() {
                0 => 0,
                1 => (prev0 >> 1) + ((-prev0) >> 5),
                2 => prev0 + ((-(prev0 + (prev0 >> 1))) >> 5) - (prev1 >> 1) + (prev1 >> 5),
                _ => {
                    prev0 + ((-(prev0 + (prev0 << 2) + (prev0 << 3))) >> 7) - (prev1 >> 1)
                        + ((prev1 + (prev1 >> 1)) >> 4)
                }
            };
            let sample = clip16(sample);
            prev1 = i32::from(prev0 as i16);
            prev0 = i32::from((sample << 1) as i16);
            out[i * 2 + j] = (sample << 1) as i16;
        }
    }
    (out, [prev0 as i16, prev1 as i16])
}
