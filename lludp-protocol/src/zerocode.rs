//! Zero-encoding
//!
//! Run-length compression of zero bytes: every run of `n` zeroes
//! (`1..=255`) is written as `0x00 n`; all other bytes are copied. Runs
//! longer than 255 are split.

use crate::packet::PacketError;
use bytes::{BufMut, BytesMut};

/// Zero-encode `src`, appending the result to `dst`
pub fn encode(src: &[u8], dst: &mut BytesMut) {
    let mut zeroes: u8 = 0;

    for &byte in src {
        if byte == 0 {
            zeroes += 1;
            if zeroes == u8::MAX {
                dst.put_u8(0);
                dst.put_u8(zeroes);
                zeroes = 0;
            }
        } else {
            if zeroes != 0 {
                dst.put_u8(0);
                dst.put_u8(zeroes);
                zeroes = 0;
            }
            dst.put_u8(byte);
        }
    }

    if zeroes != 0 {
        dst.put_u8(0);
        dst.put_u8(zeroes);
    }
}

/// Reverse [`encode`], appending the expanded bytes to `dst`
pub fn decode(src: &[u8], dst: &mut BytesMut) -> Result<(), PacketError> {
    let mut i = 0;
    while i < src.len() {
        if src[i] == 0 {
            let count = *src
                .get(i + 1)
                .ok_or(PacketError::TruncatedZeroRun { offset: i })?;
            dst.put_bytes(0, count as usize);
            i += 2;
        } else {
            dst.put_u8(src[i]);
            i += 1;
        }
    }
    Ok(())
}
