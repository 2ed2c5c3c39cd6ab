//! Variable-length unsigned integers: standard 7-bit continuation,
//! low bytes first.

use std::io::{Read, Write};

use crate::error::{Result, SparseError};

pub fn write_varu64<W: Write>(out: &mut W, mut value: u64) -> Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.write_all(&[byte])?;
            return Ok(());
        }
        out.write_all(&[byte | 0x80])?;
    }
}

pub fn write_varu32<W: Write>(out: &mut W, value: u32) -> Result<()> {
    write_varu64(out, value as u64)
}

pub fn read_varu64<R: Read>(input: &mut R) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        input.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(SparseError::Corruption("varint longer than 64 bits".into()));
        }
        value |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

pub fn read_varu32<R: Read>(input: &mut R) -> Result<u32> {
    let value = read_varu64(input)?;
    u32::try_from(value)
        .map_err(|_| SparseError::Corruption(format!("varint {value} overflows u32")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_encodings() {
        let mut buf = Vec::new();
        write_varu64(&mut buf, 0).unwrap();
        write_varu64(&mut buf, 127).unwrap();
        write_varu64(&mut buf, 128).unwrap();
        assert_eq!(buf, vec![0x00, 0x7f, 0x80, 0x01]);
    }

    #[test]
    fn u32_overflow_is_corruption() {
        let mut buf = Vec::new();
        write_varu64(&mut buf, u64::from(u32::MAX) + 1).unwrap();
        assert!(read_varu32(&mut buf.as_slice()).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(value in any::<u64>()) {
            let mut buf = Vec::new();
            write_varu64(&mut buf, value).unwrap();
            prop_assert_eq!(read_varu64(&mut buf.as_slice()).unwrap(), value);
        }
    }
}
