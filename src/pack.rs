use crate::{Error, Result};

/// Number of bytes needed to hold `count` codes of `bits` bits each.
pub fn packed_len(count: usize, bits: u8) -> usize {
    (count * usize::from(bits)).div_ceil(8)
}

/// Packs `bits`-wide codes into bytes, least significant bit first.
///
/// Only the low `bits` bits of each code are kept.
pub fn pack_bits(codes: &[u8], bits: u8) -> Vec<u8> {
    let mut packed = vec![0u8; packed_len(codes.len(), bits)];
    let mask = low_mask(bits);

    let mut bit = 0;
    for &code in codes {
        let value = u16::from(code & mask) << (bit % 8);
        let byte = bit / 8;

        packed[byte] |= value as u8;
        if value > 0xFF {
            packed[byte + 1] |= (value >> 8) as u8;
        }

        bit += usize::from(bits);
    }

    packed
}

/// Inverse of [`pack_bits`].
pub fn unpack_bits(packed: &[u8], bits: u8, count: usize) -> Result<Vec<u8>> {
    let expected = packed_len(count, bits);
    if packed.len() != expected {
        return Err(Error::invalid_format(format!(
            "expected {expected} packed bytes for {count} {bits}-bit codes, found {}",
            packed.len()
        )));
    }

    let mask = low_mask(bits);
    let mut codes = Vec::with_capacity(count);

    let mut bit = 0;
    for _ in 0..count {
        let byte = bit / 8;
        let mut window = u16::from(packed[byte]);
        if byte + 1 < packed.len() {
            window |= u16::from(packed[byte + 1]) << 8;
        }

        codes.push((window >> (bit % 8)) as u8 & mask);
        bit += usize::from(bits);
    }

    Ok(codes)
}

fn low_mask(bits: u8) -> u8 {
    if bits >= 8 {
        0xFF
    } else {
        (1u8 << bits) - 1
    }
}
