//! Zero-suppression packet compression.
//!
//! The encoder walks the input in groups of up to eight bytes. Each group
//! emits one *mask byte* followed by the group's non-zero bytes in order; bit
//! `k` of the mask is set iff the k-th byte of the group is non-zero. Zero
//! bytes cost nothing beyond their mask bit, which suits the relay's
//! broadcast payloads where long runs of zeroed frame inputs are the norm.

use crate::error::CodecError;
use crate::MAX_PACKET_SIZE;

/// Compresses `input` with the 8-bit zero-suppression bitmask scheme.
///
/// Input must be at most [`MAX_PACKET_SIZE`] bytes. Fails with
/// [`CodecError::OutputOverflow`] if the encoded form would exceed that
/// ceiling (possible for inputs with almost no zero bytes).
pub fn compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    if input.len() > MAX_PACKET_SIZE {
        return Err(CodecError::OversizedInput);
    }

    let mut out = Vec::with_capacity(input.len() + input.len() / 8 + 1);

    for group in input.chunks(8) {
        // Reserve the mask slot, fill it once the group is scanned.
        let mask_pos = out.len();
        out.push(0u8);

        let mut mask = 0u8;
        for (bit, &v) in group.iter().enumerate() {
            if v != 0 {
                mask |= 1 << bit;
                out.push(v);
            }
        }
        out[mask_pos] = mask;

        if out.len() > MAX_PACKET_SIZE {
            return Err(CodecError::OutputOverflow);
        }
    }

    Ok(out)
}

/// Decompresses a buffer produced by [`compress`], writing exactly
/// `original_len` bytes.
///
/// If the compressed stream ends at a group boundary before `original_len`
/// bytes have been produced, the remainder is zero-filled. A mask bit that
/// promises a byte the buffer does not contain is a [`CodecError::Truncated`]
/// failure.
pub fn decompress(input: &[u8], original_len: usize) -> Result<Vec<u8>, CodecError> {
    if original_len > MAX_PACKET_SIZE {
        return Err(CodecError::OversizedInput);
    }

    let mut out = vec![0u8; original_len];
    let mut read_pos = 0;
    let mut write_pos = 0;

    while read_pos < input.len() && write_pos < original_len {
        let mask = input[read_pos];
        read_pos += 1;

        for bit in 0..8 {
            if write_pos >= original_len {
                break;
            }
            if mask & (1 << bit) != 0 {
                let Some(&v) = input.get(read_pos) else {
                    return Err(CodecError::Truncated);
                };
                out[write_pos] = v;
                read_pos += 1;
            }
            // Zero bits leave the pre-zeroed slot untouched.
            write_pos += 1;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_group_is_single_mask_byte() {
        let input = [0u8; 8];
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed, vec![0x00]);

        let decompressed = decompress(&compressed, 8).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn test_interleaved_zeros() {
        let input = [1u8, 0, 2, 0, 3, 0, 4, 0, 5];
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed, vec![0b0101_0101, 1, 2, 3, 4, 0b0000_0001, 5]);

        let decompressed = decompress(&compressed, 9).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn test_all_nonzero_group() {
        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed.len(), 9);
        assert_eq!(compressed[0], 0xFF);

        let decompressed = decompress(&compressed, 8).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(compress(&[]).unwrap(), Vec::<u8>::new());
        assert_eq!(decompress(&[], 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_mask_count_property() {
        // Output = ceil(n/8) mask bytes + one byte per non-zero input byte.
        let input: Vec<u8> = (0..200u16).map(|i| (i % 3) as u8).collect();
        let nonzero = input.iter().filter(|&&b| b != 0).count();
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed.len(), input.len().div_ceil(8) + nonzero);
    }

    #[test]
    fn test_round_trip_mixed_payload() {
        let input: Vec<u8> = (0..1000u16)
            .map(|i| if i % 7 == 0 { 0 } else { (i % 251) as u8 + 1 })
            .collect();
        let compressed = compress(&input).unwrap();
        let decompressed = decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn test_compress_rejects_oversized_input() {
        let input = vec![1u8; MAX_PACKET_SIZE + 1];
        assert_eq!(compress(&input), Err(CodecError::OversizedInput));
    }

    #[test]
    fn test_compress_overflow_on_dense_input() {
        // 1024 non-zero bytes need 128 mask bytes on top, over the ceiling.
        let input = vec![0xAB; MAX_PACKET_SIZE];
        assert_eq!(compress(&input), Err(CodecError::OutputOverflow));
    }

    #[test]
    fn test_decompress_rejects_oversized_length() {
        assert_eq!(
            decompress(&[0x00], MAX_PACKET_SIZE + 1),
            Err(CodecError::OversizedInput)
        );
    }

    #[test]
    fn test_decompress_truncated_data() {
        // Mask promises two bytes, buffer carries one.
        let compressed = [0b0000_0011u8, 42];
        assert_eq!(decompress(&compressed, 2), Err(CodecError::Truncated));
    }

    #[test]
    fn test_decompress_zero_fills_short_stream() {
        // One full group of data, caller expects twelve bytes back.
        let compressed = compress(&[9u8, 9, 9, 9, 9, 9, 9, 9]).unwrap();
        let decompressed = decompress(&compressed, 12).unwrap();
        assert_eq!(&decompressed[..8], &[9u8; 8]);
        assert_eq!(&decompressed[8..], &[0u8; 4]);
    }
}
