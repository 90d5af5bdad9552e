//! Chunk layout: a file length in fixed-size pieces, the last one possibly shorter.

/// Default chunk length in bytes (1.5 MiB).
pub const DEFAULT_CHUNK_LENGTH: u64 = 1_572_864;

fn effective(chunk_len: u64) -> u64 {
    if chunk_len == 0 {
        DEFAULT_CHUNK_LENGTH
    } else {
        chunk_len
    }
}

/// Number of pieces a file of `total_len` splits into. A zero `chunk_len` uses the default.
pub fn piece_count(total_len: u64, chunk_len: u64) -> usize {
    total_len.div_ceil(effective(chunk_len)) as usize
}

/// Expected byte length of piece `index`, or None if the index is past the end.
pub fn span_len(total_len: u64, chunk_len: u64, index: u32) -> Option<u64> {
    let size = effective(chunk_len);
    let start = u64::from(index).checked_mul(size)?;
    if start >= total_len {
        return None;
    }
    Some((total_len - start).min(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_000_000;

    #[test]
    fn ten_mb_in_three_mb_chunks() {
        assert_eq!(piece_count(10 * MB, 3 * MB), 4);
        assert_eq!(span_len(10 * MB, 3 * MB, 0), Some(3 * MB));
        assert_eq!(span_len(10 * MB, 3 * MB, 3), Some(MB));
        assert_eq!(span_len(10 * MB, 3 * MB, 4), None);
    }

    #[test]
    fn exact_multiple() {
        assert_eq!(piece_count(90, 30), 3);
        assert_eq!(span_len(90, 30, 2), Some(30));
        assert_eq!(span_len(90, 30, 3), None);
    }

    #[test]
    fn zero_length() {
        assert_eq!(piece_count(0, 30), 0);
        assert_eq!(span_len(0, 30, 0), None);
    }

    #[test]
    fn zero_chunk_size_uses_default() {
        assert_eq!(piece_count(DEFAULT_CHUNK_LENGTH * 2, 0), 2);
        assert_eq!(piece_count(DEFAULT_CHUNK_LENGTH * 2 + 1, 0), 3);
        assert_eq!(span_len(DEFAULT_CHUNK_LENGTH * 2 + 1, 0, 2), Some(1));
    }

    #[test]
    fn huge_index_does_not_overflow() {
        assert_eq!(span_len(u64::MAX, u64::MAX, u32::MAX), None);
    }
}
