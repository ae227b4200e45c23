pub const SIZE: usize = 4;

/// CRC-32 (IEEE) over `data`.
pub fn compute(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        // Standard CRC-32 check input
        assert_eq!(compute(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute(&[]), 0);
        assert_eq!(SIZE, std::mem::size_of::<u32>());
    }
}
