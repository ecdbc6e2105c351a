/* Alignment */

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Round an object size up to the given alignment. The alignment must be a power of two.
pub const fn object_size_align_up(bytes: usize, align: usize) -> usize {
    raw_align_up(bytes, align)
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;

    #[test]
    fn test_raw_align() {
        assert_eq!(raw_align_up(0x13, 8), 0x18);
        assert_eq!(raw_align_up(0x18, 8), 0x18);
        assert!(raw_is_aligned(0x40, 0x20));
        assert!(!raw_is_aligned(0x44, 0x8));
    }

    #[test]
    fn test_object_size_align() {
        assert_eq!(object_size_align_up(40, 8), 40);
        assert_eq!(object_size_align_up(41, 8), 48);
        assert_eq!(object_size_align_up(40, 16), 48);
    }
}
