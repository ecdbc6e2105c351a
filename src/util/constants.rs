#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// The size of an object header. The header is a single word that holds either the
/// type descriptor pointer or the forwarding pointer.
pub const BYTES_IN_HEADER: usize = BYTES_IN_WORD;

/// The minimal object size in bytes: a header and nothing else.
pub const MIN_OBJECT_SIZE: usize = BYTES_IN_HEADER;
