//! Resource limits and wire-format constants.
//!
//! Parsers and decoders bound every allocation by these limits so that
//! untrusted input cannot exhaust memory or the stack.

/// Magic bytes of an uncompressed compact (SDO) buffer.
pub const MAGIC_COMPACT: &[u8; 4] = b"CDOS";

/// Magic bytes of a zstd-compressed compact buffer.
pub const MAGIC_COMPACT_COMPRESSED: &[u8; 4] = b"CDOZ";

/// Magic bytes of a bit-packed (Preon) buffer.
pub const MAGIC_PREON: &[u8; 4] = b"CDOP";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;

/// Length of the schema fingerprint stored in binary headers.
pub const FINGERPRINT_LEN: usize = 8;

/// Maximum nesting depth of complex objects.
pub const MAX_DEPTH: usize = 64;

/// Maximum length of a text value, in bytes.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Maximum length of a binary value, in bytes.
pub const MAX_BYTES_LEN: usize = 16 * 1024 * 1024;

/// Maximum number of occurrences of a repeated field.
pub const MAX_REPEAT: usize = 1_000_000;

/// Maximum size of an (uncompressed) binary buffer.
pub const MAX_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Maximum length of an XML name or JSON key, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// Maximum varint length for 64-bit values.
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum absolute decimal exponent.
pub const MAX_DECIMAL_SCALE: i32 = 4096;
