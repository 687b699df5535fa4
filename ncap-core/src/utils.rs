//! Small shared helpers.

use md5::{Digest, Md5};

/// Serialize a nanosecond timestamp the way audit records carry it.
pub fn time_to_string(nanos: i64) -> String {
    nanos.to_string()
}

/// Inverse of [`time_to_string`]; malformed input yields 0.
pub fn string_to_time(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

/// Lowercase hex MD5 digest, used for connection UIDs and JA3S.
pub fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    let mut out = String::with_capacity(32);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_string_roundtrip() {
        assert_eq!(time_to_string(1_600_000_000_000_000_123), "1600000000000000123");
        assert_eq!(string_to_time("1600000000000000123"), 1_600_000_000_000_000_123);
        assert_eq!(string_to_time("garbage"), 0);
    }

    #[test]
    fn test_md5_hex() {
        // RFC 1321 test vector.
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
