//! Frame checksum strategies.
//!
//! The controller appends a 2-hex-digit checksum to every frame. The algorithm below is
//! provisional: it is the additive sum observed on the wire so far, and it is kept behind
//! the [`ChecksumAlgorithm`] trait so the real firmware algorithm can be dropped in without
//! touching the codec.

/// Computes the 2-hex-digit checksum for a frame.
///
/// `frame_without_checksum` is the complete `$<ID><payload>` byte string, before the
/// checksum and the CRLF terminator are appended. Implementations decide which span they
/// cover. The returned string must be exactly two hex digits; the codec rejects anything
/// else.
pub trait ChecksumAlgorithm: Send + Sync {
    /// Compute the checksum text for a frame.
    fn compute(&self, frame_without_checksum: &[u8]) -> String;
}

/// Provisional additive checksum.
///
/// Sums every byte after the `$` and the 2-character command id, modulo 256, rendered as
/// two uppercase hex digits. Frames shorter than three bytes checksum to `00`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveChecksum;

impl ChecksumAlgorithm for AdditiveChecksum {
    fn compute(&self, frame_without_checksum: &[u8]) -> String {
        let data = frame_without_checksum.get(3..).unwrap_or_default();
        format!("{:02X}", sum_mod_256(data))
    }
}

impl<F> ChecksumAlgorithm for F
where
    F: Fn(&[u8]) -> String + Send + Sync,
{
    fn compute(&self, frame_without_checksum: &[u8]) -> String {
        self(frame_without_checksum)
    }
}

/// Sum of byte values modulo 256.
pub fn sum_mod_256(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Parse exactly two hex digits (either case).
pub(crate) fn parse_hex_byte(text: &str) -> Option<u8> {
    if text.len() != 2 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}
