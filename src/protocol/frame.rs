//! Frame codec for the controller's ASCII framing.
//!
//! Wire shape:
//!
//! ```text
//! $<ID:2 hex><payload><CS:2 hex>\r\n
//! ```
//!
//! An outer id of `FF` marks an extended frame: the first four payload characters are a
//! 16-bit command id, and the checksum covers that id followed by the rest of the payload.
//!
//! Everything here is pure: no I/O, no state.

use super::checksum::{parse_hex_byte, sum_mod_256, ChecksumAlgorithm};
use crate::error::{ProtocolError, Result};

/// Outer command id that announces a 4-hex extended command id.
pub const EXTENDED_COMMAND_ID: &str = "FF";

/// Minimum frame length once CRLF is stripped (`$` + id + checksum).
const MIN_FRAME_LEN: usize = 5;

/// Minimum extended frame length once CRLF is stripped.
const MIN_EXTENDED_FRAME_LEN: usize = 10;

/// Returns true for strings shaped like `$...\r\n` with no CR/LF before the terminator.
///
/// Cheap pre-filter; does not validate ids or checksums.
pub fn is_framed_command(packet: &str) -> bool {
    match packet.strip_suffix("\r\n") {
        Some(body) => body.starts_with('$') && !body.contains(['\r', '\n']),
        None => false,
    }
}

/// Normalize a 2-hex command id to uppercase, rejecting anything else.
pub fn normalize_command_id(command_id: &str) -> Result<String> {
    let id = command_id.trim().to_ascii_uppercase();
    if parse_hex_byte(&id).is_none() {
        return Err(ProtocolError::format(format!(
            "command id must be exactly 2 hex digits, got '{}'",
            command_id
        )));
    }
    Ok(id)
}

/// Compose a command frame.
///
/// A leading `$` and any CR/LF are stripped from `payload`, and non-ASCII characters are
/// dropped. The checksum strategy receives `$<ID><payload>` and must return two hex
/// digits.
pub fn compose_frame(
    command_id: &str,
    payload: &str,
    checksum: &dyn ChecksumAlgorithm,
) -> Result<Vec<u8>> {
    let id = normalize_command_id(command_id)?;

    let payload = payload.strip_prefix('$').unwrap_or(payload);
    let payload: String = payload
        .chars()
        .filter(|c| c.is_ascii() && *c != '\r' && *c != '\n')
        .collect();

    let mut frame = Vec::with_capacity(1 + id.len() + payload.len() + 4);
    frame.push(b'$');
    frame.extend_from_slice(id.as_bytes());
    frame.extend_from_slice(payload.as_bytes());

    let cs = checksum.compute(&frame).trim().to_ascii_uppercase();
    if parse_hex_byte(&cs).is_none() {
        return Err(ProtocolError::format(format!(
            "checksum must be exactly 2 hex digits, got '{}'",
            cs
        )));
    }

    frame.extend_from_slice(cs.as_bytes());
    frame.extend_from_slice(b"\r\n");
    Ok(frame)
}

/// Parse and validate a reply frame.
///
/// Returns the command id (16-bit for extended frames) and the accumulated buffer the
/// checksum covers: the payload alone, or the 4-hex extended id followed by the payload.
pub fn parse_reply(packet: &str) -> Result<(u16, String)> {
    if !is_framed_command(packet) {
        return Err(ProtocolError::format(
            "expected frame starting with '$' and ending with CRLF",
        ));
    }
    if !packet.is_ascii() {
        return Err(ProtocolError::format("frame contains non-ASCII bytes"));
    }

    let pkt = &packet[..packet.len() - 2];
    if pkt.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::format(format!(
            "frame too short ({} bytes)",
            pkt.len()
        )));
    }

    let id_text = &pkt[1..3];
    let checksum_text = &pkt[pkt.len() - 2..];

    let (command_id, accumulated) = if id_text == EXTENDED_COMMAND_ID {
        if pkt.len() < MIN_EXTENDED_FRAME_LEN {
            return Err(ProtocolError::format("extended frame too short"));
        }
        let ext = &pkt[3..7];
        if !ext.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::format(format!(
                "invalid extended command id '{}'",
                ext
            )));
        }
        let id = u16::from_str_radix(ext, 16)
            .map_err(|_| ProtocolError::format(format!("invalid extended command id '{}'", ext)))?;
        (id, format!("{}{}", ext, &pkt[7..pkt.len() - 2]))
    } else {
        let id = parse_hex_byte(id_text)
            .ok_or_else(|| ProtocolError::format(format!("invalid command id '{}'", id_text)))?;
        (u16::from(id), pkt[3..pkt.len() - 2].to_string())
    };

    let received = parse_hex_byte(checksum_text).ok_or_else(|| {
        ProtocolError::format(format!("invalid checksum format '{}'", checksum_text))
    })?;
    let calculated = sum_mod_256(accumulated.as_bytes());
    if calculated != received {
        return Err(ProtocolError::Checksum {
            calculated,
            received,
        });
    }

    Ok((command_id, accumulated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::checksum::AdditiveChecksum;

    fn compose(id: &str, payload: &str) -> String {
        let bytes = compose_frame(id, payload, &AdditiveChecksum).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn composes_frame_with_checksum_and_crlf() {
        assert_eq!(compose("10", "ABC"), "$10ABCC6\r\n");
        assert_eq!(compose("b6", ""), "$B600\r\n");
    }

    #[test]
    fn compose_strips_leading_dollar_and_line_breaks() {
        assert_eq!(compose("10", "$AB\r\nC"), "$10ABCC6\r\n");
    }

    #[test]
    fn compose_rejects_bad_command_ids() {
        for bad in ["1", "123", "G1", ""] {
            let err = compose_frame(bad, "x", &AdditiveChecksum).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format, "id {:?}", bad);
        }
    }

    #[test]
    fn compose_rejects_bad_checksum_output() {
        let bad = |_: &[u8]| "XYZ".to_string();
        let err = compose_frame("10", "x", &bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn compose_normalizes_checksum_case() {
        let lower = |_: &[u8]| "ab".to_string();
        let frame = compose_frame("10", "", &lower).unwrap();
        assert_eq!(frame, b"$10AB\r\n");
    }

    #[test]
    fn parse_round_trips_composed_frames() {
        for (id, payload) in [("10", "ABC"), ("6A", ""), ("B5", "  0.1500  2.0000"), ("00", "x=1 y=2")] {
            let frame = compose(id, payload);
            let (cmd, acc) = parse_reply(&frame).unwrap();
            assert_eq!(cmd, u16::from_str_radix(id, 16).unwrap());
            assert_eq!(acc, payload);
        }
    }

    #[test]
    fn parse_handles_extended_ids() {
        let frame = compose("FF", "1234DATA");
        let (cmd, acc) = parse_reply(&frame).unwrap();
        assert_eq!(cmd, 0x1234);
        assert!(acc.starts_with("1234"));
        assert_eq!(acc, "1234DATA");
    }

    #[test]
    fn parse_rejects_short_extended_frame() {
        let err = parse_reply("$FF12300\r\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn parse_detects_single_character_corruption() {
        let frame = compose("10", "HELLO");
        for i in 3..frame.len() - 4 {
            let mut bytes = frame.clone().into_bytes();
            bytes[i] ^= 0x01;
            let corrupted = String::from_utf8(bytes).unwrap();
            let err = parse_reply(&corrupted).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Checksum, "position {}", i);
        }
    }

    #[test]
    fn parse_rejects_unframed_and_malformed_input() {
        assert_eq!(parse_reply("$10ABCC6\n").unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(parse_reply("10ABCC6\r\n").unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(parse_reply("$10\r\n").unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(parse_reply("$ZZABCC6\r\n").unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(parse_reply("$10ABCQ6\r\n").unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn checksum_error_names_both_values() {
        let err = parse_reply("$10ABC00\r\n").unwrap_err();
        match err {
            ProtocolError::Checksum {
                calculated,
                received,
            } => {
                assert_eq!(calculated, 0xC6);
                assert_eq!(received, 0x00);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn recognizes_frame_shape() {
        assert!(is_framed_command("$B600\r\n"));
        assert!(is_framed_command("$\r\n"));
        assert!(!is_framed_command("$B600\n"));
        assert!(!is_framed_command("B600\r\n"));
        assert!(!is_framed_command("$B6\r00\r\n"));
        assert!(!is_framed_command("DATA t=1\r\n"));
    }
}
