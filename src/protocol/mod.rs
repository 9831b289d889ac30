//! Laser controller wire protocol.
//!
//! Pure, I/O-free building blocks used by the link transport:
//!
//! - [`checksum`]: the swappable [`ChecksumAlgorithm`] strategy and its provisional
//!   additive implementation.
//! - [`frame`]: `$<ID><payload><CS>\r\n` framing, including `FF` extended ids.
//! - [`registry`]: command ids and the id-to-name [`CommandRegistry`].
//! - [`reply`]: GET_PID reply and `*<code>` ack decoding.
//! - [`telemetry`]: format-tolerant telemetry decoding across three encodings.
//! - [`composer`]: SET_PID composition and the fixed-width value format.

pub mod checksum;
pub mod composer;
pub mod frame;
pub mod registry;
pub mod reply;
pub mod telemetry;

pub use checksum::{AdditiveChecksum, ChecksumAlgorithm};
pub use composer::{compose_set_pid_command, format_pid_value, SetPidRequest};
pub use frame::{compose_frame, is_framed_command, parse_reply};
pub use registry::{ids, CommandRegistry};
pub use reply::{parse_ack, parse_pid_reply, Ack, PidParameterSet};
pub use telemetry::{parse_telemetry_line, PowerEncoding, PowerPacket, TelemetryRecord};
