//! # laser_tune
//!
//! Serial communication engine for pulsed laser controllers, plus the closed-loop PID
//! tuning tool built on top of it.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Pure wire-format code. Frame codec with swappable checksum and `FF`
//!   extended ids, GET_PID reply and ack decoding, multi-format telemetry decoding, and
//!   SET_PID composition.
//! - **`mapper`**: Converts decoded telemetry into engineering units.
//! - **`transport`**: `LineTransport`, the line reassembler and request/response layer with
//!   deadline-bounded waits.
//! - **`collector`**: Turns the live line stream into a `Trial` with a terminal outcome and
//!   safety-abort detection.
//! - **`trial`**, **`scoring`**, **`tuning`**: One trial against the controller, its score,
//!   and the ask/tell search loop that drives repeated trials.
//! - **`serial`**: Port abstraction and the tokio-serial opener (feature `serial`).
//! - **`config`**, **`logging`**: figment-based configuration and tracing setup for the
//!   binary.
//! - **`error`**: `ProtocolError`, shared by everything above.

pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod protocol;
pub mod scoring;
pub mod serial;
pub mod transport;
pub mod trial;
pub mod tuning;

pub use collector::{collect_trial, CollectOptions, Trial, TrialOutcome};
pub use error::{ErrorKind, ProtocolError, Result};
pub use mapper::{map_telemetry, MappedSample};
pub use transport::{LineTransport, LinkOptions};
