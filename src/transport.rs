//! Reliable line transport over the controller link.
//!
//! The controller speaks over a single ordered, half-duplex byte channel with no
//! transport-level framing. [`LineTransport`] owns that channel and:
//!
//! - reassembles arbitrary read chunks into `\n`-terminated lines, keeping leftover bytes
//!   in a receive buffer that persists across calls;
//! - bounds every wait with an absolute deadline computed once per operation, so
//!   unrelated traffic can never stretch the total wait;
//! - implements the request/response exchanges (GET_PID, SET_PID, ack-checked commands),
//!   discarding interleaved telemetry while it waits for the reply it wants.
//!
//! Exchanges take `&mut self`, so only one request is ever in flight on the link.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::checksum::{AdditiveChecksum, ChecksumAlgorithm};
use crate::protocol::composer::{compose_set_pid_command, SetPidRequest};
use crate::protocol::frame::{compose_frame, normalize_command_id};
use crate::protocol::registry::{ids, CommandRegistry};
use crate::protocol::reply::{parse_ack, parse_pid_reply, PidParameterSet};
use crate::serial::{DynSerial, SerialPortIO};

/// Largest single read from the port.
pub const READ_CHUNK: usize = 256;

/// Longest a single port read may block before the deadline is re-checked.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Pause after a read that returned nothing.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Where the receive buffer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing buffered.
    Idle,
    /// Bytes buffered, no complete line yet.
    Accumulating,
    /// At least one complete line buffered.
    LineReady,
}

/// Link behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Command id used by [`LineTransport::write_default_command`].
    pub default_command_id: String,
    /// Log received `DATA` telemetry lines (sampled by `data_log_every`).
    pub log_data_lines: bool,
    /// Log every Nth `DATA` line when `log_data_lines` is set.
    pub data_log_every: u64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            default_command_id: "00".to_string(),
            log_data_lines: false,
            data_log_every: 50,
        }
    }
}

/// Framed command writer and line reader for one controller link.
pub struct LineTransport<P = DynSerial> {
    port: P,
    rx: BytesMut,
    registry: CommandRegistry,
    checksum: Box<dyn ChecksumAlgorithm>,
    options: LinkOptions,
    data_seen: u64,
}

impl<P: SerialPortIO> LineTransport<P> {
    /// Wrap a port with the provisional checksum, the known command registry and default
    /// options.
    pub fn new(port: P) -> Self {
        Self {
            port,
            rx: BytesMut::with_capacity(READ_CHUNK * 4),
            registry: CommandRegistry::with_known_commands(),
            checksum: Box::new(AdditiveChecksum),
            options: LinkOptions::default(),
            data_seen: 0,
        }
    }

    /// Use a specific command registry for traffic labels.
    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use a specific checksum strategy for outbound frames.
    pub fn with_checksum(mut self, checksum: impl ChecksumAlgorithm + 'static) -> Self {
        self.checksum = Box::new(checksum);
        self
    }

    /// Set link options. The default command id is normalized to uppercase.
    pub fn with_options(mut self, mut options: LinkOptions) -> Self {
        options.default_command_id = options.default_command_id.trim().to_ascii_uppercase();
        options.data_log_every = options.data_log_every.max(1);
        self.options = options;
        self
    }

    /// Command registry in use.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Bytes received but not yet returned as a line.
    pub fn buffered_len(&self) -> usize {
        self.rx.len()
    }

    /// Current receive-buffer state.
    pub fn state(&self) -> LinkState {
        if self.rx.is_empty() {
            LinkState::Idle
        } else if self.rx.contains(&b'\n') {
            LinkState::LineReady
        } else {
            LinkState::Accumulating
        }
    }

    /// Release the port. Buffered bytes are dropped.
    pub fn into_inner(self) -> P {
        self.port
    }

    /// Frame `payload` under `command_id` and write it.
    #[instrument(skip(self), err)]
    pub async fn write_command(&mut self, payload: &str, command_id: &str) -> Result<()> {
        let id = normalize_command_id(command_id)?;
        let frame = compose_frame(&id, payload, self.checksum.as_ref())?;
        self.write_frame(&frame, &id).await
    }

    /// Frame `payload` under the configured default command id and write it.
    pub async fn write_default_command(&mut self, payload: &str) -> Result<()> {
        let id = self.options.default_command_id.clone();
        self.write_command(payload, &id).await
    }

    async fn write_frame(&mut self, frame: &[u8], command_id: &str) -> Result<()> {
        debug!(
            command = self.registry.name(command_id),
            frame = %String::from_utf8_lossy(frame).escape_debug(),
            "TX"
        );
        self.port.write_all(frame).await?;
        self.port.flush().await?;
        Ok(())
    }

    /// Read one line, without its CR/LF terminator.
    ///
    /// A line already buffered is returned even when `timeout` is zero. Non-ASCII bytes
    /// are dropped rather than failing the read. Fails with a timeout error if no full line
    /// arrives in time; buffered partial data is kept for the next call.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let raw = self.read_raw_line(timeout).await?;
        Ok(raw.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read one line, keeping its terminator (needed for frame validation).
    pub async fn read_raw_line(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProtocolError::timeout(format!(
                    "no complete line within {:?} ({} bytes buffered)",
                    timeout,
                    self.rx.len()
                )));
            }

            let window = (deadline - now).min(READ_POLL_INTERVAL);
            match tokio::time::timeout(window, self.port.read(&mut chunk)).await {
                Ok(Ok(0)) => idle(deadline).await,
                Ok(Ok(n)) => self.rx.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => idle(deadline).await,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {}
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.rx.iter().position(|&b| b == b'\n')?;
        let line: String = self.rx[..=end]
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| char::from(b))
            .collect();
        self.rx.advance(end + 1);
        self.log_rx(&line);
        Some(line)
    }

    fn log_rx(&mut self, raw: &str) {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.starts_with("DATA") {
            self.data_seen += 1;
            if self.options.log_data_lines && self.data_seen % self.options.data_log_every == 0 {
                debug!(line, "RX");
            }
        } else {
            debug!(line, "RX");
        }
    }

    /// Ask the controller for its PID parameters.
    ///
    /// Lines that are not a valid GET_PID reply (telemetry, other frames) are discarded.
    /// The deadline covers the whole exchange. If it runs out after at least one line
    /// failed to parse, that parse error is returned; with no lines at all the result is a
    /// timeout.
    #[instrument(skip(self), err)]
    pub async fn get_pid_values(&mut self, timeout: Duration) -> Result<PidParameterSet> {
        self.write_command("", ids::GET_PID).await?;
        let deadline = Instant::now() + timeout;
        let mut last_error: Option<ProtocolError> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let line = match self.read_raw_line(remaining).await {
                Ok(line) => line,
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            };
            match parse_pid_reply(&line) {
                Ok(values) => return Ok(values),
                Err(e) => {
                    debug!(error = %e, "discarding line while waiting for GET_PID reply");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProtocolError::timeout("waiting for GET_PID reply")))
    }

    /// Send a command and wait for a `*00` acknowledgement.
    ///
    /// Non-`*` lines are discarded. Any other ack code fails immediately with
    /// [`ProtocolError::CommandRejected`]. Returns the ack line.
    #[instrument(skip(self), err)]
    pub async fn write_command_expect_ok_ack(
        &mut self,
        payload: &str,
        command_id: &str,
        timeout: Duration,
    ) -> Result<String> {
        self.write_command(payload, command_id).await?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let line = match self.read_line(remaining).await {
                Ok(line) => line,
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            };
            if !line.trim_start().starts_with('*') {
                continue;
            }
            let ack = parse_ack(&line);
            if ack.success {
                return Ok(line);
            }
            return Err(ProtocolError::CommandRejected { code: ack.code });
        }

        Err(ProtocolError::timeout(format!(
            "waiting for success ack '*00' to command {}",
            self.registry.name(command_id)
        )))
    }

    /// Write all eight PID parameters and return the acknowledgement line verbatim.
    ///
    /// Without a `current` snapshot the device is queried first; if that fails the
    /// fallback constants fill the unspecified fields.
    #[instrument(skip(self), err)]
    pub async fn set_pid_values(
        &mut self,
        request: &SetPidRequest,
        current: Option<PidParameterSet>,
        timeout: Duration,
    ) -> Result<String> {
        let current = match current {
            Some(values) => Some(values),
            None => match self.get_pid_values(timeout).await {
                Ok(values) => Some(values),
                Err(e) => {
                    warn!(error = %e, "could not read current PID values, using fallbacks");
                    None
                }
            },
        };

        let frame = compose_set_pid_command(request, current.as_ref(), self.checksum.as_ref())?;
        self.write_frame(&frame, ids::SET_PID).await?;
        self.read_line(timeout).await
    }
}

async fn idle(deadline: Instant) {
    let pause = deadline
        .saturating_duration_since(Instant::now())
        .min(IDLE_BACKOFF);
    tokio::time::sleep(pause).await;
}
