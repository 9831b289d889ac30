//! Scripted controller for link-level tests.

#![allow(dead_code)]

use laser_tune::protocol::checksum::sum_mod_256;
use laser_tune::transport::LineTransport;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

/// GET_PID reply with a valid checksum over `data`.
pub fn pid_reply(data: &str) -> String {
    format!("$B6{}{:02X}\r\n", data, sum_mod_256(data.as_bytes()))
}

/// Reply matching the controller's default parameters (sample interval 100 ms).
pub fn default_pid_reply() -> String {
    pid_reply(" 0.5000 0.2000 0.0100 0.1500 0.1400 0.0500 400.00 100.00")
}

/// Link over an in-memory pipe, plus the controller end.
pub fn link() -> (DuplexStream, LineTransport<DuplexStream>) {
    let (host, device) = tokio::io::duplex(4096);
    (host, LineTransport::new(device))
}

/// Run a fake controller on `host`.
///
/// `respond` sees every frame the link writes (CR/LF stripped) and returns the lines to
/// send back. The task ends when the link is dropped and yields every frame it saw.
pub fn spawn_controller<F>(host: DuplexStream, mut respond: F) -> JoinHandle<Vec<String>>
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(host);
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            let frame = line.trim_end_matches('\r').to_string();
            for reply in respond(&frame) {
                if write.write_all(reply.as_bytes()).await.is_err() {
                    return seen;
                }
            }
            seen.push(frame);
        }
        seen
    })
}
