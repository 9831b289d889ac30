//! Request/response exchanges over an in-memory link.

mod common;

use std::time::Duration;

use common::{default_pid_reply, link, pid_reply, spawn_controller};
use laser_tune::protocol::composer::SetPidRequest;
use laser_tune::protocol::registry::ids;
use laser_tune::protocol::reply::PidParameterSet;
use laser_tune::{ErrorKind, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

const SHORT: Duration = Duration::from_millis(150);

#[tokio::test]
async fn get_pid_skips_interleaved_telemetry() {
    let (mut host, mut link) = link();
    let traffic = format!(
        "DATA t=0.1 y=0.2 u=0.3 status=OK\r\npower=1.0 period=10 width=5\n*00\r\n{}",
        default_pid_reply()
    );
    host.write_all(traffic.as_bytes()).await.unwrap();

    let values = link.get_pid_values(Duration::from_secs(1)).await.unwrap();
    assert_eq!(
        values.to_array(),
        [0.5, 0.2, 0.01, 0.15, 0.14, 0.05, 400.0, 100.0]
    );

    let mut sent = vec![0u8; 16];
    let n = host.read(&mut sent).await.unwrap();
    assert_eq!(&sent[..n], b"$B600\r\n");
}

#[tokio::test]
async fn get_pid_without_any_line_times_out() {
    let (_host, mut link) = link();
    let err = link.get_pid_values(SHORT).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn get_pid_surfaces_last_parse_error() {
    let (mut host, mut link) = link();
    let mut corrupted = pid_reply(" 1 2 3 4 5 6 7 8").into_bytes();
    corrupted[4] ^= 0x02;
    host.write_all(&corrupted).await.unwrap();

    let err = link.get_pid_values(SHORT).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Checksum);
}

#[tokio::test]
async fn telemetry_flood_does_not_extend_deadline() {
    let (mut host, mut link) = link();
    let flood = tokio::spawn(async move {
        for _ in 0..200 {
            if host
                .write_all(b"DATA t=0 y=0 u=0 status=OK\n")
                .await
                .is_err()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let started = Instant::now();
    let err = link.get_pid_values(SHORT).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(elapsed >= SHORT);
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);

    drop(link);
    flood.await.unwrap();
}

#[tokio::test]
async fn ack_wait_ignores_telemetry_and_accepts_success() {
    let (mut host, mut link) = link();
    host.write_all(b"DATA t=0 y=0 u=0 status=OK\n*00\r\n")
        .await
        .unwrap();

    let ack = link
        .write_command_expect_ok_ack("", ids::RUN, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(ack, "*00");
}

#[tokio::test]
async fn ack_wait_fails_fast_on_rejection() {
    let (mut host, mut link) = link();
    host.write_all(b"*05\r\n*00\r\n").await.unwrap();

    let started = Instant::now();
    let err = link
        .write_command_expect_ok_ack("1", ids::SHUTTER_CONTROL, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        ProtocolError::CommandRejected { code } => assert_eq!(code, "05"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!ProtocolError::CommandRejected { code: "05".into() }.is_retryable());
}

#[tokio::test]
async fn ack_wait_times_out_without_ack() {
    let (mut host, mut link) = link();
    host.write_all(b"OK DONE\n").await.unwrap();

    let err = link
        .write_command_expect_ok_ack("", ids::TRIGGER, SHORT)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("TRIGGER"));
}

#[tokio::test]
async fn set_pid_with_snapshot_sends_one_frame_and_returns_ack() {
    let (mut host, mut link) = link();
    host.write_all(b"*00\r\n").await.unwrap();

    let current = PidParameterSet::from_array([0.0, 0.0, 0.0, 0.3, 0.4, 0.06, 250.0, 100.0]);
    let ack = link
        .set_pid_values(
            &SetPidRequest::pulse_width(0.5, 0.25, 0.01),
            Some(current),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(ack, "*00");

    let mut sent = vec![0u8; 128];
    let n = host.read(&mut sent).await.unwrap();
    let frame = String::from_utf8_lossy(&sent[..n]).to_string();
    assert!(frame.starts_with("$B5  0.5000  0.2500  0.0100  0.3000  0.4000  0.0600  250.00  100.00"));
    assert!(frame.ends_with("\r\n"));
}

#[tokio::test]
async fn set_pid_reads_current_values_first() {
    let (host, mut link) = link();
    let controller = spawn_controller(host, |frame| {
        if frame.starts_with("$B6") {
            vec![default_pid_reply()]
        } else if frame.starts_with("$B5") {
            vec!["*00\r\n".to_string()]
        } else {
            Vec::new()
        }
    });

    let ack = link
        .set_pid_values(
            &SetPidRequest::pulse_width(0.9, 0.1, 0.0),
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(ack, "*00");

    drop(link);
    let frames = controller.await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], "$B600");
    // pp gains, holdoff and interval come from the device, not the fallbacks.
    assert!(frames[1].contains("  0.1500  0.1400  0.0500  400.00  100.00"));
}

#[tokio::test]
async fn set_pid_falls_back_when_device_is_silent() {
    let (host, mut link) = link();
    let controller = spawn_controller(host, |frame| {
        if frame.starts_with("$B5") {
            vec!["*00\r\n".to_string()]
        } else {
            Vec::new()
        }
    });

    let ack = link
        .set_pid_values(&SetPidRequest::pulse_width(0.9, 0.1, 0.0), None, SHORT)
        .await
        .unwrap();
    assert_eq!(ack, "*00");

    drop(link);
    let frames = controller.await.unwrap();
    assert!(frames[1].contains("  0.1500  0.1400  0.0500  400.00  300.00"));
}

#[tokio::test]
async fn extended_command_ids_travel_in_the_payload() {
    let (mut host, mut link) = link();
    link.write_command("1234AB", "FF").await.unwrap();

    let mut sent = vec![0u8; 32];
    let n = host.read(&mut sent).await.unwrap();
    let frame = String::from_utf8(sent[..n].to_vec()).unwrap();

    let (id, accumulated) = laser_tune::protocol::parse_reply(&frame).unwrap();
    assert_eq!(id, 0x1234);
    assert_eq!(accumulated, "1234AB");
}
