//! Line framing against a fake instrument on a local socket.

use hioki_daq::error::DaqError;
use hioki_daq::session::{DeviceSession, Reply};
use hioki_daq::transport::{TcpTransport, Transport, MAX_RESPONSE_BYTES};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

async fn connect_pair() -> (TcpTransport, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (transport, accepted) = tokio::join!(
        TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)),
        listener.accept()
    );
    (transport.unwrap(), accepted.unwrap().0)
}

#[tokio::test]
async fn test_trailing_bytes_stay_pending() {
    let (mut transport, mut peer) = connect_pair().await;
    peer.write_all(b"A\r\nB").await.unwrap();

    let first = transport.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first, "A");

    peer.write_all(b"\n").await.unwrap();
    let second = transport.receive(Duration::from_secs(1)).await.unwrap();
    assert_eq!(second, "B");
}

#[tokio::test]
async fn test_timeout_is_measured_from_call_start() {
    let (mut transport, mut peer) = connect_pair().await;

    // Trickle bytes that never complete a line.
    let trickle = tokio::spawn(async move {
        for _ in 0..20 {
            if peer.write_all(b"x").await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let started = Instant::now();
    let result = transport.receive(Duration::from_secs(1)).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(DaqError::ResponseTimeout(_))));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed <= Duration::from_millis(1200), "took {elapsed:?}");
    trickle.abort();
}

#[tokio::test]
async fn test_oversized_response_is_rejected() {
    let (mut transport, mut peer) = connect_pair().await;
    let writer = tokio::spawn(async move {
        let chunk = vec![b'9'; 64 * 1024];
        let mut written = 0;
        while written <= MAX_RESPONSE_BYTES {
            if peer.write_all(&chunk).await.is_err() {
                break;
            }
            written += chunk.len();
        }
    });

    let result = transport.receive(Duration::from_secs(5)).await;
    assert!(matches!(result, Err(DaqError::ResponseTooLarge { .. })));
    writer.abort();
}

#[tokio::test]
async fn test_peer_close_is_link_lost() {
    let (mut transport, peer) = connect_pair().await;
    drop(peer);
    let result = transport.receive(Duration::from_secs(1)).await;
    assert!(matches!(result, Err(DaqError::LinkLost(_))));
}

#[tokio::test]
async fn test_session_round_trip_against_fake_meter() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Answers each `:READ?` fragment of a compound line with one value.
    let meter = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            received.push(line.clone());
            if line.contains('?') {
                write.write_all(b"+1.23456E+00\r\n").await.unwrap();
            }
        }
        received
    });

    let transport = assert_ok!(TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).await);
    let mut session = DeviceSession::new(transport);

    hioki_daq::command::catalog::MEASURE.speed.set(session.batch(), "FAST");
    assert_eq!(assert_ok!(session.flush().await), Reply::Ack);

    hioki_daq::command::catalog::MEASURE.read.get(session.batch());
    assert_eq!(assert_ok!(session.flush_for_line().await), "+1.23456E+00");

    assert_ok!(session.close().await);
    hioki_daq::command::catalog::MEASURE.read.get(session.batch());
    let after_close = assert_err!(session.flush().await);
    assert!(matches!(after_close, DaqError::NotConnected));
    assert_eq!(session.pending().len(), 1);

    let received = meter.await.unwrap();
    assert_eq!(received, [":SENSe:VOLTage:DC:NPLCycles FAST", ":READ?"]);
}

#[tokio::test]
async fn test_closed_transport_reports_not_connected() {
    let (mut transport, _peer) = connect_pair().await;
    assert_ok!(transport.close().await);
    assert!(matches!(
        transport.send_and_receive("*IDN?", true).await,
        Err(DaqError::NotConnected)
    ));
}
