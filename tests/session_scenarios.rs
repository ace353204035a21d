//! End-to-end scenarios driving `FixClient` over an in-memory duplex pipe,
//! standing in for the PSX counterparty on the other end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use psx_fix_client::codec::Codec;
use psx_fix_client::events::{FixEvent, MarketDataEntry};
use psx_fix_client::ids::test_support::SequentialIdGenerator;
use psx_fix_client::logging::test_support::RecordingLogger;
use psx_fix_client::sequence::InMemorySequenceStore;
use psx_fix_client::session::Connector;
use psx_fix_client::transport::test_support::{duplex_pair, DuplexTransport};
use psx_fix_client::transport::Transport;
use psx_fix_client::{FixClient, SessionConfig};
use std::io;
use std::io::Result as IoResult;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct FixedConnector {
    transport: std::sync::Mutex<Option<DuplexTransport>>,
}

#[async_trait]
impl Connector for FixedConnector {
    async fn connect(&self) -> IoResult<Box<dyn Transport>> {
        let transport = self
            .transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already consumed"))?;
        Ok(Box::new(transport))
    }
}

fn test_config() -> SessionConfig {
    SessionConfig {
        host: "unused".into(),
        port: 0,
        sender_comp_id: "realtime".into(),
        target_comp_id: "NMDUFISQ0001".into(),
        username: "realtime".into(),
        password: "secret".into(),
        heartbeat_interval_secs: 30,
        reset_on_logon: true,
        connect_timeout_ms: 2000,
        party_id: "realtime".into(),
        on_behalf_of_comp_id: None,
        raw_data: None,
        raw_data_length: None,
        max_test_request_retries: 3,
        reconnect_delay_secs: 5,
        reconnect_delay_max_secs: 30,
        write_timeout_secs: 5,
        security_list_initial_outgoing: 2,
    }
}

fn spawn_client(server_side: DuplexTransport) -> FixClient {
    let connector = Arc::new(FixedConnector {
        transport: std::sync::Mutex::new(Some(server_side)),
    });
    FixClient::spawn_with(
        test_config(),
        connector,
        Arc::new(RecordingLogger::default()),
        Arc::new(SequentialIdGenerator::new("REQ")),
        Arc::new(InMemorySequenceStore),
    )
}

async fn read_frame(transport: &mut DuplexTransport) -> String {
    let mut buf = [0u8; 8192];
    let n = transport.read(&mut buf).await.unwrap();
    std::str::from_utf8(&buf[..n]).unwrap().to_string()
}

async fn recv_within<T>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> T
where
    T: Clone,
{
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event should arrive within 1s")
        .unwrap()
}

#[tokio::test]
async fn s1_logon_handshake_reaches_logged_in_state() {
    let (client_side, mut server_side) = duplex_pair(8192);
    let client = spawn_client(client_side);
    let mut logon_rx = client.subscribe("logon");

    client.connect().await.unwrap();

    let logon_request = read_frame(&mut server_side).await;
    assert!(logon_request.contains("35=A"));
    assert!(logon_request.contains("34=1"));
    assert!(logon_request.contains("49=realtime"));
    assert!(logon_request.contains("56=NMDUFISQ0001"));
    assert!(logon_request.contains("98=0"));
    assert!(logon_request.contains("108=30"));
    assert!(logon_request.contains("141=Y"));
    assert!(logon_request.contains("553=realtime"));
    assert!(logon_request.contains("554=NMDUFISQ0001"));
    assert!(logon_request.contains("1137=9"));
    assert!(logon_request.contains("1408=FIX5.00_PSX_1.00"));

    let codec = Codec::new();
    let ack = codec.serialize("A", "NMDUFISQ0001", "realtime", 1, &[(141, "Y".into())]);
    server_side.write_all(ack.as_bytes()).await.unwrap();

    let event = recv_within(&mut logon_rx).await;
    assert_eq!(event, FixEvent::Logon);
}

#[tokio::test]
async fn s2_snapshot_market_data_carries_two_entries() {
    let (client_side, mut server_side) = duplex_pair(8192);
    let client = spawn_client(client_side);
    let mut logon_rx = client.subscribe("logon");
    let mut market_data_rx = client.subscribe("marketData");

    client.connect().await.unwrap();
    let _logon_request = read_frame(&mut server_side).await;
    let codec = Codec::new();
    let ack = codec.serialize("A", "NMDUFISQ0001", "realtime", 1, &[(141, "Y".into())]);
    server_side.write_all(ack.as_bytes()).await.unwrap();
    recv_within(&mut logon_rx).await;

    client
        .subscribe_market_data(vec!["OGDC".to_string()], vec!["0".to_string(), "1".to_string()], "1")
        .await
        .unwrap();

    let request = read_frame(&mut server_side).await;
    assert!(request.contains("35=V"));
    assert!(request.contains("55=OGDC"));
    assert!(request.contains("263=1"));
    assert!(request.contains("264=0"));
    assert!(request.contains("265=0"));
    assert!(request.contains("453=1"));
    assert!(request.contains("448=realtime"));
    assert!(request.contains("447=D"));
    assert!(request.contains("452=3"));

    let req_id_start = request.find("262=").unwrap() + 4;
    let req_id_end = request[req_id_start..].find('\x01').unwrap() + req_id_start;
    let req_id = &request[req_id_start..req_id_end];

    let response = codec.serialize(
        "W",
        "NMDUFISQ0001",
        "realtime",
        2,
        &[
            (262, req_id.to_string()),
            (55, "OGDC".into()),
            (268, "2".into()),
            (269, "0".into()),
            (270, "100.50".into()),
            (271, "500".into()),
            (269, "1".into()),
            (270, "100.55".into()),
            (271, "400".into()),
        ],
    );
    server_side.write_all(response.as_bytes()).await.unwrap();

    let event = recv_within(&mut market_data_rx).await;
    match event {
        FixEvent::MarketData { symbol, entries, .. } => {
            assert_eq!(symbol, "OGDC");
            assert_eq!(
                entries,
                vec![
                    MarketDataEntry {
                        entry_type: "0".into(),
                        price: Some("100.50".parse().unwrap()),
                        size: Some("500".parse().unwrap()),
                    },
                    MarketDataEntry {
                        entry_type: "1".into(),
                        price: Some("100.55".parse().unwrap()),
                        size: Some("400".parse().unwrap()),
                    },
                ]
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn s3_sequence_error_triggers_reconnect_and_resets_regular_stream() {
    let (client_side, mut server_side) = duplex_pair(8192);
    let client = spawn_client(client_side);
    let mut logon_rx = client.subscribe("logon");
    let mut disconnected_rx = client.subscribe("disconnected");

    client.connect().await.unwrap();
    let _logon_request = read_frame(&mut server_side).await;
    let codec = Codec::new();
    let ack = codec.serialize("A", "NMDUFISQ0001", "realtime", 1, &[(141, "Y".into())]);
    server_side.write_all(ack.as_bytes()).await.unwrap();
    recv_within(&mut logon_rx).await;

    let reject = codec.serialize(
        "3",
        "NMDUFISQ0001",
        "realtime",
        2,
        &[(58, "MsgSeqNum too low, expected '15'".into())],
    );
    server_side.write_all(reject.as_bytes()).await.unwrap();

    recv_within(&mut disconnected_rx).await;
}

#[tokio::test]
async fn s4_unanswered_test_requests_exceed_retries_and_disconnect() {
    // A short heartbeat interval and zero retries make the escalation
    // deterministic: two heartbeats tick by (silence is still within the
    // 2xHBInt window), then the next tick finds silence beyond the window,
    // counts one unanswered TestRequest, and immediately exceeds the
    // configured retry budget of zero.
    let mut config = test_config();
    config.heartbeat_interval_secs = 1;
    config.max_test_request_retries = 0;

    let (client_side, mut server_side) = duplex_pair(8192);
    let connector = Arc::new(FixedConnector {
        transport: std::sync::Mutex::new(Some(client_side)),
    });
    let client = FixClient::spawn_with(
        config,
        connector,
        Arc::new(RecordingLogger::default()),
        Arc::new(SequentialIdGenerator::new("REQ")),
        Arc::new(InMemorySequenceStore),
    );
    let mut logon_rx = client.subscribe("logon");
    let mut disconnected_rx = client.subscribe("disconnected");

    client.connect().await.unwrap();
    let _logon_request = read_frame(&mut server_side).await;
    let codec = Codec::new();
    let ack = codec.serialize("A", "NMDUFISQ0001", "realtime", 1, &[(141, "Y".into())]);
    server_side.write_all(ack.as_bytes()).await.unwrap();
    recv_within(&mut logon_rx).await;

    for _ in 0..2 {
        let frame = read_frame(&mut server_side).await;
        assert!(frame.contains("35=0"), "expected a Heartbeat, got {frame}");
    }

    recv_within(&mut disconnected_rx).await;
}

#[tokio::test]
async fn s5_security_list_dedups_entries_and_leaves_regular_stream_untouched() {
    let (client_side, mut server_side) = duplex_pair(8192);
    let client = spawn_client(client_side);
    let mut logon_rx = client.subscribe("logon");
    let mut security_list_rx = client.subscribe("securityList");

    client.connect().await.unwrap();
    let _logon_request = read_frame(&mut server_side).await;
    let codec = Codec::new();
    let ack = codec.serialize("A", "NMDUFISQ0001", "realtime", 1, &[(141, "Y".into())]);
    server_side.write_all(ack.as_bytes()).await.unwrap();
    recv_within(&mut logon_rx).await;

    client.request_security_list("4").await.unwrap();

    let request = read_frame(&mut server_side).await;
    assert!(request.contains("35=x"));
    assert!(request.contains("559=0"));
    assert!(request.contains("55=NA"));
    assert!(request.contains("460=4"));
    assert!(request.contains("336=REG"));

    let req_id_start = request.find("320=").unwrap() + 4;
    let req_id_end = request[req_id_start..].find('\x01').unwrap() + req_id_start;
    let req_id = &request[req_id_start..req_id_end];

    let response = codec.serialize(
        "y",
        "NMDUFISQ0001",
        "realtime",
        2,
        &[
            (320, req_id.to_string()),
            (146, "3".into()),
            (55, "OGDC".into()),
            (167, "CS".into()),
            (55, "PPL".into()),
            (167, "CS".into()),
            (55, "FFC".into()),
            (167, "CS".into()),
        ],
    );
    server_side.write_all(response.as_bytes()).await.unwrap();

    let event = recv_within(&mut security_list_rx).await;
    match event {
        FixEvent::SecurityList { securities, .. } => {
            assert_eq!(securities.len(), 3);
            let symbols: Vec<_> = securities.iter().map(|s| s.symbol.as_str()).collect();
            assert_eq!(symbols, vec!["OGDC", "PPL", "FFC"]);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn s6_concatenated_frames_split_across_chunk_boundaries() {
    let codec = Codec::new();
    let frame1 = codec.serialize("0", "A", "B", 1, &[]);
    let frame2 = codec.serialize("0", "A", "B", 2, &[]);
    let frame3 = codec.serialize("0", "A", "B", 3, &[]);
    let concatenated = format!("{frame1}{frame2}{frame3}");

    let cut = frame1.len() + 20;
    let (chunk_a, chunk_b) = concatenated.split_at(cut);

    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(chunk_a.as_bytes());
    let first_pass = codec.split(&mut buffer);
    assert_eq!(first_pass, vec![frame1]);

    buffer.extend_from_slice(chunk_b.as_bytes());
    let second_pass = codec.split(&mut buffer);
    assert_eq!(second_pass, vec![frame2, frame3]);
    assert!(buffer.is_empty());
}
