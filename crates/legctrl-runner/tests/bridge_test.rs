//! Integration tests for the TCP bridge and the TCP transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use legctrl_client::{event_channel, ClientConfig, DeviceId, LinkPhase, RemoteClient, SendOutcome};
use legctrl_protocol::{Command, ErrorCode, SystemState, Telemetry, TELEMETRY_FRAME_SIZE};
use legctrl_runner::{BridgeConfig, BridgeServer, BridgeState, TcpConfig, TcpEndpoint, TcpTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn local_config(name: &str) -> BridgeConfig {
    let mut config = BridgeConfig::new(0, name);
    config.bind = SocketAddr::from(([127, 0, 0, 1], 0));
    config
}

async fn start_bridge(name: &str) -> (SocketAddr, Arc<BridgeState>) {
    let server = BridgeServer::bind(local_config(name)).await.expect("bind");
    let addr = server.local_addr().expect("addr");
    let state = server.state();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, state)
}

async fn next_telemetry(stream: &mut TcpStream) -> Telemetry {
    let mut frame = [0u8; TELEMETRY_FRAME_SIZE];
    tokio::time::timeout(Duration::from_secs(1), stream.read_exact(&mut frame))
        .await
        .expect("telemetry within a second")
        .expect("read telemetry");
    Telemetry::decode(&frame).expect("valid telemetry")
}

async fn telemetry_until(stream: &mut TcpStream, mut condition: impl FnMut(&Telemetry) -> bool) -> Telemetry {
    for _ in 0..30 {
        let telemetry = next_telemetry(stream).await;
        if condition(&telemetry) {
            return telemetry;
        }
    }
    panic!("condition not reached within 30 telemetry frames");
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Bridge over raw TCP
// ============================================================================

#[tokio::test]
async fn test_bridge_streams_telemetry_and_accepts_commands() {
    let (addr, state) = start_bridge("Bench").await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let first = next_telemetry(&mut stream).await;
    assert_eq!(first.state, SystemState::Disarmed);
    assert_eq!(first.battery_mv, 7400);
    assert!(state.is_linked());

    // Two commands in one write are split back into frames
    let mut bytes = Command::Arm.encode();
    bytes.extend(Command::SetServoCh0 { pulse_us: 3000 }.encode());
    stream.write_all(&bytes).await.expect("write");

    telemetry_until(&mut stream, |t| t.state == SystemState::Armed).await;
    assert_eq!(state.firmware().servo_pulse_us(), Some(2500));
}

#[tokio::test]
async fn test_bridge_deadman_trips_without_commands() {
    let (addr, state) = start_bridge("Bench").await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    stream.write_all(&Command::Arm.encode()).await.expect("write");
    telemetry_until(&mut stream, |t| t.state == SystemState::Armed).await;

    let faulted = telemetry_until(&mut stream, |t| t.state == SystemState::Fault).await;
    assert_eq!(faulted.error_code, ErrorCode::DeadmanTimeout);
    assert_eq!(state.firmware().stats().deadman_trips, 1);
}

#[tokio::test]
async fn test_bridge_serves_one_link_at_a_time() {
    let (addr, state) = start_bridge("Bench").await;
    let mut first = TcpStream::connect(addr).await.expect("connect");
    next_telemetry(&mut first).await;

    let mut second = TcpStream::connect(addr).await.expect("connect");
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), second.read(&mut buf))
        .await
        .expect("refusal within a second")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(state.links_refused(), 1);

    // The first link is unaffected
    next_telemetry(&mut first).await;

    drop(first);
    assert!(wait_for(|| !state.is_linked()).await);
    assert!(!state.firmware().is_connected());
    assert_eq!(state.firmware().state(), SystemState::Fault);

    // The slot is free again
    let mut third = TcpStream::connect(addr).await.expect("connect");
    let telemetry = next_telemetry(&mut third).await;
    assert_eq!(telemetry.state, SystemState::Disarmed);
    assert_eq!(state.links_served(), 2);
}

#[tokio::test]
async fn test_bridge_rejects_malformed_frames() {
    let (addr, state) = start_bridge("Bench").await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    // Unknown opcode with a valid header
    stream.write_all(&[0x01, 0x7F, 0x00, 0x00]).await.expect("write");
    let telemetry = telemetry_until(&mut stream, |t| t.error_code == ErrorCode::InvalidCmd).await;
    assert_eq!(telemetry.state, SystemState::Disarmed);
    assert!(state.firmware().stats().commands == 0);
}

// ============================================================================
// Client over TcpTransport
// ============================================================================

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_client_drives_bridged_robot() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    let (addr, state) = runtime.block_on(start_bridge("Bench"));

    let (tx, rx) = event_channel();
    let config = TcpConfig {
        endpoints: vec![TcpEndpoint {
            address: addr.to_string(),
            name: Some("Bench".to_string()),
        }],
        ..TcpConfig::default()
    };
    let transport = Arc::new(TcpTransport::new(config, tx).expect("valid config"));
    let client = RemoteClient::new(ClientConfig::default(), transport.clone(), rx).expect("client starts");

    assert!(wait_until(|| client.adapter_state().is_ready()));
    client.start_scan().expect("scan starts");
    assert!(wait_until(|| client.find_device("Bench").is_some()));
    client.stop_scan();

    let device = DeviceId::new(addr.to_string());
    client.connect(&device).expect("catalogued");
    assert!(wait_until(|| client.phase() == LinkPhase::Ready));

    assert_eq!(client.arm(), SendOutcome::Sent);
    client
        .start_periodic(Command::SetServoCh0 { pulse_us: 1600 })
        .expect("scheduler starts");
    thread::sleep(Duration::from_millis(500));

    let firmware = state.firmware();
    assert_eq!(firmware.state(), SystemState::Armed);
    assert_eq!(firmware.servo_pulse_us(), Some(1600));
    assert!(wait_until(|| client.telemetry().map(|t| t.state) == Some(SystemState::Armed)));

    client.stop_periodic();
    client.disconnect();
    assert!(wait_until(|| client.phase() == LinkPhase::Idle));
    assert!(wait_until(|| !state.is_linked()));
    assert!(!transport.is_linked(&device));
}

#[test]
fn test_client_sees_bridge_going_away() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    let (addr, _state) = runtime.block_on(start_bridge("Bench"));

    let (tx, rx) = event_channel();
    let config = TcpConfig {
        endpoints: vec![TcpEndpoint {
            address: addr.to_string(),
            name: Some("Bench".to_string()),
        }],
        ..TcpConfig::default()
    };
    let transport = Arc::new(TcpTransport::new(config, tx).expect("valid config"));
    let client = RemoteClient::new(ClientConfig::default(), transport, rx).expect("client starts");

    assert!(wait_until(|| client.adapter_state().is_ready()));
    client.start_scan().expect("scan starts");
    assert!(wait_until(|| !client.devices().is_empty()));
    client.connect(&DeviceId::new(addr.to_string())).expect("catalogued");
    assert!(wait_until(|| client.phase() == LinkPhase::Ready));
    client.start_periodic(Command::Ping).expect("scheduler starts");

    // Dropping the runtime closes the bridge and its link
    runtime.shutdown_timeout(Duration::from_secs(1));

    assert!(wait_until(|| client.phase() == LinkPhase::Disconnected));
    assert!(!client.is_periodic_running());
    assert!(client.last_error().is_some());
}
