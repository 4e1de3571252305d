//! Bridge Server Module
//!
//! Serves one simulated robot over TCP so that [`TcpTransport`] clients, in
//! this process or another, can drive it. The TCP connection plays the role
//! of the radio link: accepting it connects the firmware, closing it
//! disconnects the firmware. Only one link is served at a time.
//!
//! [`TcpTransport`]: crate::TcpTransport

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use legctrl_protocol::FrameCodec;
use legctrl_sim::{RobotFirmware, DEFAULT_BATTERY_MV};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

// ============================================================================
// Types
// ============================================================================

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// Name the robot goes by in logs and the startup banner.
    pub name: String,
    /// Interval between telemetry frames.
    pub telemetry_period: Duration,
    /// Interval between firmware deadman checks.
    pub tick_period: Duration,
    /// Battery voltage the robot reports.
    pub battery_mv: u16,
}

impl BridgeConfig {
    /// Listen on all interfaces at `port`.
    pub fn new(port: u16, name: impl Into<String>) -> Self {
        BridgeConfig {
            bind: SocketAddr::from(([0, 0, 0, 0], port)),
            name: name.into(),
            telemetry_period: Duration::from_millis(100),
            tick_period: Duration::from_millis(10),
            battery_mv: DEFAULT_BATTERY_MV,
        }
    }
}

/// State shared between the listener, the active link and observers.
#[derive(Debug)]
pub struct BridgeState {
    name: String,
    epoch: Instant,
    firmware: Mutex<RobotFirmware>,
    linked: AtomicBool,
    links_served: AtomicU64,
    links_refused: AtomicU64,
}

impl BridgeState {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Robot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the robot's firmware.
    pub fn firmware(&self) -> RobotFirmware {
        self.firmware.lock().clone()
    }

    /// Whether a client link is active.
    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }

    /// Links accepted and served to completion or still active.
    pub fn links_served(&self) -> u64 {
        self.links_served.load(Ordering::Relaxed)
    }

    /// Connections closed because a link was already active.
    pub fn links_refused(&self) -> u64 {
        self.links_refused.load(Ordering::Relaxed)
    }
}

/// TCP front end for one simulated robot.
pub struct BridgeServer {
    listener: TcpListener,
    config: BridgeConfig,
    state: Arc<BridgeState>,
}

impl BridgeServer {
    /// Bind the listening socket.
    pub async fn bind(config: BridgeConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        let state = Arc::new(BridgeState {
            name: config.name.clone(),
            epoch: Instant::now(),
            firmware: Mutex::new(RobotFirmware::new(config.battery_mv)),
            linked: AtomicBool::new(false),
            links_served: AtomicU64::new(0),
            links_refused: AtomicU64::new(0),
        });
        Ok(BridgeServer {
            listener,
            config,
            state,
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for observing the robot while the server runs.
    pub fn state(&self) -> Arc<BridgeState> {
        self.state.clone()
    }

    /// Accept links until `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!("Bridge[{}]: shutting down", self.state.name);
                Ok(())
            }
        }
    }

    /// Accept links forever.
    pub async fn run(&self) -> io::Result<()> {
        info!(
            "Bridge[{}]: listening on {}",
            self.state.name,
            self.listener.local_addr()?
        );

        loop {
            let (stream, peer) = self.listener.accept().await?;

            if self
                .state
                .linked
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!("Bridge[{}]: refusing {}, a link is already active", self.state.name, peer);
                self.state.links_refused.fetch_add(1, Ordering::Relaxed);
                drop(stream);
                continue;
            }

            self.state.links_served.fetch_add(1, Ordering::Relaxed);
            let state = self.state.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                info!("Bridge[{}]: link from {}", state.name, peer);
                state.firmware.lock().on_connect();

                let result = serve_link(stream, &state, &config).await;

                state.firmware.lock().on_disconnect();
                state.linked.store(false, Ordering::Release);
                match result {
                    Ok(()) => info!("Bridge[{}]: link from {} closed", state.name, peer),
                    Err(e) => warn!("Bridge[{}]: link from {} failed: {}", state.name, peer, e),
                }
            });
        }
    }
}

/// Drive one link until the peer goes away.
async fn serve_link(mut stream: TcpStream, state: &BridgeState, config: &BridgeConfig) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.split();
    let mut codec = FrameCodec::new();
    let mut read_buf = [0u8; 256];

    // There is no subscription step over TCP; telemetry flows from the start
    state.firmware.lock().set_notifications(true);

    let mut telemetry = tokio::time::interval(config.telemetry_period);
    let mut deadman = tokio::time::interval(config.tick_period);

    loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(());
                }
                codec.push(&read_buf[..n]);
                while let Some(frame) = codec.decode() {
                    let now = state.now_ms();
                    if let Err(e) = state.firmware.lock().write(now, &frame) {
                        debug!("Bridge[{}]: {}", state.name, e);
                    }
                }
            }

            _ = deadman.tick() => {
                let now = state.now_ms();
                if state.firmware.lock().tick(now) {
                    info!("Bridge[{}]: deadman tripped", state.name);
                }
            }

            _ = telemetry.tick() => {
                let frame = state.firmware.lock().notification(state.now_ms());
                if let Some(frame) = frame {
                    writer.write_all(&frame).await?;
                    writer.flush().await?;
                }
            }
        }
    }
}

/// Print the robot banner to stderr.
pub fn print_banner(name: &str, addr: SocketAddr) {
    let width = 36;
    eprintln!();
    eprintln!("┌{}┐", "─".repeat(width));
    eprintln!("│ {:<w$} │", format!("Robot:   {}", name), w = width - 2);
    eprintln!("│ {:<w$} │", format!("Address: {}", addr), w = width - 2);
    eprintln!("└{}┘", "─".repeat(width));
    eprintln!();
}
