//! Scenario execution for `legctrl run` and `legctrl scan`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use legctrl_client::{
    event_channel, DeviceDescriptor, EventReceiver, LinkPhase, RemoteClient, SendOutcome,
    StateUpdate, Transport,
};
use legctrl_protocol::Telemetry;
use legctrl_sim::SimTransport;
use tracing::{debug, info, warn};

use crate::config::{RunConfig, Step, TransportConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::tcp_transport::TcpTransport;

/// Granularity of interruptible waits.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long shutdown waits for a disconnect to complete.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Interrupt flag
// ============================================================================

/// Set from the Ctrl-C handler, polled by every wait.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early with an error if interrupted.
    pub fn sleep(&self, duration: Duration) -> RunnerResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return Err(RunnerError::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Poll `condition` until it holds, the timeout passes or an interrupt arrives.
    pub fn wait_until(
        &self,
        what: &'static str,
        timeout: Duration,
        mut condition: impl FnMut() -> bool,
    ) -> RunnerResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return Ok(());
            }
            if self.is_set() {
                return Err(RunnerError::Interrupted);
            }
            if Instant::now() >= deadline {
                return Err(RunnerError::Timeout {
                    what,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Build the transport a run configuration asks for.
pub fn build_transport(
    config: &TransportConfig,
) -> RunnerResult<(Arc<dyn Transport>, EventReceiver)> {
    let (events_tx, events_rx) = event_channel();
    let transport: Arc<dyn Transport> = match config {
        TransportConfig::Sim(sim) => Arc::new(SimTransport::new(sim.clone(), events_tx)?),
        TransportConfig::Tcp(tcp) => Arc::new(TcpTransport::new(tcp.clone(), events_tx)?),
    };
    Ok((transport, events_rx))
}

/// Create a client for `config`, wired to its transport.
pub fn build_client(config: &RunConfig) -> RunnerResult<RemoteClient> {
    let (transport, events) = build_transport(&config.transport)?;
    Ok(RemoteClient::new(config.client.clone(), transport, events)?)
}

// ============================================================================
// Output
// ============================================================================

/// Print phase changes, activity and telemetry status changes to stdout.
///
/// Runs until the client is dropped. Telemetry is printed when the robot's
/// state or error code changes; every frame is logged at debug level.
pub fn spawn_printer(updates: Receiver<StateUpdate>) -> RunnerResult<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("legctrl-printer".to_string())
        .spawn(move || {
            let mut last_status: Option<Telemetry> = None;
            for update in updates {
                match update {
                    StateUpdate::Phase(phase) => println!("phase: {}", phase),
                    StateUpdate::Log(entry) => println!("{}", entry),
                    StateUpdate::Telemetry(Some(telemetry)) => {
                        debug!("Runner: {}", telemetry);
                        let changed = last_status.map_or(true, |last| {
                            last.state != telemetry.state || last.error_code != telemetry.error_code
                        });
                        if changed {
                            println!("telemetry: {}", telemetry);
                        }
                        last_status = Some(telemetry);
                    }
                    StateUpdate::Telemetry(None) => last_status = None,
                    _ => {}
                }
            }
        })
        .map_err(RunnerError::Io)?;
    Ok(handle)
}

/// Print the device catalog.
pub fn print_devices(devices: &[DeviceDescriptor]) {
    if devices.is_empty() {
        println!("no devices found");
        return;
    }
    println!("{:<24} {}", "NAME", "ID");
    for device in devices {
        println!("{:<24} {}", device.display_name(), device.id);
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Scan for `duration` and return what was found.
pub fn scan(
    client: &RemoteClient,
    duration: Duration,
    interrupt: &Interrupt,
) -> RunnerResult<Vec<DeviceDescriptor>> {
    interrupt.wait_until("radio", Duration::from_secs(2), || {
        client.adapter_state().is_ready()
    })?;
    client.start_scan()?;
    let slept = interrupt.sleep(duration);
    client.stop_scan();
    slept?;
    Ok(client.devices())
}

/// Executes scenario steps against a client.
pub struct ScenarioRunner<'a> {
    client: &'a RemoteClient,
    default_device: Option<String>,
    interrupt: Interrupt,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(client: &'a RemoteClient, default_device: Option<String>, interrupt: Interrupt) -> Self {
        ScenarioRunner {
            client,
            default_device,
            interrupt,
        }
    }

    /// Run every step in order, stopping at the first error.
    pub fn run(&self, steps: &[Step]) -> RunnerResult<()> {
        for (index, step) in steps.iter().enumerate() {
            info!("Runner: step {} {:?}", index + 1, step);
            self.step(step)?;
        }
        Ok(())
    }

    fn step(&self, step: &Step) -> RunnerResult<()> {
        let client = self.client;
        match step {
            Step::Scan { duration_ms } => {
                let devices = scan(client, Duration::from_millis(*duration_ms), &self.interrupt)?;
                print_devices(&devices);
            }
            Step::Connect { device } => {
                let name = device
                    .as_deref()
                    .or(self.default_device.as_deref())
                    .ok_or_else(|| RunnerError::InvalidConfig("connect names no device".to_string()))?;
                let found = client
                    .find_device(name)
                    .ok_or_else(|| RunnerError::DeviceNotFound(name.to_string()))?;
                client.connect(&found.id)?;
            }
            Step::WaitReady { timeout_ms } => {
                self.interrupt.wait_until(
                    "session ready",
                    Duration::from_millis(*timeout_ms),
                    || matches!(client.phase(), LinkPhase::Ready | LinkPhase::Failed),
                )?;
                if client.phase() == LinkPhase::Failed {
                    let reason = client.last_error().unwrap_or_else(|| "unknown error".to_string());
                    return Err(RunnerError::ConnectFailed(reason));
                }
            }
            Step::Arm => report(client.arm()),
            Step::Disarm => report(client.disarm()),
            Step::Ping => report(client.ping()),
            Step::Servo { pulse_us } => report(client.set_servo_ch0(*pulse_us)),
            Step::StartPeriodic { pulse_us } => {
                client.start_periodic(Step::periodic_command(*pulse_us))?;
            }
            Step::UpdatePeriodic { pulse_us } => {
                client.update_periodic(Step::periodic_command(*pulse_us));
            }
            Step::StopPeriodic => client.stop_periodic(),
            Step::Wait { ms } => self.interrupt.sleep(Duration::from_millis(*ms))?,
            Step::Disconnect => {
                client.disconnect();
                self.interrupt.wait_until("disconnect", SHUTDOWN_TIMEOUT, || {
                    !client.phase().is_ready() && !client.phase().is_pending()
                })?;
            }
        }
        Ok(())
    }
}

fn report(outcome: SendOutcome) {
    if !outcome.is_sent() {
        warn!("Runner: command not sent, no ready session");
    }
}

/// Stop periodic sending and disconnect, waiting briefly for the link to close.
pub fn shutdown(client: &RemoteClient) {
    client.stop_periodic();
    if client.connected_device().is_none() && !client.phase().is_pending() {
        return;
    }

    client.disconnect();
    let closed = Interrupt::new().wait_until("disconnect", SHUTDOWN_TIMEOUT, || {
        matches!(client.phase(), LinkPhase::Idle | LinkPhase::Failed)
    });
    if closed.is_err() {
        warn!("Runner: link did not close within {:?}", SHUTDOWN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;

    #[test]
    fn test_interrupt_cuts_sleep_short() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        let started = Instant::now();
        let sleeper = thread::spawn(move || interrupt.sleep(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(30));
        trigger.trigger();
        let result = sleeper.join().expect("sleeper thread");

        assert!(matches!(result, Err(RunnerError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_until_times_out() {
        let result = Interrupt::new().wait_until("nothing", Duration::from_millis(30), || false);
        assert!(matches!(
            result,
            Err(RunnerError::Timeout { what: "nothing", timeout_ms: 30 })
        ));
    }

    #[test]
    fn test_scenario_against_sim() {
        let yaml = r#"
device: LegCtrl
steps:
  - step: scan
    duration_ms: 100
  - step: connect
  - step: wait_ready
    timeout_ms: 2000
  - step: arm
  - step: start_periodic
    pulse_us: 1500
  - step: update_periodic
    pulse_us: 1700
  - step: wait
    ms: 300
  - step: stop_periodic
  - step: disconnect
"#;
        let config = RunConfig::from_yaml(yaml).expect("valid scenario");
        let client = build_client(&config).expect("client starts");
        let runner = ScenarioRunner::new(&client, config.device.clone(), Interrupt::new());

        runner.run(&config.steps).expect("scenario completes");
        assert!(!client.is_periodic_running());
        assert!(matches!(client.phase(), LinkPhase::Idle | LinkPhase::Disconnected));
    }

    #[test]
    fn test_connect_to_missing_device() {
        let yaml = "steps:\n  - step: scan\n    duration_ms: 50\n  - step: connect\n    device: Nobody\n";
        let config = RunConfig::from_yaml(yaml).expect("valid scenario");
        let client = build_client(&config).expect("client starts");
        let runner = ScenarioRunner::new(&client, None, Interrupt::new());

        match runner.run(&config.steps) {
            Err(RunnerError::DeviceNotFound(name)) => assert_eq!(name, "Nobody"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_disconnects() {
        let config = RunConfig::default();
        let client = build_client(&config).expect("client starts");
        let interrupt = Interrupt::new();

        let devices = scan(&client, Duration::from_millis(50), &interrupt).expect("scan");
        client.connect(&devices[0].id).expect("catalogued");
        interrupt
            .wait_until("ready", Duration::from_secs(2), || client.phase().is_ready())
            .expect("ready");
        client.arm();
        client.start_periodic(legctrl_protocol::Command::Ping).expect("scheduler starts");

        shutdown(&client);
        assert!(!client.is_periodic_running());
        assert_eq!(client.phase(), LinkPhase::Idle);
    }
}
