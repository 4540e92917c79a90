use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use nalgebra::Vector3;

use crate::calibration::Calibrator;
use crate::config::SessionConfig;
use crate::error::ParseError;
use crate::serial::SerialSource;
use crate::source::{Received, Source};
use crate::store::PoseStore;
use crate::types::{DeviceCommand, DeviceMessage, Pose, Reading, SessionState, SourceKind};
use crate::udp::UdpSource;
use crate::vio::{VioPipeline, VioSource};
use crate::xr50::Xr50Pipeline;
use crate::{PosefeedError, Result};

/// Capacity of the session event channel; events beyond it are dropped.
const EVENT_CAPACITY: usize = 64;

/// Cooperative stop flag, checked once per worker loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Notifications for the host, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A non-pose line from the serial IMU firmware.
    DeviceMessage(DeviceMessage),
}

enum Command {
    Recenter,
    Device(DeviceCommand),
}

/// Session state shared between the handle and the worker thread.
struct Shared {
    kind: SourceKind,
    state: AtomicU8,
    events: Sender<SessionEvent>,
    /// Second receiver on the event channel, used to evict the oldest event.
    backlog: Receiver<SessionEvent>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply `next` if the state machine allows it from the current state.
    fn transition(&self, next: SessionState) -> bool {
        let mut current = self.state();
        loop {
            if !current.can_transition_to(next) {
                log::trace!("{} session: ignoring {:?} -> {:?}", self.kind, current, next);
                return false;
            }
            match self.state.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = SessionState::from_u8(actual),
            }
        }
        log::info!("{} session: {:?} -> {:?}", self.kind, current, next);
        self.emit(SessionEvent::StateChanged(next));
        true
    }

    /// Queue `event`; when the channel is full the oldest event is dropped
    /// so the latest state change always reaches a late reader.
    fn emit(&self, mut event: SessionEvent) {
        loop {
            match self.events.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(oldest) = self.backlog.try_recv() {
                        log::trace!("{} session: event channel full, dropping {:?}", self.kind, oldest);
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// One tracking session: exactly one source on one dedicated thread.
///
/// The host reads poses through [`store`](Session::store). Dropping the
/// session stops it.
pub struct Session {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    store: PoseStore,
    calibrator: Calibrator,
    cancel: CancellationToken,
    commands: Sender<Command>,
    events: Receiver<SessionEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open the transport named by `config` and start streaming.
    ///
    /// Transport construction failures (bind, port open, device count) are
    /// returned here, before any thread is spawned. The VIO transport uses
    /// the bundled XR50 backend; see [`Session::start_vio`] for others.
    pub fn start(config: &SessionConfig) -> Result<Session> {
        config.validate()?;
        let source: Box<dyn Source> = match config.source {
            SourceKind::Serial => Box::new(SerialSource::open(
                &config.serial_port,
                config.baud_rate,
                config.read_timeout,
            )?),
            SourceKind::Udp => Box::new(UdpSource::bind(
                config.udp_port,
                config.read_timeout,
                config.udp_echo,
            )?),
            SourceKind::Vio => return Self::start_vio(Box::new(Xr50Pipeline::new()), config),
        };
        Self::with_source(source)
    }

    /// Start a VIO session on an arbitrary pipeline.
    pub fn start_vio(pipeline: Box<dyn VioPipeline>, config: &SessionConfig) -> Result<Session> {
        config.validate()?;
        let source = VioSource::start(pipeline, config.read_timeout, config.recenter_vio)?;
        Self::with_source(Box::new(source))
    }

    /// Run an already-constructed source on a new worker thread.
    pub fn with_source(source: Box<dyn Source>) -> Result<Session> {
        let kind = source.kind();
        let local_addr = source.local_addr();
        let (event_tx, events) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let (commands, command_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            kind,
            state: AtomicU8::new(SessionState::Idle as u8),
            events: event_tx,
            backlog: events.clone(),
        });
        shared.transition(SessionState::Connecting);

        let store = PoseStore::new();
        let calibrator = Calibrator::new();
        let cancel = CancellationToken::new();

        let worker = Worker {
            source,
            shared: shared.clone(),
            store: store.clone(),
            calibrator: calibrator.clone(),
            cancel: cancel.clone(),
            commands: command_rx,
            recenter_pending: false,
        };

        let thread = std::thread::Builder::new()
            .name(format!("posefeed-{}", kind))
            .spawn(move || worker.run())
            .map_err(PosefeedError::Spawn)?;

        Ok(Session {
            shared,
            local_addr,
            store,
            calibrator,
            cancel,
            commands,
            events,
            worker: Mutex::new(Some(thread)),
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.shared.kind
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Check if the worker is still streaming.
    pub fn is_active(&self) -> bool {
        matches!(self.state(), SessionState::Connecting | SessionState::Streaming)
    }

    /// Bound address of network transports (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The pose sink's view of the session.
    pub fn store(&self) -> &PoseStore {
        &self.store
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// State changes and device messages. The channel is bounded; once it
    /// fills, the oldest events are dropped. [`state`](Session::state) is
    /// always current.
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Raise the recenter trigger. The next reading becomes the identity
    /// orientation.
    pub fn recenter(&self) {
        self.send(Command::Recenter);
    }

    /// Ask the device firmware to calibrate itself (serial IMU only).
    pub fn request_device_calibration(&self) {
        self.send(Command::Device(DeviceCommand::Calibrate));
    }

    /// Cancel the worker and wait for it to exit.
    ///
    /// Idempotent and callable from any thread; concurrent callers return
    /// once the worker has been joined.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        let Some(thread) = worker.take() else {
            return;
        };

        self.shared.transition(SessionState::Stopping);
        self.cancel.cancel();

        if thread.thread().id() == std::thread::current().id() {
            log::warn!("{} session stopped from its own worker, not joining", self.kind());
        } else if thread.join().is_err() {
            log::error!("{} session worker panicked", self.kind());
        }

        self.store.close();
        self.shared.transition(SessionState::Stopped);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("{} session: worker gone, command dropped", self.kind());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the worker thread owns.
struct Worker {
    source: Box<dyn Source>,
    shared: Arc<Shared>,
    store: PoseStore,
    calibrator: Calibrator,
    cancel: CancellationToken,
    commands: Receiver<Command>,
    recenter_pending: bool,
}

impl Worker {
    fn run(mut self) {
        let kind = self.shared.kind;
        log::info!("{} worker started", kind);
        self.shared.transition(SessionState::Streaming);

        let mut published: u64 = 0;
        let mut dropped: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                log::info!("{} worker stopping (cancelled)", kind);
                break;
            }

            let received = self.source.recv();
            self.drain_commands();

            match received {
                Ok(Received::Reading(reading)) => {
                    let pose = self.calibrate(reading);
                    self.store.publish(pose);
                    published += 1;
                    if published % 1000 == 0 {
                        log::debug!("{} worker: {} poses published", kind, published);
                    }
                }
                Ok(Received::Rejected(ParseError::DeviceMessage(msg))) => {
                    log::info!("{} device: {}", kind, msg);
                    self.shared.emit(SessionEvent::DeviceMessage(msg));
                }
                Ok(Received::Rejected(ParseError::Empty)) => {
                    log::trace!("{} worker: empty frame", kind);
                }
                Ok(Received::Rejected(e)) => {
                    dropped += 1;
                    log::debug!("{} worker: dropping frame: {}", kind, e);
                }
                Ok(Received::Idle) => {}
                Err(e) => {
                    log::error!("{} transport failed: {}", kind, e);
                    self.shared.transition(SessionState::Disconnected);
                    break;
                }
            }
        }

        self.source.shutdown();
        self.store.close();
        log::info!(
            "{} worker exited ({} published, {} dropped)",
            kind,
            published,
            dropped
        );
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Recenter => self.recenter_pending = true,
                Command::Device(cmd) => {
                    if let Err(e) = self.source.device_command(cmd) {
                        log::warn!("{} device command {:?} failed: {}", self.shared.kind, cmd, e);
                    }
                }
            }
        }
    }

    /// Consume a pending trigger and recenter the reading's orientation.
    fn calibrate(&mut self, reading: Reading) -> Pose {
        let trigger = std::mem::take(&mut self.recenter_pending);
        let orientation = if self.source.recenters() {
            self.calibrator.maybe_recalibrate(trigger, reading.orientation);
            self.calibrator.apply(reading.orientation)
        } else {
            if trigger {
                log::info!("{} source does not recenter, trigger ignored", self.shared.kind);
            }
            reading.orientation
        };

        Pose {
            position: reading.position.unwrap_or_else(Vector3::zeros),
            orientation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::tests::{timeout, NoisePort, ScriptedPort};
    use crate::types::{DeviceMessageKind, Quaternion};
    use crate::vio::tests::{tracking, FakePipeline};
    use std::time::Duration;

    /// Source that never produces data, like an idle socket.
    struct SilentSource;

    impl Source for SilentSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Udp
        }

        fn recv(&mut self) -> Result<Received> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(Received::Idle)
        }
    }

    fn collect_events(session: &Session) -> Vec<SessionEvent> {
        session.events().try_iter().collect()
    }

    #[test]
    fn test_serial_session_lifecycle() {
        let port = ScriptedPort::new(vec![
            Ok(b"D:fw 1.2\n".to_vec()),
            Ok(b"0,1,0,0\n".to_vec()),
            Ok(b"garbage\n".to_vec()),
            timeout(),
        ]);
        let session = Session::with_source(Box::new(SerialSource::from_port("test", port))).unwrap();

        // EOF after the script ends the stream
        assert_eq!(
            session.store().wait_for_next_timeout(Duration::from_secs(2)).unwrap().orientation,
            Quaternion::new(0.0, 1.0, 0.0, 0.0)
        );
        assert!(matches!(
            session.store().wait_for_next_timeout(Duration::from_secs(2)),
            Err(PosefeedError::StreamStopped)
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.store().try_read().unwrap().position, Vector3::zeros());

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);

        let events = collect_events(&session);
        assert_eq!(
            events,
            vec![
                SessionEvent::StateChanged(SessionState::Connecting),
                SessionEvent::StateChanged(SessionState::Streaming),
                SessionEvent::DeviceMessage(DeviceMessage {
                    kind: DeviceMessageKind::Info,
                    text: "fw 1.2".into(),
                }),
                SessionEvent::StateChanged(SessionState::Disconnected),
                SessionEvent::StateChanged(SessionState::Stopping),
                SessionEvent::StateChanged(SessionState::Stopped),
            ]
        );
    }

    #[test]
    fn test_full_event_channel_keeps_latest_events() {
        let steps = (0..2 * EVENT_CAPACITY)
            .map(|i| Ok(format!("D:line {}\n", i).into_bytes()))
            .collect();
        let session =
            Session::with_source(Box::new(SerialSource::from_port("test", ScriptedPort::new(steps)))).unwrap();
        assert!(matches!(
            session.store().wait_for_next_timeout(Duration::from_secs(2)),
            Err(PosefeedError::StreamStopped)
        ));
        session.stop();

        let events = collect_events(&session);
        assert_eq!(events.len(), EVENT_CAPACITY);
        assert_eq!(
            &events[EVENT_CAPACITY - 3..],
            &[
                SessionEvent::StateChanged(SessionState::Disconnected),
                SessionEvent::StateChanged(SessionState::Stopping),
                SessionEvent::StateChanged(SessionState::Stopped),
            ]
        );
        assert_eq!(
            events[EVENT_CAPACITY - 4],
            SessionEvent::DeviceMessage(DeviceMessage {
                kind: DeviceMessageKind::Info,
                text: format!("line {}", 2 * EVENT_CAPACITY - 1),
            })
        );
    }

    #[test]
    fn test_stop_is_idempotent_and_bounded() {
        let session = Session::with_source(Box::new(SilentSource)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.is_active());

        let started = std::time::Instant::now();
        session.stop();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.store().is_closed());
    }

    #[test]
    fn test_stop_with_newline_free_serial_noise() {
        let port = NoisePort::new();
        let reads = port.reads.clone();
        let session = Session::with_source(Box::new(SerialSource::from_port("noise", port))).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(reads.load(Ordering::SeqCst) > 0);

        let started = std::time::Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.store().try_read().is_none());
    }

    #[test]
    fn test_stop_from_other_threads() {
        let session = Arc::new(Session::with_source(Box::new(SilentSource)).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || session.stop())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(session.state(), SessionState::Stopped);
        let stopped = collect_events(&session)
            .into_iter()
            .filter(|e| *e == SessionEvent::StateChanged(SessionState::Stopped))
            .count();
        assert_eq!(stopped, 1);
    }

    #[test]
    fn test_vio_session_bypasses_calibrator() {
        let pipeline = FakePipeline::new(vec![Ok(Some(tracking(1.0)))]);
        let released = pipeline.released.clone();
        let config = SessionConfig {
            read_timeout: Duration::from_millis(10),
            ..SessionConfig::vio()
        };
        let session = Session::start_vio(Box::new(pipeline), &config).unwrap();
        session.recenter();

        let pose = session.store().wait_for_next_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(pose.position, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(pose.orientation, Quaternion::IDENTITY);
        assert!(session.calibrator().reference().is_none());

        session.stop();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_vio_startup_failure_spawns_nothing() {
        let mut pipeline = FakePipeline::new(vec![]);
        pipeline.devices = 0;
        assert!(matches!(
            Session::start_vio(Box::new(pipeline), &SessionConfig::vio()),
            Err(PosefeedError::DeviceCount(0))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig {
            read_timeout: Duration::ZERO,
            ..SessionConfig::udp(0)
        };
        assert!(matches!(Session::start(&config), Err(PosefeedError::Config(_))));
    }

    #[test]
    fn test_missing_serial_port_is_startup_error() {
        let config = SessionConfig::serial("/dev/posefeed-does-not-exist");
        assert!(matches!(
            Session::start(&config),
            Err(PosefeedError::PortOpen { .. })
        ));
    }
}
