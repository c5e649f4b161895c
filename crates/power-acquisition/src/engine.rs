//! Acquisition Engine
//!
//! One Tokio task owns the modem for the engine's whole life. It associates
//! with the meter, then polls it until asked to stop:
//!
//! 1. encode a Get request for power, current, cumulative energy,
//!    coefficient and unit, and send it encrypted to port 0x0E1A
//! 2. wait (bounded) for data addressed to the ECHONET Lite port
//! 3. decode it, ignore anything that is not the meter's Get_Res
//! 4. fold the values into the previous snapshot, publish, notify
//!
//! Everything other tasks can see goes through [`Published`] values (status,
//! snapshot) and the [`ListenerRegistry`]. The serial port never leaves the
//! worker.
//!
//! # Error policy
//!
//! | Error | In the poll loop |
//! |---|---|
//! | `Timeout` | poll again |
//! | `MalformedFrame` | discard the response, poll again |
//! | anything else (`Eof`, `Fail`, ...) | leave the loop, release the port |
//!
//! Initialization errors are terminal: the engine goes straight to
//! `Stopped` and is not restarted. A stop requested while `Starting`
//! abandons the association in progress the same way.

use crate::error::{EngineError, EngineResult};
use crate::readings::{self, MeasurementChange, MeterReading};
use crate::status::EngineStatus;
use parking_lot::{Mutex, RwLock};
use power_core::serial::DynSerial;
use power_core::{ListenerId, ListenerRegistry, Listener, Published, Snapshot};
use power_driver_skstack::{
    Associator, Credentials, Event, EventCode, Ipv6Address, RxData, ScanPolicy, SendSecurity,
    SkError, SkResult, SkTransport, DEFAULT_EVENT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
};
use power_echonet::meter::{self, ECHONET_LITE_PORT};
use power_echonet::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

/// Everything the worker needs besides the port.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub credentials: Credentials,
    pub scan: ScanPolicy,
    /// Quiet period used to flush stale modem output before the first command
    pub settle: Duration,
    /// Bound on each immediate association reply; `None` waits indefinitely
    pub command_timeout: Option<Duration>,
    /// Bound on the scan and join outcomes; `None` waits indefinitely
    pub event_timeout: Option<Duration>,
    /// Bound on each poll, from sending the request to its response
    pub response_timeout: Duration,
}

impl EngineSettings {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            scan: ScanPolicy::default(),
            settle: Duration::from_millis(1000),
            command_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            event_timeout: Some(DEFAULT_EVENT_TIMEOUT),
            response_timeout: Duration::from_secs(10),
        }
    }
}

/// State shared between the engine handle and its worker.
struct Shared {
    status: Published<EngineStatus>,
    stop_requested: AtomicBool,
    /// Wakes the worker out of initialization
    stop_signal: Notify,
    snapshot: Published<Snapshot>,
    listeners: ListenerRegistry<MeasurementChange>,
    firmware_version: RwLock<Option<String>>,
    failure: Mutex<Option<EngineError>>,
}

/// Handle to the acquisition engine.
///
/// All methods take `&self` and may be called from any task or thread.
pub struct MeterEngine {
    shared: Arc<Shared>,
    startup: Mutex<Option<(DynSerial, EngineSettings)>>,
}

impl std::fmt::Debug for MeterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterEngine")
            .field("status", &self.status())
            .field("snapshot", &self.snapshot())
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}

impl MeterEngine {
    /// Create an engine in `Ready`. Nothing touches `port` until [`start`].
    ///
    /// [`start`]: MeterEngine::start
    pub fn new(port: DynSerial, settings: EngineSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: Published::new(EngineStatus::Ready),
                stop_requested: AtomicBool::new(false),
                stop_signal: Notify::new(),
                snapshot: Published::new(Snapshot::default()),
                listeners: ListenerRegistry::new(),
                firmware_version: RwLock::new(None),
                failure: Mutex::new(None),
            }),
            startup: Mutex::new(Some((port, settings))),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the worker on the current Tokio runtime.
    ///
    /// Only valid from `Ready`; the engine cannot be restarted.
    pub fn start(&self) -> EngineResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let claimed = self.shared.status.modify_if(|status| {
            if *status == EngineStatus::Ready {
                *status = EngineStatus::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(EngineError::AlreadyStarted {
                status: self.status(),
            });
        }

        let Some((port, settings)) = self.startup.lock().take() else {
            self.shared.status.replace(EngineStatus::Stopped);
            return Err(EngineError::AlreadyStarted {
                status: EngineStatus::Stopped,
            });
        };

        info!("Starting acquisition engine");
        runtime.spawn(run_worker(self.shared.clone(), port, settings));
        Ok(())
    }

    /// Ask the worker to stop after its current step.
    ///
    /// From `Started` this moves to `Stopping`; the poll in flight finishes
    /// first. A request made while still `Starting` cancels the association
    /// and the engine goes straight to `Stopped`. Has no effect in any other
    /// status.
    pub fn request_stop(&self) {
        let shared = &self.shared;
        let stopping = shared.status.modify_if(|status| match *status {
            EngineStatus::Starting => {
                shared.stop_requested.store(true, Ordering::SeqCst);
                false
            }
            EngineStatus::Started => {
                shared.stop_requested.store(true, Ordering::SeqCst);
                *status = EngineStatus::Stopping;
                true
            }
            _ => false,
        });
        if shared.stop_requested.load(Ordering::SeqCst) {
            // Stores a permit if the worker is not waiting yet
            shared.stop_signal.notify_one();
        }
        if stopping {
            info!("Stop requested");
        }
    }

    /// Wait until the worker has exited and released the serial port.
    ///
    /// Returns at once if the engine was never started. The error that ended
    /// the worker, if any, is handed to the first caller only.
    pub async fn await_stopped(&self) -> EngineResult<()> {
        let mut status = self.shared.status.subscribe();
        if *status.borrow() == EngineStatus::Ready {
            return Ok(());
        }
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = status.wait_for(|s| *s == EngineStatus::Stopped).await;

        match self.shared.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status.get()
    }

    pub fn status_receiver(&self) -> watch::Receiver<EngineStatus> {
        self.shared.status.subscribe()
    }

    // =========================================================================
    // Measurements
    // =========================================================================

    /// Latest published values; all zero before the first successful read.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.get()
    }

    pub fn snapshot_receiver(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Modem firmware version, known once association has completed.
    pub fn firmware_version(&self) -> Option<String> {
        self.shared.firmware_version.read().clone()
    }

    /// Register a change listener. Listeners run on the worker, in
    /// registration order, once per changed property.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MeasurementChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    pub fn subscribe_listener<L>(&self, listener: L) -> ListenerId
    where
        L: Listener<MeasurementChange> + 'static,
    {
        self.shared.listeners.subscribe_listener(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }
}

impl Drop for MeterEngine {
    fn drop(&mut self) {
        self.request_stop();
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Marks the engine `Stopped` however the worker ends, panics included.
struct StoppedGuard {
    shared: Arc<Shared>,
}

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            *self.shared.failure.lock() = Some(EngineError::WorkerPanicked);
        }
        self.shared.status.replace(EngineStatus::Stopped);
        info!("Acquisition engine stopped");
    }
}

async fn run_worker(shared: Arc<Shared>, port: DynSerial, settings: EngineSettings) {
    let _stopped = StoppedGuard {
        shared: shared.clone(),
    };

    let result = tokio::select! {
        biased;
        () = shared.stop_signal.notified() => {
            info!("Stop requested during initialization, abandoning association");
            Ok(())
        }
        initialized = Worker::initialize(shared.clone(), port, &settings) => match initialized {
            Ok(worker) => {
                enter_started(&shared);
                worker.run().await
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!(error = %e, "Acquisition engine failed");
        *shared.failure.lock() = Some(e);
    }
}

fn enter_started(shared: &Shared) {
    shared.status.modify_if(|status| {
        if *status != EngineStatus::Starting {
            return false;
        }
        *status = if shared.stop_requested.load(Ordering::SeqCst) {
            EngineStatus::Stopping
        } else {
            EngineStatus::Started
        };
        true
    });
    info!(status = %shared.status.get(), "Initialization complete");
}

struct Worker {
    shared: Arc<Shared>,
    transport: SkTransport,
    meter_address: Ipv6Address,
    response_timeout: Duration,
    transaction_id: u16,
    /// Authoritative copy of what was last published
    previous: Snapshot,
}

impl Worker {
    async fn initialize(
        shared: Arc<Shared>,
        port: DynSerial,
        settings: &EngineSettings,
    ) -> EngineResult<Self> {
        let mut transport = SkTransport::open(port, settings.settle)
            .await
            .map_err(EngineError::Initialization)?;

        let association = Associator::new(&mut transport)
            .with_response_timeout(settings.command_timeout)
            .with_event_timeout(settings.event_timeout)
            .associate(&settings.credentials, &settings.scan)
            .await
            .map_err(EngineError::Initialization)?;

        *shared.firmware_version.write() = Some(association.firmware_version.clone());

        let mut worker = Self {
            shared,
            transport,
            meter_address: association.meter_address,
            response_timeout: settings.response_timeout,
            transaction_id: 0,
            previous: Snapshot::default(),
        };
        for rx in &association.early_rx {
            worker.absorb(rx);
        }
        Ok(worker)
    }

    async fn run(mut self) -> EngineResult<()> {
        let result = self.poll_loop().await;

        let Worker { transport, .. } = self;
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Serial shutdown failed");
        }
        result
    }

    async fn poll_loop(&mut self) -> EngineResult<()> {
        while !self.shared.stop_requested.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(()) => {}
                Err(SkError::Timeout) => debug!("No response from meter, polling again"),
                Err(SkError::MalformedFrame(e)) => {
                    warn!(error = %e, "Discarding malformed response")
                }
                Err(e) => return Err(EngineError::Link(e)),
            }
        }
        info!("Leaving poll loop");
        Ok(())
    }

    #[instrument(skip(self), fields(tid = tracing::field::Empty))]
    async fn poll_once(&mut self) -> SkResult<()> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        tracing::Span::current().record("tid", self.transaction_id);

        // One deadline covers the send acknowledgement and the response
        let deadline = Instant::now() + self.response_timeout;
        let request = meter::read_request(self.transaction_id, &meter::POLL_PROPERTIES).encode()?;
        let early = self
            .transport
            .send_to(
                &self.meter_address,
                ECHONET_LITE_PORT,
                SendSecurity::Encrypt,
                &request,
                Some(deadline.saturating_duration_since(Instant::now())),
            )
            .await?;
        for rx in &early {
            self.absorb(rx);
        }

        let rx = self.await_response(deadline).await?;
        self.handle_rx(&rx)
    }

    /// Next datagram for the ECHONET Lite port, before `deadline`.
    async fn await_response(&mut self, deadline: Instant) -> SkResult<RxData> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SkError::Timeout);
            }
            match self.transport.read_next_event(Some(remaining)).await? {
                Event::RxData(rx) if rx.local_port == ECHONET_LITE_PORT => return Ok(rx),
                Event::RxData(rx) => trace!(port = rx.local_port, "Ignoring datagram"),
                event if event.is_event(EventCode::SessionLifetimeExpired) => {
                    info!("PANA session expired, modem is re-authenticating")
                }
                other => trace!(event = ?other, "Ignoring event while awaiting response"),
            }
        }
    }

    fn handle_rx(&mut self, rx: &RxData) -> SkResult<()> {
        if rx.local_port != ECHONET_LITE_PORT {
            return Ok(());
        }
        let frame = Frame::decode(&rx.data)?;
        if !meter::is_read_response(&frame) {
            debug!(
                source = %frame.edata.source,
                esv = frame.edata.service,
                "Ignoring frame that is not a read response"
            );
            return Ok(());
        }

        let next = MeterReading::from_frame(&frame).apply(&self.previous);
        self.publish(next);
        Ok(())
    }

    /// Handle data that arrived out of band; a bad frame is only logged.
    fn absorb(&mut self, rx: &RxData) {
        if let Err(e) = self.handle_rx(rx) {
            warn!(error = %e, "Discarding unsolicited data");
        }
    }

    fn publish(&mut self, next: Snapshot) {
        let changes = readings::changes(&self.previous, &next);
        if changes.is_empty() {
            return;
        }

        self.shared.snapshot.replace(next);
        self.previous = next;

        for change in &changes {
            debug!(%change, "Measurement changed");
            let failures = self.shared.listeners.notify(change);
            if failures > 0 {
                error!(
                    property = change.property_name(),
                    failures, "Change notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MeterEngine {
        let (port, _modem) = tokio::io::duplex(64);
        MeterEngine::new(
            Box::new(port),
            EngineSettings::new(Credentials::new("password", "route-b-id")),
        )
    }

    #[test]
    fn test_start_requires_runtime() {
        let engine = engine();
        assert!(matches!(engine.start(), Err(EngineError::NoRuntime)));
        assert_eq!(engine.status(), EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_ignored() {
        let engine = engine();
        engine.request_stop();
        assert_eq!(engine.status(), EngineStatus::Ready);
        assert!(!engine.shared.stop_requested.load(Ordering::SeqCst));
        engine.await_stopped().await.unwrap();
    }

    #[test]
    fn test_initial_snapshot_is_zero() {
        let engine = engine();
        assert_eq!(engine.snapshot(), Snapshot::default());
        assert_eq!(engine.firmware_version(), None);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let engine = engine();
        let id = engine.subscribe(|_| Ok(()));
        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
    }

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::new(Credentials::new("p", "id"));
        assert_eq!(settings.response_timeout, Duration::from_secs(10));
        assert_eq!(settings.scan.max_attempts, 4);
        assert_eq!(settings.command_timeout, Some(Duration::from_secs(10)));
        assert_eq!(settings.event_timeout, Some(Duration::from_secs(600)));
    }
}
