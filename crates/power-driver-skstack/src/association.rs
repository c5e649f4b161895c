//! B-route association sequence.
//!
//! Takes a freshly opened modem to an authenticated PANA session with the
//! meter:
//!
//! 1. `SKVER` firmware version
//! 2. `SKSETPWD` / `SKSETRBID` credentials
//! 3. `SKSCAN` active scan, retried with growing duration
//! 4. `SKSREG S2` / `SKSREG S3` channel and PAN ID of the first network found
//! 5. `SKLL64` link-local address of the meter
//! 6. `SKJOIN` and wait for the PANA outcome
//!
//! Every step fails on the first unexpected answer; nothing is retried
//! except the scan.

use crate::command::{self, ScanMode, MAX_SCAN_DURATION};
use crate::error::{SkError, SkResult};
use crate::event::{Event, EventCode, PanDescriptor, RxData};
use crate::transport::SkTransport;
use crate::{Ipv6Address, LinkAddress};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const VERSION_PREFIX: &str = "EVER ";

/// B-route credentials issued by the utility.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub password: String,
    pub route_b_id: String,
}

impl Credentials {
    pub fn new(password: impl Into<String>, route_b_id: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            route_b_id: route_b_id.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"********")
            .field("route_b_id", &self.route_b_id)
            .finish()
    }
}

/// How the active scan is retried when it finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    pub channel_mask: u32,
    pub initial_duration: u8,
    pub duration_step: u8,
    pub max_attempts: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            channel_mask: 0xFFFF_FFFF,
            initial_duration: 4,
            duration_step: 1,
            max_attempts: 4,
        }
    }
}

impl ScanPolicy {
    /// Scan duration of the zero-based `attempt`, capped at the modem's limit.
    pub fn duration_for(&self, attempt: u32) -> u8 {
        let step = u32::from(self.duration_step).saturating_mul(attempt);
        let duration = u32::from(self.initial_duration).saturating_add(step);
        u8::try_from(duration.min(u32::from(MAX_SCAN_DURATION))).unwrap_or(MAX_SCAN_DURATION)
    }

    pub fn validate(&self) -> SkResult<()> {
        if self.max_attempts == 0 {
            return Err(SkError::InvalidArgument(
                "scan max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_duration > MAX_SCAN_DURATION {
            return Err(SkError::InvalidArgument(format!(
                "scan initial_duration {} exceeds {}",
                self.initial_duration, MAX_SCAN_DURATION
            )));
        }
        Ok(())
    }
}

/// Outcome of a successful association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub firmware_version: String,
    pub pan: PanDescriptor,
    /// Link-local address of the meter, the destination of every request
    pub meter_address: Ipv6Address,
    /// Data the meter sent while the join was still completing
    pub early_rx: Vec<RxData>,
}

/// Default bound on each immediate reply (`OK`, version, address).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the wait for a scan or join outcome. A full-length scan
/// of every channel takes several minutes.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs the association steps over a borrowed transport.
///
/// `response_timeout` bounds each immediate reply and `event_timeout` the
/// wait for scan and join outcomes. `None` waits indefinitely.
#[derive(Debug)]
pub struct Associator<'a> {
    transport: &'a mut SkTransport,
    response_timeout: Option<Duration>,
    event_timeout: Option<Duration>,
}

impl<'a> Associator<'a> {
    pub fn new(transport: &'a mut SkTransport) -> Self {
        Self {
            transport,
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            event_timeout: Some(DEFAULT_EVENT_TIMEOUT),
        }
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_event_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Run the whole sequence.
    #[instrument(skip(self, credentials), fields(route_b_id = %credentials.route_b_id), err)]
    pub async fn associate(
        &mut self,
        credentials: &Credentials,
        policy: &ScanPolicy,
    ) -> SkResult<Association> {
        policy.validate()?;

        let firmware_version = self.version().await?;
        info!(%firmware_version, "Modem firmware");

        self.set_password(&credentials.password).await?;
        self.set_route_b_id(&credentials.route_b_id).await?;

        let pan = self.scan_with_retry(policy).await?;
        info!(
            channel = pan.channel,
            pan_id = %format!("{:04X}", pan.pan_id),
            address = %pan.address,
            lqi = pan.lqi,
            "Smart meter network found"
        );

        self.set_register("S2", &format!("{:X}", pan.channel)).await?;
        self.set_register("S3", &format!("{:04X}", pan.pan_id)).await?;

        let meter_address = self.link_local_address(&pan.address).await?;
        let early_rx = self.join(&meter_address).await?;
        info!(%meter_address, "PANA session established");

        Ok(Association {
            firmware_version,
            pan,
            meter_address,
            early_rx,
        })
    }

    // =========================================================================
    // Steps
    // =========================================================================

    pub async fn version(&mut self) -> SkResult<String> {
        self.transport.send_line(&command::version()).await?;
        let line = self.transport.read_next_line(self.response_timeout).await?;
        let version = line
            .strip_prefix(VERSION_PREFIX)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| SkError::illegal("expected EVER", line.as_str()))?;
        self.expect_ok("SKVER").await?;
        Ok(version)
    }

    pub async fn set_password(&mut self, password: &str) -> SkResult<()> {
        if password.is_empty() {
            return Err(SkError::InvalidArgument("empty B-route password".into()));
        }
        self.transport
            .send_line(&command::set_password(password))
            .await?;
        self.expect_ok("SKSETPWD").await
    }

    pub async fn set_route_b_id(&mut self, id: &str) -> SkResult<()> {
        if id.is_empty() {
            return Err(SkError::InvalidArgument("empty B-route ID".into()));
        }
        self.transport
            .send_line(&command::set_route_b_id(id))
            .await?;
        self.expect_ok("SKSETRBID").await
    }

    /// One active scan. Returns every descriptor reported before the scan
    /// completed, possibly none.
    #[instrument(skip(self), err)]
    pub async fn active_scan(
        &mut self,
        channel_mask: u32,
        duration: u8,
    ) -> SkResult<Vec<PanDescriptor>> {
        if duration > MAX_SCAN_DURATION {
            return Err(SkError::InvalidArgument(format!(
                "scan duration {duration} exceeds {MAX_SCAN_DURATION}"
            )));
        }
        self.transport
            .send_line(&command::scan(
                ScanMode::ActiveWithIe,
                channel_mask,
                duration,
            ))
            .await?;
        self.expect_ok("SKSCAN").await?;

        let mut found = Vec::new();
        loop {
            match self.transport.read_next_event(self.event_timeout).await? {
                Event::PanDescriptor(pan) => found.push(pan),
                event if event.is_event(EventCode::ActiveScanCompleted) => return Ok(found),
                other => debug!(event = ?other, "Ignoring event during scan"),
            }
        }
    }

    /// Scan until a network shows up, lengthening the scan on every attempt.
    pub async fn scan_with_retry(&mut self, policy: &ScanPolicy) -> SkResult<PanDescriptor> {
        for attempt in 0..policy.max_attempts {
            let duration = policy.duration_for(attempt);
            let found = self.active_scan(policy.channel_mask, duration).await?;
            match found.into_iter().next() {
                Some(pan) => return Ok(pan),
                None => warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    duration,
                    "Active scan found no network"
                ),
            }
        }
        Err(SkError::NoNetworkFound {
            attempts: policy.max_attempts,
        })
    }

    /// `value` is written verbatim.
    pub async fn set_register(&mut self, register: &str, value: &str) -> SkResult<()> {
        self.transport
            .send_line(&command::set_register(register, value))
            .await?;
        self.expect_ok("SKSREG").await
    }

    /// Ask the modem for the link-local IPv6 address of `mac`.
    pub async fn link_local_address(&mut self, mac: &LinkAddress) -> SkResult<Ipv6Address> {
        self.transport
            .send_line(&command::link_local_address(mac))
            .await?;
        let line = self.transport.read_next_line(self.response_timeout).await?;
        line.trim()
            .parse::<Ipv6Address>()
            .map_err(|e| SkError::illegal(format!("SKLL64: {e}"), line.as_str()))
    }

    /// Start PANA authentication and wait for its outcome.
    ///
    /// Returns any data received while waiting.
    #[instrument(skip(self), fields(address = %address), err)]
    pub async fn join(&mut self, address: &Ipv6Address) -> SkResult<Vec<RxData>> {
        self.transport.send_line(&command::join(address)).await?;
        self.expect_ok("SKJOIN").await?;

        let mut received = Vec::new();
        loop {
            match self.transport.read_next_event(self.event_timeout).await? {
                event if event.is_event(EventCode::PanaConnectionError) => {
                    return Err(SkError::JoinFailed { event })
                }
                event if event.is_event(EventCode::PanaConnectionCompleted) => {
                    return Ok(received)
                }
                Event::RxData(rx) => received.push(rx),
                other => debug!(event = ?other, "Ignoring event during join"),
            }
        }
    }

    async fn expect_ok(&mut self, command: &'static str) -> SkResult<()> {
        match self.transport.read_next_event(self.response_timeout).await? {
            Event::Ok => Ok(()),
            Event::Fail { code } => Err(SkError::Fail { command, code }),
            response => Err(SkError::UnexpectedResponse { command, response }),
        }
    }
}
