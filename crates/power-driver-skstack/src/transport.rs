//! Line transport over the modem's serial stream.
//!
//! Outbound commands are terminated with CRLF. Inbound text is split on LF
//! and trimmed at the end; empty lines and command echoes are dropped. A
//! partial line survives a timed-out read, so a timeout never loses bytes.
//!
//! One line of pushback is kept for multi-line events: an `EPANDESC` block
//! only ends when the next non-indented line arrives, and that line belongs
//! to whoever reads next.

use crate::command::{self, SendSecurity};
use crate::error::{SkError, SkResult};
use crate::event::{self, Event, RxData, PAN_DESCRIPTOR_TOKEN};
use crate::Ipv6Address;
use power_core::serial::DynSerial;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Commands echoed back by the modem start with this.
const ECHO_PREFIX: &str = "SK";

const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Owns the serial stream for its whole life. Dropping it releases the port.
pub struct SkTransport {
    port: BufReader<DynSerial>,
    /// Bytes of a line whose terminator has not arrived yet
    partial: Vec<u8>,
    /// Line handed back by a multi-line parse
    pushback: Option<String>,
}

impl std::fmt::Debug for SkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkTransport")
            .field("partial_len", &self.partial.len())
            .field("pushback", &self.pushback)
            .finish()
    }
}

impl SkTransport {
    /// Take ownership of `port` and discard whatever the modem prints during
    /// `settle` (boot banner, leftovers of an earlier session).
    pub async fn open(port: DynSerial, settle: Duration) -> SkResult<Self> {
        let mut transport = Self {
            port: BufReader::new(port),
            partial: Vec::new(),
            pushback: None,
        };
        transport.drain(settle).await?;
        Ok(transport)
    }

    async fn drain(&mut self, settle: Duration) -> SkResult<()> {
        let deadline = Instant::now() + settle;
        let mut discarded = 0usize;
        loop {
            match self.read_raw_line(Some(deadline)).await {
                Ok(_) => discarded += 1,
                Err(SkError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        self.partial.clear();
        debug!(discarded, "Serial input settled");
        Ok(())
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Write one command line.
    pub async fn send_line(&mut self, line: &str) -> SkResult<()> {
        debug!(command = %redact(line), ">>");
        let writer = self.port.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(LINE_TERMINATOR).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a UDP datagram and wait for the command's `OK`.
    ///
    /// Received data that shows up before the `OK` is returned to the caller
    /// rather than dropped. Other events in between are skipped.
    #[instrument(skip(self, payload), fields(len = payload.len()), err)]
    pub async fn send_to(
        &mut self,
        destination: &Ipv6Address,
        port: u16,
        security: SendSecurity,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> SkResult<Vec<RxData>> {
        let len = u16::try_from(payload.len()).map_err(|_| {
            SkError::InvalidArgument(format!("payload of {} bytes", payload.len()))
        })?;
        let header =
            command::send_to_header(command::DEFAULT_HANDLE, destination, port, security, len);
        debug!(command = %header.trim_end(), ">>");

        let writer = self.port.get_mut();
        writer.write_all(header.as_bytes()).await?;
        writer.write_all(payload).await?;
        writer.write_all(LINE_TERMINATOR).await?;
        writer.flush().await?;

        let deadline = deadline_after(timeout);
        let mut early = Vec::new();
        loop {
            match self.read_event_until(deadline).await? {
                Event::Ok => return Ok(early),
                Event::Fail { code } => {
                    return Err(SkError::Fail {
                        command: "SKSENDTO",
                        code,
                    })
                }
                Event::RxData(rx) => early.push(rx),
                other => trace!(event = ?other, "Skipping event while awaiting OK"),
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Next meaningful line. `None` waits indefinitely.
    pub async fn read_next_line(&mut self, timeout: Option<Duration>) -> SkResult<String> {
        self.read_line_until(deadline_after(timeout)).await
    }

    /// Next line parsed as an [`Event`]. `None` waits indefinitely.
    pub async fn read_next_event(&mut self, timeout: Option<Duration>) -> SkResult<Event> {
        self.read_event_until(deadline_after(timeout)).await
    }

    /// Hand a line back; the next read returns it first.
    pub fn push_back(&mut self, line: String) {
        self.pushback = Some(line);
    }

    pub(crate) async fn read_event_until(&mut self, deadline: Option<Instant>) -> SkResult<Event> {
        let line = self.read_line_until(deadline).await?;
        if line.split_whitespace().next() == Some(PAN_DESCRIPTOR_TOKEN) {
            return self.read_pan_descriptor(deadline).await;
        }
        event::parse_line(&line)
    }

    async fn read_pan_descriptor(&mut self, deadline: Option<Instant>) -> SkResult<Event> {
        let mut block = Vec::new();
        loop {
            match self.read_line_until(deadline).await {
                Ok(line) if line.starts_with(char::is_whitespace) => block.push(line),
                Ok(line) => {
                    self.push_back(line);
                    break;
                }
                // Nothing more arrived in time, so the block is complete.
                Err(SkError::Timeout) if !block.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        event::parse_pan_descriptor(&block).map(Event::PanDescriptor)
    }

    async fn read_line_until(&mut self, deadline: Option<Instant>) -> SkResult<String> {
        if let Some(line) = self.pushback.take() {
            return Ok(line);
        }
        loop {
            let raw = self.read_raw_line(deadline).await?;
            let line = raw.trim_end();
            if line.trim_start().is_empty() {
                continue;
            }
            if line.starts_with(ECHO_PREFIX) {
                trace!(echo = %redact(line), "Discarding echo");
                continue;
            }
            debug!(line, "<<");
            return Ok(line.to_string());
        }
    }

    /// One raw line including its terminator.
    async fn read_raw_line(&mut self, deadline: Option<Instant>) -> SkResult<String> {
        let read = self.port.read_until(b'\n', &mut self.partial);
        let n = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, read)
                .await
                .map_err(|_| SkError::Timeout)??,
            None => read.await?,
        };
        if n == 0 && self.partial.is_empty() {
            return Err(SkError::Eof);
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Ok(line)
    }

    /// Flush and shut the stream down. The port is released on return.
    pub async fn close(mut self) -> SkResult<()> {
        self.port.get_mut().shutdown().await?;
        Ok(())
    }
}

fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// Keep the B-route password out of the logs.
fn redact(line: &str) -> std::borrow::Cow<'_, str> {
    match line.strip_prefix("SKSETPWD ") {
        Some(rest) => {
            let len = rest.split_whitespace().next().unwrap_or_default();
            format!("SKSETPWD {len} ********").into()
        }
        None => line.into(),
    }
}
