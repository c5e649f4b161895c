//! Scripted stand-in for a Wi-SUN modem on a serial port
//!
//! `new()` returns a connected pair:
//! - [`MockSerialPort`]: handed to the code under test as its `DynSerial`
//! - [`MockDeviceHarness`]: kept by the test to play the modem
//!
//! Both directions are unbounded channels, so the harness can queue replies
//! before the command that triggers them is written. Dropping the harness
//! closes the read side, which the port reports as end-of-file.
//!
//! # Example
//!
//! ```rust
//! use power_driver_skstack::{mock_serial, SkTransport};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (port, mut modem) = mock_serial::new();
//! let mut transport = SkTransport::open(Box::new(port), Duration::from_millis(10))
//!     .await
//!     .unwrap();
//!
//! transport.send_line("SKVER").await.unwrap();
//! modem.expect_line("SKVER").await;
//! modem.send_lines(&["EVER 1.2.10", "OK"]).unwrap();
//!
//! let line = transport.read_next_line(None).await.unwrap();
//! assert_eq!(line, "EVER 1.2.10");
//! # }
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How long an expectation waits for the client before panicking.
const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client side: behaves like the serial stream of a real modem.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Test side: asserts on what the client wrote and feeds modem output back.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    /// Written by the client but not yet matched by an expectation
    write_buffer: Vec<u8>,
}

pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
    };

    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
    };

    (port, harness)
}

// =============================================================================
// MockSerialPort
// =============================================================================

impl MockSerialPort {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let to_read = buf.remaining().min(self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.read_buffer.extend(chunk);
                self.fill(buf);
                Poll::Ready(Ok(()))
            }
            // Harness gone: end-of-file
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock modem disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// =============================================================================
// MockDeviceHarness
// =============================================================================

impl MockDeviceHarness {
    /// Queue raw bytes for the client to read.
    ///
    /// # Errors
    /// Fails if the client port has been dropped.
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| "Failed to send response: client port disconnected")
    }

    /// Queue one line, CRLF appended.
    pub fn send_line(&self, line: &str) -> Result<(), &'static str> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.send_response(&data)
    }

    pub fn send_lines(&self, lines: &[&str]) -> Result<(), &'static str> {
        lines.iter().try_for_each(|line| self.send_line(line))
    }

    /// Wait until the client has written `expected` next, and consume it.
    ///
    /// # Panics
    /// Panics on mismatch, or when nothing matching arrives within two seconds.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match tokio::time::timeout(EXPECT_TIMEOUT, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("Client-side port closed while expecting a write."),
                Err(_) => panic!(
                    "Timeout waiting for write. Expected `{:?}`, but only received `{:?}`.",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer),
                ),
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Mismatch in expected write. Expected `{:?}`, got `{:?}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );
        self.write_buffer.drain(..expected.len());
    }

    /// Expect one command line (CRLF-terminated).
    pub async fn expect_line(&mut self, line: &str) {
        let mut expected = line.as_bytes().to_vec();
        expected.extend_from_slice(b"\r\n");
        self.expect_write(&expected).await;
    }

    /// Expect a command line, then answer with `replies`.
    pub async fn expect_and_reply(&mut self, line: &str, replies: &[&str]) {
        self.expect_line(line).await;
        if let Err(e) = self.send_lines(replies) {
            panic!("{e}");
        }
    }

    /// Discard every pending write without asserting on it.
    pub async fn drain_writes(&mut self) {
        let short_timeout = Duration::from_millis(50);
        while let Ok(Some(chunk)) = tokio::time::timeout(short_timeout, self.writes_rx.recv()).await
        {
            self.write_buffer.extend_from_slice(&chunk);
        }
        self.write_buffer.clear();
    }

    /// Whether the client has written nothing that is still unmatched.
    pub fn is_idle(&mut self) -> bool {
        while let Ok(chunk) = self.writes_rx.try_recv() {
            self.write_buffer.extend_from_slice(&chunk);
        }
        self.write_buffer.is_empty()
    }
}
