//! The stdin → upstream → stdout loop.
//!
//! Strictly sequential: one line is read, forwarded, and every reply written
//! before the next line is read. Bad input lines are logged and skipped;
//! forwarding failures on messages with an `id` become a JSON-RPC error
//! reply; a failed write to the output ends the loop.

pub mod ndjson;
pub mod reader;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use mcpbridge_core::error::{ForwardError, error_reply_line};
use mcpbridge_core::transport::MessageForwarder;

use crate::error::{BridgeError, FramingError};
use ndjson::{MAX_MESSAGE_BYTES, decode_line, strip_line_ending};
use reader::bounded_read_line;

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Well-formed messages read from input.
    pub received: u64,
    /// Input lines dropped as malformed, oversized or non-UTF-8.
    pub skipped: u64,
    /// Messages delivered upstream with their replies relayed.
    pub forwarded: u64,
    /// Messages whose forwarding failed after all attempts.
    pub failed: u64,
}

/// Sequential stdio bridge over a [`MessageForwarder`].
pub struct Bridge<F> {
    forwarder: F,
    max_line_bytes: usize,
    stats: BridgeStats,
}

impl<F: MessageForwarder> Bridge<F> {
    pub fn new(forwarder: F) -> Self {
        Self {
            forwarder,
            max_line_bytes: MAX_MESSAGE_BYTES,
            stats: BridgeStats::default(),
        }
    }

    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    /// Run until `input` reaches end of file.
    ///
    /// # Errors
    ///
    /// - `BridgeError::Input`: reading `input` failed
    /// - `BridgeError::Output`: writing `output` failed
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<BridgeStats, BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(input);
        let mut line = Vec::with_capacity(8192);

        loop {
            line.clear();
            match bounded_read_line(&mut reader, &mut line, self.max_line_bytes).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(FramingError::Io(e)) => return Err(BridgeError::Input(e)),
                Err(e) => {
                    self.skip(&e);
                    continue;
                }
            }

            self.handle_line(strip_line_ending(&line), output).await?;
        }

        info!(
            received = self.stats.received,
            forwarded = self.stats.forwarded,
            failed = self.stats.failed,
            skipped = self.stats.skipped,
            "Input closed, bridge stopping"
        );
        Ok(self.stats)
    }

    async fn handle_line<W>(&mut self, line: &[u8], output: &mut W) -> Result<(), BridgeError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (raw, message) = match decode_line(line) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.skip(&e);
                return Ok(());
            }
        };

        self.stats.received += 1;
        debug!(
            kind = message.kind().as_str(),
            method = message.method.as_deref().unwrap_or(""),
            bytes = raw.len(),
            "Received message"
        );

        match self.forwarder.forward(raw, &message, &mut *output).await {
            Ok(replies) => {
                self.stats.forwarded += 1;
                debug!(replies, "Message forwarded");
                Ok(())
            }
            Err(ForwardError::Output(e)) => Err(BridgeError::Output(e)),
            Err(e) => {
                self.stats.failed += 1;
                error!(
                    error = %e,
                    method = message.method.as_deref().unwrap_or(""),
                    "Failed to forward message"
                );
                match message.id {
                    Some(id) => write_error_reply(output, id, &e).await,
                    None => Ok(()),
                }
            }
        }
    }

    fn skip(&mut self, err: &FramingError) {
        self.stats.skipped += 1;
        warn!(error = %err, "Skipping invalid input line");
    }
}

/// Emit the `-32603` reply for a failed message.
async fn write_error_reply<W>(output: &mut W, id: Value, err: &ForwardError) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin + Send,
{
    let line = match error_reply_line(id, err) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "Failed to serialize error reply");
            return Ok(());
        }
    };

    output
        .write_all(line.as_bytes())
        .await
        .map_err(BridgeError::Output)?;
    output.flush().await.map_err(BridgeError::Output)
}
