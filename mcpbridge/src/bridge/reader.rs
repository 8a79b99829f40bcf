//! Bounded line reading from stdin.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::FramingError;

/// Upper bound on skipping the rest of an oversized line.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Read one line (including its `\n`, if any) into `buf`, enforcing a size
/// limit while reading rather than after.
///
/// Returns the number of bytes appended; `0` means end of input. A final line
/// without a terminator is returned as-is.
///
/// # Errors
///
/// - `MessageTooLarge`: the line's content exceeds `max_bytes`. The remainder
///   of the line has been consumed, so the next call starts at the next line.
/// - `Io`: the underlying reader failed.
pub async fn bounded_read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;

        // EOF: return what we have (or 0 if nothing).
        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + pos > max_bytes {
                    reader.consume(to_consume);
                    buf.clear();
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }

                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    buf.clear();
                    drain_until_newline(reader).await;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }

                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

/// Skip bytes until just past the next newline, or EOF.
async fn drain_until_newline<R: AsyncBufRead + Unpin>(reader: &mut R) {
    let drain = async {
        loop {
            match reader.fill_buf().await {
                Ok([]) => return,
                Ok(buf) => {
                    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        reader.consume(pos + 1);
                        return;
                    }
                    let len = buf.len();
                    reader.consume(len);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "IO error while draining oversized message");
                    return;
                }
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("drain_until_newline timed out after 30s");
    }
}
