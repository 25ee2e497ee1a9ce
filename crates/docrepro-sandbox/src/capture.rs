//! Bounded output capture.
//!
//! Each child stream is drained to EOF on its own task so the child can
//! never block on a full pipe.  Only the first `limit` bytes are retained;
//! the remainder is read and dropped, and the stream is marked truncated.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read chunk size used while draining a pipe.
const CHUNK_BYTES: usize = 4096;

/// One captured output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedStream {
    /// Retained output, decoded as lossy UTF-8.
    pub text: String,
    /// Whether bytes were dropped because the cap was reached (or the
    /// stream could not be drained completely).
    pub truncated: bool,
    /// Total bytes the child wrote to the stream, including dropped ones.
    pub total_bytes: usize,
}

impl CapturedStream {
    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whether the captured text is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// The last non-blank line of the captured text.
    pub fn last_line(&self) -> Option<&str> {
        self.text.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Drain `stream` to EOF, keeping at most `limit` bytes.
pub async fn capture<R>(mut stream: R, limit: usize) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut kept: Vec<u8> = Vec::new();
    let mut chunk = [0u8; CHUNK_BYTES];
    let mut total = 0usize;
    let mut truncated = false;

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                let room = limit.saturating_sub(kept.len());
                if room >= n {
                    kept.extend_from_slice(&chunk[..n]);
                } else {
                    kept.extend_from_slice(&chunk[..room]);
                    truncated = true;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "output stream closed with error");
                truncated = true;
                break;
            }
        }
    }

    CapturedStream {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
        total_bytes: total,
    }
}
