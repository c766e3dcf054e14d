//! Concurrent line capture of a runner's stdout and stderr.
//!
//! Each line is handed to the [`StepSink`] as soon as it is read, so the
//! run log can be tailed while the run is still in flight.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::trace;

use super::StreamKind;

/// Destination for captured lines.
#[async_trait::async_trait]
pub trait StepSink: Send + Sync {
    async fn append(&self, run_id: i64, stream: StreamKind, message: String) -> Result<()>;
}

/// Lines captured per stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub stdout_lines: u64,
    pub stderr_lines: u64,
}

/// Decode one raw line: invalid UTF-8 becomes U+FFFD and the trailing
/// `\n` / `\r\n` is stripped.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Drain one stream to EOF, appending every line in arrival order.
pub async fn capture_stream<R, S>(
    reader: R,
    run_id: i64,
    stream: StreamKind,
    sink: &S,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    S: StepSink + ?Sized,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut lines = 0u64;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .with_context(|| format!("failed to read runner {}", stream.as_str()))?;
        if n == 0 {
            break;
        }
        let line = decode_line(&buf);
        trace!(run_id, stream = stream.as_str(), line = line.as_str(), "captured");
        sink.append(run_id, stream, line).await?;
        lines += 1;
    }

    Ok(lines)
}

/// Drain stdout and stderr concurrently. Completes only once both streams
/// reach EOF; the first error from either side aborts the capture.
pub async fn capture_output<O, E, S>(
    stdout: O,
    stderr: E,
    run_id: i64,
    sink: &S,
) -> Result<CaptureSummary>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    S: StepSink + ?Sized,
{
    let (stdout_lines, stderr_lines) = tokio::try_join!(
        capture_stream(stdout, run_id, StreamKind::Stdout, sink),
        capture_stream(stderr, run_id, StreamKind::Stderr, sink),
    )?;
    Ok(CaptureSummary {
        stdout_lines,
        stderr_lines,
    })
}
