// src/exec/stream.rs

//! Pass-through of child output to the supervisor's own stdout/stderr.
//!
//! Each pipe gets its own copy task that moves fixed-size chunks and flushes
//! after every chunk, so output from the build tool and the backend shows up
//! as it is produced. stderr can additionally be teed into a
//! [`Diagnostics`] buffer, which is what failed builds and crashed backends
//! report back to the client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

/// Size of a single copy chunk.
pub const CHUNK_SIZE: usize = 4 * 1024;

/// Shared buffer collecting stderr bytes.
///
/// With a limit, only the most recent `limit` bytes are kept. A long-running
/// backend can write a lot to stderr; what matters when it dies is the tail.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    buf: Arc<Mutex<Vec<u8>>>,
    limit: Option<usize>,
}

impl Diagnostics {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Arc::default(),
            limit: Some(limit),
        }
    }

    pub fn append(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        buf.extend_from_slice(bytes);
        if let Some(limit) = self.limit {
            if buf.len() > limit {
                let excess = buf.len() - limit;
                buf.drain(..excess);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().map(|b| b.is_empty()).unwrap_or(true)
    }

    /// Captured bytes, decoded lossily.
    pub fn text(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Copy `src` to `dst` chunk by chunk until end of stream.
///
/// Every chunk is flushed immediately. When `tee` is set each chunk is also
/// appended to it before being written out.
pub async fn copy_chunks<R, W>(mut src: R, mut dst: W, tee: Option<&Diagnostics>) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Some(tee) = tee {
            tee.append(&buf[..n]);
        }
        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
        total += n as u64;
    }
    Ok(total)
}

/// The copy tasks attached to one child process.
///
/// Dropping this aborts the tasks, which drops the pipe read ends.
#[derive(Debug, Default)]
pub struct OutputStreams {
    tasks: Vec<JoinHandle<()>>,
}

impl OutputStreams {
    /// Start forwarding the child's pipes to our stdout/stderr.
    pub fn spawn(
        label: &'static str,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        diagnostics: Diagnostics,
    ) -> Self {
        let mut tasks = Vec::with_capacity(2);

        if let Some(stdout) = stdout {
            tasks.push(tokio::spawn(async move {
                match copy_chunks(stdout, tokio::io::stdout(), None).await {
                    Ok(bytes) => trace!(label, bytes, "stdout stream ended"),
                    Err(e) => debug!(label, error = %e, "stdout stream closed"),
                }
            }));
        }

        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(async move {
                match copy_chunks(stderr, tokio::io::stderr(), Some(&diagnostics)).await {
                    Ok(bytes) => trace!(label, bytes, "stderr stream ended"),
                    Err(e) => debug!(label, error = %e, "stderr stream closed"),
                }
            }));
        }

        Self { tasks }
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    /// Let the tasks run to end-of-stream, aborting whatever is still going
    /// once `grace` has elapsed. Used after a child has exited, so that
    /// everything it wrote is captured.
    pub async fn settle(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while let Some(mut task) = self.tasks.pop() {
            if timeout_at(deadline, &mut task).await.is_err() {
                debug!("output stream still open after grace period; aborting");
                task.abort();
            }
        }
    }

    /// Abort the tasks and wait for them to go away.
    pub async fn close(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for OutputStreams {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
