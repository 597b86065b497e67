use crate::error::ShimError;
use crate::process::SandboxProcessHandle;
use crate::types::{ConsoleLine, StreamKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

/// Receives guest output, one complete line at a time.
pub trait LineSink: Send + Sync + 'static {
    fn on_line(&self, line: ConsoleLine);

    /// Called once when a stream reaches end of file.
    fn on_closed(&self, _stream: StreamKind) {}
}

impl<F> LineSink for F
where
    F: Fn(ConsoleLine) + Send + Sync + 'static,
{
    fn on_line(&self, line: ConsoleLine) {
        self(line)
    }
}

/// Serialized writer over the guest's standard input.
#[derive(Clone)]
pub struct ConsoleWriter {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl ConsoleWriter {
    fn new(stdin: Option<ChildStdin>) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
        }
    }

    /// Writes `text` followed by a newline as one contiguous write.
    pub async fn send(&self, text: &str) -> Result<(), ShimError> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ShimError::BrokenPipe)?;

        let result = match stdin.write_all(&buf).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::debug!("Guest input closed: {}", e);
            *guard = None;
            return Err(ShimError::BrokenPipe);
        }

        Ok(())
    }

    /// Closes the input stream. Later sends fail with `BrokenPipe`.
    pub async fn close(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take()
            && let Err(e) = stdin.shutdown().await
        {
            tracing::debug!("Failed to shut down guest input: {}", e);
        }
    }

    pub async fn is_open(&self) -> bool {
        self.stdin.lock().await.is_some()
    }
}

/// Line-oriented bridge between a guest process and its host-side console.
pub struct ConsoleBridge {
    writer: ConsoleWriter,
    readers: Vec<JoinHandle<()>>,
}

impl ConsoleBridge {
    /// Claims the process streams and starts one reader task per output stream.
    ///
    /// Lines from the same stream reach `sink` in the order the guest wrote them.
    /// Stdout and stderr are independent pipes and are not ordered relative to each other.
    pub fn attach<S: LineSink>(
        handle: &mut SandboxProcessHandle,
        sink: S,
    ) -> Result<Self, ShimError> {
        let stdout = handle.take_stdout().ok_or(ShimError::NotRunning)?;
        let stderr = handle.take_stderr().ok_or(ShimError::NotRunning)?;
        let writer = ConsoleWriter::new(handle.take_stdin());

        let sink: Arc<dyn LineSink> = Arc::new(sink);
        let readers = vec![
            tokio::spawn(read_lines(stdout, StreamKind::Stdout, sink.clone())),
            tokio::spawn(read_lines(stderr, StreamKind::Stderr, sink)),
        ];

        Ok(Self { writer, readers })
    }

    pub async fn send(&self, text: &str) -> Result<(), ShimError> {
        self.writer.send(text).await
    }

    /// A cloneable handle for sending from other tasks.
    pub fn writer(&self) -> ConsoleWriter {
        self.writer.clone()
    }

    pub async fn close_input(&self) {
        self.writer.close().await;
    }

    /// Waits for both readers to observe end of stream.
    pub async fn join(self) {
        for reader in self.readers {
            if let Err(e) = reader.await
                && !e.is_cancelled()
            {
                tracing::warn!("Console reader task failed: {}", e);
            }
        }
    }

    /// Like [`join`](Self::join), but aborts readers still blocked after `limit`.
    ///
    /// A guest that leaves background processes holding its output pipes never
    /// delivers EOF. Returns `false` if the readers had to be aborted.
    pub async fn join_within(self, limit: Duration) -> bool {
        let aborts: Vec<AbortHandle> = self.readers.iter().map(|r| r.abort_handle()).collect();
        match tokio::time::timeout(limit, self.join()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(limit = ?limit, "Console readers did not reach EOF, aborting");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

/// Output without a newline is delivered in pieces of at most this many bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

async fn read_lines<R>(stream: R, kind: StreamKind, sink: Arc<dyn LineSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                sink.on_line(ConsoleLine::new(kind, text));
            }
            Err(e) => {
                tracing::debug!(stream = %kind, "Console read failed: {}", e);
                break;
            }
        }
    }

    tracing::debug!(stream = %kind, "Console stream reached EOF");
    sink.on_closed(kind);
}
