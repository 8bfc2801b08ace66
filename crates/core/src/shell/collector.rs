//! Shell output collectors
//!
//! A collector turns the demultiplexed output of one command into a sequence
//! of values. It sees exactly one `Start`, any number of `Stdout`/`Stderr`
//! chunks in wire order, then exactly one `End` when the command completes.
//! On failure or cancellation the collector is dropped without `End`; the
//! error is the last item of the output stream.
//!
//! Values go out through an [`Emitter`], which never blocks: a slow consumer
//! cannot stall the protocol reader. Collectors that need consumer pacing
//! (see [`RawChannelsCollector`]) apply it on their own data path.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::marker::PhantomData;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::{CoreError, Result};
use crate::shell::pipe::{OutputPipe, ShellPipe};
use crate::types::{
    BatchShellCommandOutputElement, ShellBytesOutput, ShellCommandOutput,
    ShellCommandOutputElement,
};

/// One step of a command's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorEvent<'a> {
    Start,
    Stdout(&'a [u8]),
    Stderr(&'a [u8]),
    /// Legacy protocols have no exit code and always report `0`
    End { exit_code: i32 },
}

/// Sending side of a command's output stream
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<Result<T>>,
}

impl<T> Emitter<T> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Result<T>>) -> Self {
        Self { tx }
    }

    /// Queue a value for the consumer
    ///
    /// Values emitted after the consumer went away are dropped.
    pub fn emit(&self, value: T) {
        if self.tx.send(Ok(value)).is_err() {
            tracing::trace!("Shell output consumer is gone, dropping value");
        }
    }

    pub(crate) fn fail(&self, err: CoreError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Sink for the output of one command
#[async_trait]
pub trait ShellCollector: Send {
    type Output: Send + 'static;

    async fn handle(
        &mut self,
        event: CollectorEvent<'_>,
        emitter: &Emitter<Self::Output>,
    ) -> Result<()>;
}

/// Placeholder of a command without a collector
///
/// Uninhabited: executing a command with it fails validation.
#[derive(Debug)]
pub enum NoCollector {}

#[async_trait]
impl ShellCollector for NoCollector {
    type Output = ();

    async fn handle(&mut self, _event: CollectorEvent<'_>, _emitter: &Emitter<()>) -> Result<()> {
        match *self {}
    }
}

/// Collects all output into one [`ShellBytesOutput`]
#[derive(Debug, Default)]
pub struct BytesCollector {
    stdout: BytesMut,
    stderr: BytesMut,
}

impl BytesCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShellCollector for BytesCollector {
    type Output = ShellBytesOutput;

    async fn handle(
        &mut self,
        event: CollectorEvent<'_>,
        emitter: &Emitter<ShellBytesOutput>,
    ) -> Result<()> {
        match event {
            CollectorEvent::Start => {}
            CollectorEvent::Stdout(data) => self.stdout.extend_from_slice(data),
            CollectorEvent::Stderr(data) => self.stderr.extend_from_slice(data),
            CollectorEvent::End { exit_code } => emitter.emit(ShellBytesOutput {
                stdout: std::mem::take(&mut self.stdout).freeze(),
                stderr: std::mem::take(&mut self.stderr).freeze(),
                exit_code,
            }),
        }
        Ok(())
    }
}

/// Collects all output into one [`ShellCommandOutput`]
///
/// Invalid UTF-8 is replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct TextCollector {
    bytes: BytesCollector,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShellCollector for TextCollector {
    type Output = ShellCommandOutput;

    async fn handle(
        &mut self,
        event: CollectorEvent<'_>,
        emitter: &Emitter<ShellCommandOutput>,
    ) -> Result<()> {
        match event {
            CollectorEvent::Start => {}
            CollectorEvent::Stdout(data) => self.bytes.stdout.extend_from_slice(data),
            CollectorEvent::Stderr(data) => self.bytes.stderr.extend_from_slice(data),
            CollectorEvent::End { exit_code } => emitter.emit(ShellCommandOutput {
                stdout: String::from_utf8_lossy(&self.bytes.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&self.bytes.stderr).into_owned(),
                exit_code,
            }),
        }
        Ok(())
    }
}

/// Splits a byte stream into `\n` terminated lines
///
/// The unterminated tail is kept across chunks. Splitting happens on bytes,
/// so a multi-byte character cut by a chunk boundary is decoded whole.
#[derive(Debug, Default)]
struct LineSplitter {
    tail: Vec<u8>,
    seen_data: bool,
}

impl LineSplitter {
    fn push(&mut self, data: &[u8], lines: &mut Vec<String>) {
        if data.is_empty() {
            return;
        }
        self.seen_data = true;

        let mut rest = data;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.tail.extend_from_slice(&rest[..pos]);
            lines.push(String::from_utf8_lossy(&self.tail).into_owned());
            self.tail.clear();
            rest = &rest[pos + 1..];
        }
        self.tail.extend_from_slice(rest);
    }

    /// Text after the last `\n`, possibly empty
    fn finish(&mut self) -> String {
        let last = String::from_utf8_lossy(&self.tail).into_owned();
        self.tail.clear();
        last
    }
}

/// Emits one [`ShellCommandOutputElement`] per line, in wire order
///
/// At the end the text after the last stdout `\n` is emitted as a final
/// stdout line (empty when the output ended with `\n`), followed by the
/// stderr remainder if the command wrote to stderr, then the exit code.
/// Only complete lines keep their wire order across the two streams; the
/// unterminated remainders always come stdout first.
#[derive(Debug, Default)]
pub struct LinesCollector {
    stdout: LineSplitter,
    stderr: LineSplitter,
    scratch: Vec<String>,
}

impl LinesCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShellCollector for LinesCollector {
    type Output = ShellCommandOutputElement;

    async fn handle(
        &mut self,
        event: CollectorEvent<'_>,
        emitter: &Emitter<ShellCommandOutputElement>,
    ) -> Result<()> {
        match event {
            CollectorEvent::Start => {}
            CollectorEvent::Stdout(data) => {
                self.stdout.push(data, &mut self.scratch);
                for line in self.scratch.drain(..) {
                    emitter.emit(ShellCommandOutputElement::StdoutLine(line));
                }
            }
            CollectorEvent::Stderr(data) => {
                self.stderr.push(data, &mut self.scratch);
                for line in self.scratch.drain(..) {
                    emitter.emit(ShellCommandOutputElement::StderrLine(line));
                }
            }
            CollectorEvent::End { exit_code } => {
                emitter.emit(ShellCommandOutputElement::StdoutLine(self.stdout.finish()));
                if self.stderr.seen_data {
                    emitter.emit(ShellCommandOutputElement::StderrLine(self.stderr.finish()));
                }
                emitter.emit(ShellCommandOutputElement::ExitCode(exit_code));
            }
        }
        Ok(())
    }
}

/// Emits all complete lines of a chunk as one element
///
/// End-of-stream handling mirrors [`LinesCollector`].
#[derive(Debug, Default)]
pub struct LineBatchesCollector {
    stdout: LineSplitter,
    stderr: LineSplitter,
}

impl LineBatchesCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShellCollector for LineBatchesCollector {
    type Output = BatchShellCommandOutputElement;

    async fn handle(
        &mut self,
        event: CollectorEvent<'_>,
        emitter: &Emitter<BatchShellCommandOutputElement>,
    ) -> Result<()> {
        match event {
            CollectorEvent::Start => {}
            CollectorEvent::Stdout(data) => {
                let mut lines = Vec::new();
                self.stdout.push(data, &mut lines);
                if !lines.is_empty() {
                    emitter.emit(BatchShellCommandOutputElement::StdoutLines(lines));
                }
            }
            CollectorEvent::Stderr(data) => {
                let mut lines = Vec::new();
                self.stderr.push(data, &mut lines);
                if !lines.is_empty() {
                    emitter.emit(BatchShellCommandOutputElement::StderrLines(lines));
                }
            }
            CollectorEvent::End { exit_code } => {
                emitter.emit(BatchShellCommandOutputElement::StdoutLines(vec![
                    self.stdout.finish()
                ]));
                if self.stderr.seen_data {
                    emitter.emit(BatchShellCommandOutputElement::StderrLines(vec![
                        self.stderr.finish()
                    ]));
                }
                emitter.emit(BatchShellCommandOutputElement::ExitCode(exit_code));
            }
        }
        Ok(())
    }
}

/// Exit code of a command whose output is read through pipes
pub struct ExitCodeReceiver {
    rx: oneshot::Receiver<i32>,
}

impl ExitCodeReceiver {
    /// Wait for the command to end
    pub async fn wait(self) -> Result<i32> {
        self.rx.await.map_err(|_| {
            CoreError::InvalidState("shell command ended without an exit code".into())
        })
    }
}

/// Output of a command as independently readable pipes
pub struct RawShellOutput {
    pub stdout: ShellPipe,
    pub stderr: ShellPipe,
    pub exit_code: ExitCodeReceiver,
}

/// Exposes stdout and stderr as [`ShellPipe`]s
///
/// Emits a single [`RawShellOutput`] at start. Each pipe buffers at most
/// `capacity` chunks; once full, reading the command output waits for the
/// caller to drain. Pipes that were dropped are skipped.
///
/// If the command fails before completing, both pipes end with an
/// [`io::ErrorKind::BrokenPipe`] error after the data they already carry.
pub struct RawChannelsCollector {
    capacity: usize,
    stdout: Option<OutputPipe>,
    stderr: Option<OutputPipe>,
    exit_code: Option<oneshot::Sender<i32>>,
}

impl RawChannelsCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stdout: None,
            stderr: None,
            exit_code: None,
        }
    }
}

impl Default for RawChannelsCollector {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl ShellCollector for RawChannelsCollector {
    type Output = RawShellOutput;

    async fn handle(
        &mut self,
        event: CollectorEvent<'_>,
        emitter: &Emitter<RawShellOutput>,
    ) -> Result<()> {
        match event {
            CollectorEvent::Start => {
                let (stdout, stdout_reader) = OutputPipe::new(self.capacity);
                let (stderr, stderr_reader) = OutputPipe::new(self.capacity);
                let (exit_tx, exit_rx) = oneshot::channel();
                self.stdout = Some(stdout);
                self.stderr = Some(stderr);
                self.exit_code = Some(exit_tx);
                emitter.emit(RawShellOutput {
                    stdout: stdout_reader,
                    stderr: stderr_reader,
                    exit_code: ExitCodeReceiver { rx: exit_rx },
                });
            }
            CollectorEvent::Stdout(data) => {
                if let Some(pipe) = &self.stdout {
                    pipe.send(Bytes::copy_from_slice(data)).await;
                }
            }
            CollectorEvent::Stderr(data) => {
                if let Some(pipe) = &self.stderr {
                    pipe.send(Bytes::copy_from_slice(data)).await;
                }
            }
            CollectorEvent::End { exit_code } => {
                // Dropping the writers ends both pipes
                self.stdout = None;
                self.stderr = None;
                if let Some(tx) = self.exit_code.take() {
                    let _ = tx.send(exit_code);
                }
            }
        }
        Ok(())
    }
}

impl Drop for RawChannelsCollector {
    fn drop(&mut self) {
        // Pipes still open here never saw `End`
        for pipe in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            pipe.abort(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "shell command failed before completing",
            ));
        }
    }
}

/// Copies stdout and stderr to async writers and emits the exit code
pub struct WriterCollector<O, E> {
    stdout: O,
    stderr: E,
}

impl<O, E> WriterCollector<O, E> {
    pub fn new(stdout: O, stderr: E) -> Self {
        Self { stdout, stderr }
    }
}

#[async_trait]
impl<O, E> ShellCollector for WriterCollector<O, E>
where
    O: AsyncWrite + Send + Unpin,
    E: AsyncWrite + Send + Unpin,
{
    type Output = i32;

    async fn handle(&mut self, event: CollectorEvent<'_>, emitter: &Emitter<i32>) -> Result<()> {
        match event {
            CollectorEvent::Start => {}
            CollectorEvent::Stdout(data) => {
                self.stdout.write_all(data).await?;
                self.stdout.flush().await?;
            }
            CollectorEvent::Stderr(data) => {
                self.stderr.write_all(data).await?;
                self.stderr.flush().await?;
            }
            CollectorEvent::End { exit_code } => emitter.emit(exit_code),
        }
        Ok(())
    }
}

/// Collector backed by a closure
pub struct FnCollector<T, F> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

impl<T, F> FnCollector<T, F>
where
    F: FnMut(CollectorEvent<'_>, &Emitter<T>) -> Result<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> ShellCollector for FnCollector<T, F>
where
    T: Send + 'static,
    F: FnMut(CollectorEvent<'_>, &Emitter<T>) -> Result<()> + Send,
{
    type Output = T;

    async fn handle(&mut self, event: CollectorEvent<'_>, emitter: &Emitter<T>) -> Result<()> {
        (self.f)(event, emitter)
    }
}
