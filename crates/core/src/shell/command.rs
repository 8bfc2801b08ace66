//! Shell command builder and execution
//!
//! A [`ShellCommand`] accumulates settings, then [`ShellCommand::execute`]
//! validates them and returns a lazy [`ShellOutput`] stream. Nothing is sent
//! to the daemon until the stream is first polled.
//!
//! A running command is two tasks sharing one cancellation token:
//! - the session task: negotiation, connection, output reading, timeouts
//! - the stdin task (when stdin is set): forwards input to the command
//!
//! The first failure of either task is what the stream reports.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::device::CapabilityCache;
use crate::error::{CoreError, Result};
use crate::shell::collector::{
    BytesCollector, Emitter, LineBatchesCollector, LinesCollector, NoCollector,
    RawChannelsCollector, ShellCollector, TextCollector,
};
use crate::shell::demux::{demux_framed, demux_raw};
use crate::shell::first_cause::FirstCause;
use crate::shell::negotiate::{
    join_abb_args, negotiate, wire_command, ForcedProtocol, ProtocolFamily, ProtocolOverrides,
    ShellProtocol,
};
use crate::shell::stdin::StdinForwarder;
use crate::transport::{ActivityMonitor, InputChannel, ReaderInput, ServiceRunner};
use crate::types::DeviceSelector;

/// What a command needs from the client
#[derive(Clone)]
pub(crate) struct ShellContext {
    pub runner: ServiceRunner,
    pub capabilities: Arc<CapabilityCache>,
    pub config: ClientConfig,
}

type CommandOverride = Arc<dyn Fn(&str, ShellProtocol) -> String + Send + Sync>;

/// Builder of one shell or abb command
pub struct ShellCommand<C = NoCollector> {
    context: ShellContext,
    device: DeviceSelector,
    family: ProtocolFamily,
    command: String,
    abb_args: Vec<String>,
    collector: Option<C>,
    stdin: Option<Box<dyn InputChannel>>,
    overrides: ProtocolOverrides,
    command_timeout: Option<Duration>,
    output_timeout: Option<Duration>,
    buffer_size: usize,
    shutdown_output: bool,
    strip_crlf: bool,
    term: Option<String>,
    command_override: Option<CommandOverride>,
}

impl ShellCommand<NoCollector> {
    pub(crate) fn shell(context: ShellContext, device: DeviceSelector, command: String) -> Self {
        Self::new(context, device, ProtocolFamily::Shell, command, Vec::new())
    }

    pub(crate) fn abb(context: ShellContext, device: DeviceSelector, args: Vec<String>) -> Self {
        Self::new(context, device, ProtocolFamily::Abb, String::new(), args)
    }

    fn new(
        context: ShellContext,
        device: DeviceSelector,
        family: ProtocolFamily,
        command: String,
        abb_args: Vec<String>,
    ) -> Self {
        let buffer_size = context.config.buffer_size;
        let term = context.config.term.clone();
        Self {
            context,
            device,
            family,
            command,
            abb_args,
            collector: None,
            stdin: None,
            overrides: ProtocolOverrides::default(),
            command_timeout: None,
            output_timeout: None,
            buffer_size,
            shutdown_output: true,
            strip_crlf: true,
            term,
            command_override: None,
        }
    }
}

impl<C> ShellCommand<C> {
    /// Set the collector, replacing any previous one
    pub fn with_collector<D: ShellCollector>(self, collector: D) -> ShellCommand<D> {
        ShellCommand {
            context: self.context,
            device: self.device,
            family: self.family,
            command: self.command,
            abb_args: self.abb_args,
            collector: Some(collector),
            stdin: self.stdin,
            overrides: self.overrides,
            command_timeout: self.command_timeout,
            output_timeout: self.output_timeout,
            buffer_size: self.buffer_size,
            shutdown_output: self.shutdown_output,
            strip_crlf: self.strip_crlf,
            term: self.term,
            command_override: self.command_override,
        }
    }

    pub fn with_text_collector(self) -> ShellCommand<TextCollector> {
        self.with_collector(TextCollector::new())
    }

    pub fn with_bytes_collector(self) -> ShellCommand<BytesCollector> {
        self.with_collector(BytesCollector::new())
    }

    pub fn with_lines_collector(self) -> ShellCommand<LinesCollector> {
        self.with_collector(LinesCollector::new())
    }

    pub fn with_line_batches_collector(self) -> ShellCommand<LineBatchesCollector> {
        self.with_collector(LineBatchesCollector::new())
    }

    /// Expose output as pipes buffering at most `capacity` chunks each
    pub fn with_raw_channels_collector(self, capacity: usize) -> ShellCommand<RawChannelsCollector> {
        self.with_collector(RawChannelsCollector::new(capacity))
    }

    pub fn with_stdin(mut self, input: impl InputChannel + 'static) -> Self {
        self.stdin = Some(Box::new(input));
        self
    }

    pub fn with_stdin_reader<R>(self, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.with_stdin(ReaderInput::new(reader))
    }

    /// Abort the command once it has been running for `timeout`
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Abort the command after `timeout` without output or stdin activity
    pub fn with_command_output_timeout(mut self, timeout: Duration) -> Self {
        self.output_timeout = Some(timeout);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// `TERM` of shell_v2 commands
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    /// Rewrite the command once its protocol is known
    pub fn with_command_override<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, ShellProtocol) -> String + Send + Sync + 'static,
    {
        self.command_override = Some(Arc::new(f));
        self
    }

    pub fn allow_shell_v2(mut self, allow: bool) -> Self {
        self.overrides.allow_shell_v2 = allow;
        self
    }

    pub fn allow_legacy_exec(mut self, allow: bool) -> Self {
        self.overrides.allow_legacy_exec = allow;
        self
    }

    pub fn allow_legacy_shell(mut self, allow: bool) -> Self {
        self.overrides.allow_legacy_shell = allow;
        self
    }

    pub fn force_shell_v2(mut self) -> Self {
        self.overrides.forced = Some(ForcedProtocol::ShellV2);
        self
    }

    pub fn force_legacy_exec(mut self) -> Self {
        self.overrides.forced = Some(ForcedProtocol::LegacyExec);
        self
    }

    pub fn force_legacy_shell(mut self) -> Self {
        self.overrides.forced = Some(ForcedProtocol::LegacyShell);
        self
    }

    /// Half-close the channel once stdin is exhausted (legacy protocols)
    pub fn shutdown_output_for_legacy_shell(mut self, shutdown: bool) -> Self {
        self.shutdown_output = shutdown;
        self
    }

    /// Rewrite `\r\n` to `\n` for legacy shell on devices that emit it
    pub fn allow_strip_crlf_for_legacy_shell(mut self, strip: bool) -> Self {
        self.strip_crlf = strip;
        self
    }
}

impl<C> ShellCommand<C>
where
    C: ShellCollector + 'static,
{
    /// Validate the command and return its lazy output stream
    pub fn execute(self) -> Result<ShellOutput<C::Output>> {
        let Some(collector) = self.collector else {
            return Err(CoreError::InvalidArgument(
                "shell command has no collector".into(),
            ));
        };
        let command = match self.family {
            ProtocolFamily::Shell => self.command,
            ProtocolFamily::Abb => join_abb_args(&self.abb_args)?,
        };

        let cancel = CancellationToken::new();
        let session = ShellSession {
            context: self.context,
            device: self.device,
            family: self.family,
            command,
            stdin: self.stdin,
            overrides: self.overrides,
            output_timeout: self.output_timeout,
            buffer_size: self.buffer_size,
            shutdown_output: self.shutdown_output,
            strip_crlf: self.strip_crlf,
            term: self.term,
            command_override: self.command_override,
            cancel: cancel.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let run = session.run(collector, Emitter::new(tx), self.command_timeout);
        Ok(ShellOutput {
            rx,
            pending: Some(Box::pin(run)),
            cancel,
        })
    }

    /// Run `f` on the first output value while the command is still active
    ///
    /// Meant for collectors emitting a single value at start, such as
    /// [`RawChannelsCollector`]. The command is cancelled if it is still
    /// running once `f` returns.
    pub async fn execute_as_single_output<F, Fut, R>(self, f: F) -> Result<R>
    where
        F: FnOnce(C::Output) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut output = self.execute()?;
        let first = match output.next().await {
            Some(value) => value?,
            None => {
                return Err(CoreError::InvalidState(
                    "shell command ended without output".into(),
                ))
            }
        };
        f(first).await
    }
}

/// Everything a running command needs, moved into its task
struct ShellSession {
    context: ShellContext,
    device: DeviceSelector,
    family: ProtocolFamily,
    command: String,
    stdin: Option<Box<dyn InputChannel>>,
    overrides: ProtocolOverrides,
    output_timeout: Option<Duration>,
    buffer_size: usize,
    shutdown_output: bool,
    strip_crlf: bool,
    term: Option<String>,
    command_override: Option<CommandOverride>,
    cancel: CancellationToken,
}

impl ShellSession {
    async fn run<C: ShellCollector>(
        self,
        collector: C,
        emitter: Emitter<C::Output>,
        command_timeout: Option<Duration>,
    ) {
        let cancel = self.cancel.clone();
        let first_cause = Arc::new(FirstCause::new());
        let deadline = async {
            match command_timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled("shell command was cancelled".into())),
            timeout = deadline => {
                tracing::debug!("Shell command timed out after {}ms", timeout.as_millis());
                Err(CoreError::timeout(timeout))
            }
            result = self.session(collector, &emitter, first_cause.clone()) => result,
        };

        // Stops the stdin task in every outcome
        cancel.cancel();

        if let Err(err) = result {
            first_cause.record(err);
        }
        if let Some(err) = first_cause.take() {
            emitter.fail(err);
        }
    }

    async fn session<C: ShellCollector>(
        mut self,
        mut collector: C,
        emitter: &Emitter<C::Output>,
        first_cause: Arc<FirstCause>,
    ) -> Result<()> {
        let capabilities = self.context.capabilities.get(&self.device).await?;
        let protocol = negotiate(self.family, &capabilities, &self.overrides)?;
        let command = match &self.command_override {
            Some(rewrite) => rewrite(&self.command, protocol),
            None => self.command.clone(),
        };
        let service = wire_command(protocol, &command, self.term.as_deref());
        let strip_crlf =
            protocol == ShellProtocol::Shell && self.strip_crlf && capabilities.emits_crlf();

        tracing::debug!(
            "Device {} - executing {:?} over {} (buffer_size={})",
            self.device,
            command,
            protocol,
            self.buffer_size
        );
        let channel = self
            .context
            .runner
            .open_device_service(&self.device, &service)
            .await?;
        let (reader, writer) = tokio::io::split(channel);

        let buffer_size = self.buffer_size;
        let output_timeout = self.output_timeout;
        let activity = output_timeout.map(|_| ActivityMonitor::new());

        let stdin_cancel = self.cancel.child_token();
        let stdin_task = self.stdin.take().map(|input| {
            let forwarder = StdinForwarder {
                input,
                writer,
                framed: protocol.is_framed(),
                shutdown_output: self.shutdown_output,
                buffer_size,
                activity: activity.clone(),
            };
            let stdin_cancel = stdin_cancel.clone();
            let session_cancel = self.cancel.clone();
            let first_cause = first_cause.clone();
            tokio::spawn(async move {
                if let Err(err) = forwarder.run(stdin_cancel).await {
                    tracing::debug!("Stdin forwarding failed: {}", err);
                    first_cause.record(err);
                    session_cancel.cancel();
                }
            })
        });

        let output = async {
            if protocol.is_framed() {
                demux_framed(reader, &mut collector, emitter, activity.as_ref(), buffer_size)
                    .await
            } else {
                demux_raw(
                    reader,
                    &mut collector,
                    emitter,
                    activity.as_ref(),
                    strip_crlf,
                    buffer_size,
                )
                .await
            }
        };
        let watchdog = async {
            match (&activity, output_timeout) {
                (Some(activity), Some(timeout)) => {
                    activity.idle_for(timeout).await;
                    timeout
                }
                _ => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            result = output => result,
            timeout = watchdog => {
                tracing::debug!("No output for {}ms, aborting command", timeout.as_millis());
                Err(CoreError::timeout(timeout))
            }
        };

        // Input left unread once the command ended is of no use
        stdin_cancel.cancel();
        if let Some(task) = stdin_task {
            if let Err(err) = task.await {
                tracing::debug!("Stdin task did not finish: {}", err);
                first_cause.record(CoreError::InvalidState(format!(
                    "stdin forwarding task failed: {}",
                    err
                )));
            }
        }
        result
    }
}

/// Lazy output of an executed command
///
/// The command starts on first poll. Items are the collector's values in
/// emission order; a failure is the last item. Dropping the stream cancels
/// the command.
pub struct ShellOutput<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    pending: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    cancel: CancellationToken,
}

impl<T> ShellOutput<T> {
    /// Token cancelling the command; the stream then ends with
    /// [`CoreError::Cancelled`]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Unpin for ShellOutput<T> {}

impl<T> Stream for ShellOutput<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(run) = this.pending.take() {
            tokio::spawn(run);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> Drop for ShellOutput<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
