/// Interactive exec relay
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::resize::{resize_channel, watch_resizes, ResizeNotifications};
use super::terminal::{RawModeGuard, Terminal};
use super::transport::{BoxedReader, BoxedWriter, ExecRequest, ExecStream, ExecTransport, ExitStatus};
use super::ExecError;

/// How long a closed transport gets to report its final status
const CLOSE_GRACE: Duration = Duration::from_secs(2);

const COPY_BUFFER_SIZE: usize = 4096;

/// Local byte streams wired to the remote process
pub struct LocalIo {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
}

impl LocalIo {
    /// The process's own stdin, stdout and stderr
    pub fn std() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// Runs one exec session against a transport
pub struct ExecRelay<T: Terminal> {
    terminal: Arc<T>,
    notifications: Option<ResizeNotifications>,
    close_grace: Duration,
}

impl<T: Terminal> ExecRelay<T> {
    pub fn new(terminal: Arc<T>) -> Self {
        Self {
            terminal,
            notifications: None,
            close_grace: CLOSE_GRACE,
        }
    }

    /// Source of local resize notifications for tty sessions
    pub fn with_resize_notifications(mut self, notifications: ResizeNotifications) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// How long a cancelled session waits for the transport's final status
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Run `request` until the remote process exits, the stream fails or `cancel` fires.
    ///
    /// The terminal is back in its original mode and the resize watcher has
    /// stopped by the time this returns, on every path.
    pub async fn run<X>(
        self,
        transport: &X,
        request: &ExecRequest,
        io: LocalIo,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, ExecError>
    where
        X: ExecTransport + ?Sized,
    {
        let mut session = ExecSession::new(self.terminal, cancel.child_token(), self.close_grace);
        let result = session
            .drive(transport, request, self.notifications, io, cancel)
            .await;
        session.close().await;

        match &result {
            Ok(status) => debug!("Exec in {} finished with code {}", request.pod, status.code),
            Err(e) => debug!("Exec in {} ended: {}", request.pod, e),
        }
        result
    }
}

/// Resources held while a session is live
struct ExecSession<T: Terminal> {
    terminal: Arc<T>,
    raw_mode: Option<RawModeGuard<T>>,
    stream: Option<ExecStream>,
    stdin_pump: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    watcher_stop: CancellationToken,
    close_grace: Duration,
}

impl<T: Terminal> ExecSession<T> {
    fn new(terminal: Arc<T>, watcher_stop: CancellationToken, close_grace: Duration) -> Self {
        Self {
            terminal,
            raw_mode: None,
            stream: None,
            stdin_pump: None,
            watcher: None,
            watcher_stop,
            close_grace,
        }
    }

    async fn drive<X>(
        &mut self,
        transport: &X,
        request: &ExecRequest,
        notifications: Option<ResizeNotifications>,
        io: LocalIo,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, ExecError>
    where
        X: ExecTransport + ?Sized,
    {
        let options = request.options;

        let resize = if options.tty {
            let guard = RawModeGuard::engage(self.terminal.clone()).map_err(ExecError::RawMode)?;
            self.raw_mode = Some(guard);

            // The remote side must know the geometry before it produces output
            let (sender, receiver) = resize_channel();
            match self.terminal.size() {
                Ok(size) => sender.push(size),
                Err(e) => debug!("Could not read initial terminal size: {}", e),
            }

            let notifications =
                notifications.unwrap_or_else(|| futures::stream::pending().boxed());
            self.watcher = Some(tokio::spawn(watch_resizes(
                self.terminal.clone(),
                notifications,
                sender,
                self.watcher_stop.clone(),
            )));
            Some(receiver)
        } else {
            None
        };

        let stream = tokio::select! {
            opened = transport.open(request, resize) => opened?,
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        };
        let stream = self.stream.insert(stream);

        let LocalIo {
            stdin,
            mut stdout,
            mut stderr,
        } = io;

        // Dropping the remote stdin closes it; local input is then never read
        match stream.stdin.take() {
            Some(remote_stdin) if options.stdin => {
                self.stdin_pump = Some(tokio::spawn(pump_stdin(stdin, remote_stdin)));
            }
            _ => debug!("Local stdin is not forwarded"),
        }

        let finished = tokio::select! {
            result = relay_output(stream, &mut stdout, &mut stderr) => Some(result),
            _ = cancel.cancelled() => None,
        };

        match finished {
            Some(result) => result,
            None => {
                debug!("Exec session cancelled, closing stream");
                self.stop_stream().await;
                Err(ExecError::Cancelled)
            }
        }
    }

    /// Tear down, then give the transport a bounded time to report its final status
    async fn stop_stream(&mut self) {
        self.begin_teardown();
        let grace = self.close_grace;
        if let Some(stream) = self.stream.as_mut() {
            if tokio::time::timeout(grace, stream.wait()).await.is_err() {
                debug!("Exec transport did not stop within {:?}", grace);
            }
        }
    }

    /// Stop the transport, stop the watcher and restore the terminal, in that order.
    fn begin_teardown(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
        self.watcher_stop.cancel();
        if let Some(pump) = self.stdin_pump.take() {
            pump.abort();
        }
        if let Some(mut raw_mode) = self.raw_mode.take() {
            raw_mode.restore();
        }
    }

    async fn close(&mut self) {
        self.begin_teardown();
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!("Resize watcher failed: {}", e);
            }
        }
    }
}

impl<T: Terminal> Drop for ExecSession<T> {
    fn drop(&mut self) {
        self.begin_teardown();
    }
}

/// Copy remote output to the local streams, then collect the exit status
async fn relay_output(
    stream: &mut ExecStream,
    stdout: &mut BoxedWriter,
    stderr: &mut BoxedWriter,
) -> Result<ExitStatus, ExecError> {
    let (out, err) = tokio::join!(
        copy_output(stream.stdout.take(), stdout),
        copy_output(stream.stderr.take(), stderr)
    );
    out?;
    err?;
    stream.wait().await
}

async fn copy_output(reader: Option<BoxedReader>, out: &mut BoxedWriter) -> std::io::Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        out.write_all(&buf[..n]).await?;
        out.flush().await?;
    }
}

async fn pump_stdin(mut local: BoxedReader, mut remote: BoxedWriter) {
    match tokio::io::copy(&mut local, &mut remote).await {
        Ok(bytes) => debug!("Local stdin closed after {} bytes", bytes),
        Err(e) => debug!("Stopped forwarding stdin: {}", e),
    }
    if let Err(e) = remote.shutdown().await {
        debug!("Could not close remote stdin: {}", e);
    }
}
