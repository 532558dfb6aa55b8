/// Exec transport abstraction: a bidirectional stream into one container
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

use super::resize::ResizeReceiver;
use super::ExecError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Channels requested for an exec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Attach local input to the remote process
    pub stdin: bool,
    /// Allocate a pseudo-terminal on the remote side
    pub tty: bool,
}

/// What to run and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub pod: String,
    pub namespace: String,
    /// `None` selects the pod's default container
    pub container: Option<String>,
    pub command: Vec<String>,
    pub options: ExecOptions,
}

/// Exit status of the remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
}

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus { code: 0 };

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Live exec stream handed out by an [`ExecTransport`]
pub struct ExecStream {
    pub stdin: Option<BoxedWriter>,
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
    status: Option<BoxFuture<'static, Result<ExitStatus, ExecError>>>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl ExecStream {
    /// `status` resolves once the remote process has exited or the stream failed
    pub fn new<F>(status: F) -> Self
    where
        F: Future<Output = Result<ExitStatus, ExecError>> + Send + 'static,
    {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            status: Some(status.boxed()),
            closer: None,
        }
    }

    /// Like [`ExecStream::new`], but `status` is driven on its own task.
    ///
    /// Work `status` does in response to [`ExecStream::close`] then happens
    /// even if the stream is dropped without anyone waiting on it.
    pub fn spawned<F>(status: F) -> Self
    where
        F: Future<Output = Result<ExitStatus, ExecError>> + Send + 'static,
    {
        let task = tokio::spawn(status);
        Self::new(async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ExecError::Transport(format!("exec task failed: {}", e))),
            }
        })
    }

    pub fn with_stdin(mut self, stdin: BoxedWriter) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_stdout(mut self, stdout: BoxedReader) -> Self {
        self.stdout = Some(stdout);
        self
    }

    pub fn with_stderr(mut self, stderr: BoxedReader) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Hook run by [`ExecStream::close`] to stop the transport
    pub fn on_close<F>(mut self, close: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.closer = Some(Box::new(close));
        self
    }

    /// Wait for the remote process to finish. Safe to cancel and call again.
    pub async fn wait(&mut self) -> Result<ExitStatus, ExecError> {
        let status = match self.status.as_mut() {
            Some(status) => status.await,
            None => return Err(ExecError::Transport("exec stream already finished".into())),
        };
        self.status = None;
        status
    }

    /// Ask the transport to stop. Only the first call has an effect.
    pub fn close(&mut self) {
        if let Some(close) = self.closer.take() {
            close();
        }
    }
}

/// Opens exec streams into running containers
#[async_trait]
pub trait ExecTransport: Send + Sync {
    /// Start `request.command` in the target container.
    ///
    /// With a tty, `resize` carries terminal geometry; any event pending in it
    /// must reach the remote side before this returns.
    async fn open(
        &self,
        request: &ExecRequest,
        resize: Option<ResizeReceiver>,
    ) -> Result<ExecStream, ExecError>;
}
