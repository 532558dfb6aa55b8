/// Exec transport over the Kubernetes websocket exec API
use async_trait::async_trait;
use futures::SinkExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, TerminalSize};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::resize::{ResizeEvent, ResizeReceiver};
use super::transport::{BoxedReader, BoxedWriter, ExecRequest, ExecStream, ExecTransport, ExitStatus};
use super::ExecError;

impl From<ResizeEvent> for TerminalSize {
    fn from(event: ResizeEvent) -> Self {
        TerminalSize {
            width: event.columns,
            height: event.rows,
        }
    }
}

/// kube-rs `pods/exec` transport
#[derive(Clone)]
pub struct WebSocketTransport {
    client: Client,
}

impl WebSocketTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn attach_params(request: &ExecRequest) -> AttachParams {
        let options = request.options;
        // A pty merges stderr into stdout, and the API rejects tty with stderr
        let mut params = AttachParams::default()
            .stdin(options.stdin)
            .stdout(true)
            .stderr(!options.tty)
            .tty(options.tty);
        if let Some(container) = &request.container {
            params = params.container(container.clone());
        }
        params
    }
}

#[async_trait]
impl ExecTransport for WebSocketTransport {
    async fn open(
        &self,
        request: &ExecRequest,
        resize: Option<ResizeReceiver>,
    ) -> Result<ExecStream, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let params = Self::attach_params(request);

        debug!(
            "Opening exec into {}/{} ({:?}) with {:?}",
            request.namespace, request.pod, request.container, request.options
        );
        let mut attached = pods
            .exec(&request.pod, request.command.clone(), &params)
            .await
            .map_err(|e| ExecError::Open {
                pod: request.pod.clone(),
                source: Box::new(e),
            })?;

        if let (Some(mut sizes), Some(mut sink)) = (resize, attached.terminal_size()) {
            if let Some(initial) = sizes.try_next() {
                if let Err(e) = sink.send(initial.into()).await {
                    debug!("Could not send initial terminal size: {}", e);
                }
            }
            tokio::spawn(async move {
                while let Some(size) = sizes.next().await {
                    if sink.send(size.into()).await.is_err() {
                        break;
                    }
                }
            });
        }

        let stdin = attached.stdin().map(|w| Box::new(w) as BoxedWriter);
        let stdout = attached.stdout().map(|r| Box::new(r) as BoxedReader);
        let stderr = attached.stderr().map(|r| Box::new(r) as BoxedReader);
        let status = attached.take_status();

        let abort = CancellationToken::new();
        let aborted = abort.clone();
        // Runs detached so a close aborts the process even if the stream is just dropped
        let mut stream = ExecStream::spawned(async move {
            let Some(status) = status else {
                return attached
                    .join()
                    .await
                    .map(|()| ExitStatus::SUCCESS)
                    .map_err(|e| ExecError::Transport(e.to_string()));
            };

            tokio::select! {
                status = status => {
                    let joined = attached.join().await;
                    match status {
                        Some(status) => exit_status(&status),
                        None => joined
                            .map(|()| ExitStatus::SUCCESS)
                            .map_err(|e| ExecError::Transport(e.to_string())),
                    }
                }
                _ = aborted.cancelled() => {
                    attached.abort();
                    Err(ExecError::Cancelled)
                }
            }
        })
        .on_close(move || abort.cancel());

        stream.stdin = stdin;
        stream.stdout = stdout;
        stream.stderr = stderr;
        Ok(stream)
    }
}

/// Map the API's final `Status` to a process exit status
fn exit_status(status: &Status) -> Result<ExitStatus, ExecError> {
    if status.status.as_deref() == Some("Success") {
        return Ok(ExitStatus::SUCCESS);
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .into_iter()
            .flatten()
            .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
            .and_then(|cause| cause.message.as_deref())
            .and_then(|message| message.parse::<i32>().ok());
        if let Some(code) = code {
            return Ok(ExitStatus { code });
        }
    }

    Err(ExecError::Remote(
        status
            .message
            .clone()
            .unwrap_or_else(|| "command failed without a message".to_string()),
    ))
}
