/// Terminal geometry updates for an exec session
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::terminal::Terminal;

/// New local terminal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub columns: u16,
    pub rows: u16,
}

/// Single-slot mailbox between the resize watcher and the transport.
///
/// A push never waits: it replaces any event the consumer has not taken yet,
/// so only the latest geometry is ever delivered.
pub fn resize_channel() -> (ResizeSender, ResizeReceiver) {
    let (tx, rx) = watch::channel(None);
    (ResizeSender(tx), ResizeReceiver(rx))
}

/// Producing half of [`resize_channel`]
#[derive(Debug)]
pub struct ResizeSender(watch::Sender<Option<ResizeEvent>>);

impl ResizeSender {
    pub fn push(&self, event: ResizeEvent) {
        self.0.send_replace(Some(event));
    }
}

/// Consuming half of [`resize_channel`]
#[derive(Debug)]
pub struct ResizeReceiver(watch::Receiver<Option<ResizeEvent>>);

impl ResizeReceiver {
    /// Wait for the next event. `None` once the sender is gone and nothing is pending.
    pub async fn next(&mut self) -> Option<ResizeEvent> {
        loop {
            self.0.changed().await.ok()?;
            if let Some(event) = *self.0.borrow_and_update() {
                return Some(event);
            }
        }
    }

    /// Take the pending event, if any, without waiting
    pub fn try_next(&mut self) -> Option<ResizeEvent> {
        if self.0.has_changed().unwrap_or(false) {
            *self.0.borrow_and_update()
        } else {
            None
        }
    }
}

/// Stream of "the local terminal was resized" notifications
pub type ResizeNotifications = BoxStream<'static, ()>;

/// SIGWINCH notifications for the controlling terminal
#[cfg(unix)]
pub fn window_change_notifications() -> std::io::Result<ResizeNotifications> {
    use tokio::signal::unix::{signal, SignalKind};

    let winch = signal(SignalKind::window_change())?;
    Ok(futures::stream::unfold(winch, |mut winch| async move {
        winch.recv().await.map(|()| ((), winch))
    })
    .boxed())
}

#[cfg(not(unix))]
pub fn window_change_notifications() -> std::io::Result<ResizeNotifications> {
    Ok(futures::stream::pending().boxed())
}

/// Push the current terminal size into `sender` on every notification until `stop` fires.
///
/// Size query failures skip that notification.
pub async fn watch_resizes<T: Terminal>(
    terminal: Arc<T>,
    mut notifications: ResizeNotifications,
    sender: ResizeSender,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            notified = notifications.next() => {
                if notified.is_none() {
                    break;
                }
                match terminal.size() {
                    Ok(size) => {
                        debug!("Terminal resized to {}x{}", size.columns, size.rows);
                        sender.push(size);
                    }
                    Err(e) => debug!("Skipping resize, cannot read terminal size: {}", e),
                }
            }
        }
    }
    debug!("Resize watcher stopped");
}
