/// Interactive exec into a single container
///
/// The relay owns the local terminal for the duration of a session: it puts
/// it into raw mode when a tty is requested, forwards terminal resizes to the
/// remote side and ferries stdin/stdout/stderr until the remote process exits.
pub mod relay;
pub mod resize;
pub mod terminal;
pub mod transport;
pub mod websocket;

use thiserror::Error;

pub use relay::{ExecRelay, LocalIo};
pub use resize::window_change_notifications;
pub use terminal::CrosstermTerminal;
pub use transport::{ExecOptions, ExecRequest};
pub use websocket::WebSocketTransport;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to put terminal into raw mode: {0}")]
    RawMode(#[source] std::io::Error),

    #[error("Failed to open exec stream to pod {pod}: {source}")]
    Open {
        pod: String,
        #[source]
        source: BoxError,
    },

    #[error("Exec stream I/O failed: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Exec transport failed: {0}")]
    Transport(String),

    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error("Exec session cancelled")]
    Cancelled,
}
