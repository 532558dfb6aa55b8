/// Local terminal control: geometry and raw mode
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

use super::resize::ResizeEvent;

/// Operations the exec relay needs from the local terminal
pub trait Terminal: Send + Sync + 'static {
    /// Configuration captured before entering raw mode
    type State: Send + 'static;

    fn size(&self) -> io::Result<ResizeEvent>;

    /// Switch to raw mode, returning the configuration to restore later
    fn make_raw(&self) -> io::Result<Self::State>;

    fn restore(&self, state: Self::State) -> io::Result<()>;
}

/// The process's controlling terminal, driven through crossterm
#[derive(Debug, Clone, Copy, Default)]
pub struct CrosstermTerminal;

/// Raw-mode flag as it was before the session started
#[derive(Debug, Clone, Copy)]
pub struct SavedMode {
    was_raw: bool,
}

impl Terminal for CrosstermTerminal {
    type State = SavedMode;

    fn size(&self) -> io::Result<ResizeEvent> {
        let (columns, rows) = crossterm::terminal::size()?;
        Ok(ResizeEvent { columns, rows })
    }

    fn make_raw(&self) -> io::Result<SavedMode> {
        let was_raw = crossterm::terminal::is_raw_mode_enabled()?;
        if !was_raw {
            crossterm::terminal::enable_raw_mode()?;
        }
        Ok(SavedMode { was_raw })
    }

    fn restore(&self, state: SavedMode) -> io::Result<()> {
        if !state.was_raw {
            crossterm::terminal::disable_raw_mode()?;
        }
        Ok(())
    }
}

/// Raw mode held for the lifetime of an exec session.
///
/// The captured state is restored exactly once, by [`RawModeGuard::restore`]
/// or on drop, whichever comes first.
pub struct RawModeGuard<T: Terminal> {
    terminal: Arc<T>,
    saved: Option<T::State>,
}

impl<T: Terminal> RawModeGuard<T> {
    pub fn engage(terminal: Arc<T>) -> io::Result<Self> {
        let saved = terminal.make_raw()?;
        debug!("Terminal switched to raw mode");
        Ok(Self {
            terminal,
            saved: Some(saved),
        })
    }

    pub fn is_engaged(&self) -> bool {
        self.saved.is_some()
    }

    /// Restore the captured configuration. Failures are logged, not returned.
    pub fn restore(&mut self) {
        if let Some(saved) = self.saved.take() {
            match self.terminal.restore(saved) {
                Ok(()) => debug!("Terminal restored"),
                Err(e) => warn!("Error restoring terminal: {}", e),
            }
        }
    }
}

impl<T: Terminal> Drop for RawModeGuard<T> {
    fn drop(&mut self) {
        self.restore();
    }
}
