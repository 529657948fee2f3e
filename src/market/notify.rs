use crate::error::{Result, TickwatchError};
use log::info;
use std::io::Write;

/// Side channels an alert reaches out to. Both calls are fire-and-forget from
/// the caller's point of view: errors are reported, never retried.
pub trait Notifier: Send {
    fn play_sound(&self) -> Result<()>;
    fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Terminal bell for the sound, a log line for the notification
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn play_sound(&self) -> Result<()> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) -> Result<()> {
        if title.is_empty() {
            return Err(TickwatchError::NotifyError("empty title".to_string()));
        }
        info!(target: "notify", "{} {}", title, body);
        Ok(())
    }
}
