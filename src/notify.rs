//! User-facing notifications, decoupled from the terminal so the upload
//! sequence and services can report progress without knowing who listens.

use tracing::{error, info, warn};

pub trait NotificationSink: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    /// Progress line without notification weight.
    fn append_line(&self, line: &str);
}

/// Terminal sink: messages go to stdout/stderr and are mirrored into the
/// structured log.
pub struct ConsoleSink {
    quiet: bool,
}

impl ConsoleSink {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl NotificationSink for ConsoleSink {
    fn info(&self, message: &str) {
        info!("{message}");
        if !self.quiet {
            println!("{message}");
        }
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
        if !self.quiet {
            eprintln!("warning: {message}");
        }
    }

    fn error(&self, message: &str) {
        error!("{message}");
        eprintln!("error: {message}");
    }

    fn append_line(&self, line: &str) {
        info!("{line}");
        if !self.quiet {
            println!("{line}");
        }
    }
}
