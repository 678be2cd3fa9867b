//! Process-boundary failure reporting.
//!
//! The host waits on our stdout. If the worker dies it must say so on stderr
//! in a form the host can parse, then exit non-zero instead of hanging.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::Write;

use serde::Serialize;
use tracing::error;

/// Exit code after a panic.
pub const EXIT_PANIC: i32 = 70;
/// Exit code after a top-level error.
pub const EXIT_ERROR: i32 = 1;

/// `{"fatal": {...}}`, written as one line to stderr.
#[derive(Debug, Serialize)]
pub struct FatalEnvelope {
    pub fatal: FatalReport,
}

#[derive(Debug, Serialize)]
pub struct FatalReport {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl FatalEnvelope {
    pub fn panic(message: String, location: Option<String>, backtrace: &Backtrace) -> Self {
        Self {
            fatal: FatalReport {
                kind: "panic",
                message,
                location,
                stack: render_backtrace(backtrace),
            },
        }
    }

    pub fn error(error: &anyhow::Error) -> Self {
        Self {
            fatal: FatalReport {
                kind: "error",
                message: format!("{error:#}"),
                location: None,
                stack: render_backtrace(error.backtrace()),
            },
        }
    }

    /// Write the envelope as a single stderr line.
    pub fn emit(&self) {
        let line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"fatal":{"type":"error","message":"unserializable fatal report"}}"#.to_string()
        });
        let mut stderr = std::io::stderr().lock();
        // Nothing else can be done if stderr is gone.
        let _ = writeln!(stderr, "{line}");
        let _ = stderr.flush();
    }
}

/// Report panics from any thread or task and terminate the process.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = panic_message(info.payload());
        let location = info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()));
        error!(message = %message, location = ?location, "Worker panicked");

        FatalEnvelope::panic(message, location, &Backtrace::capture()).emit();
        std::process::exit(EXIT_PANIC);
    }));
}

/// Report a top-level error and return the exit code to use.
pub fn report_error(error: &anyhow::Error) -> i32 {
    error!(error = %format!("{error:#}"), "Worker failed");
    FatalEnvelope::error(error).emit();
    EXIT_ERROR
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_string())
}

fn render_backtrace(backtrace: &Backtrace) -> Option<String> {
    (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
}
