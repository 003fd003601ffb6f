use std::fmt::Display;
use std::fs::File;
use std::io::{stderr, stdout, Stderr, Stdout, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::common::Res;
use crate::EngineError;

/// Collaborator interface for observing the engine conversation. All methods are
/// best-effort with no-op defaults; nothing here may fail back into the core, and
/// the dispatch loop keeps running no matter what a logger does.
pub trait EngineLogger: Send + Sync {
    /// A complete line received from the engine's stdout.
    fn message_from_engine(&self, _line: &str) {}

    /// A complete line about to be written to the engine's stdin.
    fn message_to_engine(&self, _line: &str) {}

    fn log(&self, _tag: &str, _message: &str) {}

    /// A recoverable failure inside the transport or the dispatch loop.
    fn handle_error(&self, _error: &dyn Display) {}
}

#[derive(Debug, Default)]
pub struct NoopLogger;

impl EngineLogger for NoopLogger {}

#[derive(Debug)]
pub enum TextStream {
    File(File, String), // Don't use a BufWriter to ensure the log is always up-to-date.
    Stdout(Stdout),
    Stderr(Stderr),
}

impl TextStream {
    pub fn write(&mut self, prefix: &str, msg: &str) {
        _ = writeln!(self.stream(), "{prefix} {msg}");
    }

    pub fn stream(&mut self) -> &mut dyn Write {
        match self {
            TextStream::File(f, _) => f,
            TextStream::Stdout(out) => out,
            TextStream::Stderr(err) => err,
        }
    }

    pub fn from_name(name: &str) -> Res<Self> {
        match name {
            "stdout" => Ok(TextStream::Stdout(stdout())),
            "stderr" => Ok(TextStream::Stderr(stderr())),
            s => Self::from_filename(s),
        }
    }

    pub fn from_filename(name: &str) -> Res<Self> {
        if !name.contains('.') {
            // Files don't have to contain a '.', but requiring one is a good way to
            // catch typos where the user didn't mean to specify a file name.
            return Err(EngineError::Parse {
                name: "log stream (expected a filename, 'stdout' or 'stderr')".to_string(),
                text: name.to_string(),
            });
        }
        let path = Path::new(name);
        let file = File::create(path).map_err(|err| EngineError::Parse {
            name: format!("log file ({err})"),
            text: name.to_string(),
        })?;
        let canonical =
            path.canonicalize().ok().as_ref().and_then(|p| p.to_str()).unwrap_or(name).to_string();
        Ok(TextStream::File(file, canonical))
    }

    pub fn name(&self) -> String {
        match self {
            TextStream::File(_, name) => name.clone(),
            TextStream::Stdout(_) => "stdout".to_string(),
            TextStream::Stderr(_) => "stderr".to_string(),
        }
    }
}

/// Logs the complete conversation to a [`TextStream`], prefixing engine output with
/// `<` and commands with `>`, the way a per-engine debug log usually looks.
#[derive(Debug)]
pub struct StreamLogger {
    stream: Mutex<TextStream>,
}

impl StreamLogger {
    pub fn new(stream: TextStream) -> Self {
        Self { stream: Mutex::new(stream) }
    }

    /// `name` is a filename, `stdout` or `stderr`.
    pub fn from_name(name: &str) -> Res<Self> {
        Ok(Self::new(TextStream::from_name(name)?))
    }

    fn write(&self, prefix: &str, msg: &str) {
        self.stream.lock().unwrap().write(prefix, msg);
    }
}

impl EngineLogger for StreamLogger {
    fn message_from_engine(&self, line: &str) {
        self.write("<", line);
    }

    fn message_to_engine(&self, line: &str) {
        self.write(">", line);
    }

    fn log(&self, tag: &str, message: &str) {
        self.write(&format!("[{tag}]"), message);
    }

    fn handle_error(&self, error: &dyn Display) {
        self.write("[error]", &error.to_string());
    }
}
