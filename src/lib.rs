//! A client library for driving external UCI chess engines.
//!
//! The library spawns an engine executable, speaks the UCI text protocol over the
//! child's standard streams and surfaces engine events through the
//! [`EngineListener`] trait. The pieces are layered bottom-up:
//! - [`feed`]: the line queue between the stdout reader thread and the dispatch loop
//! - [`process`]: the supervisor owning the child process and its reader/drain/exit threads
//! - [`options`]: the model for UCI `option` declarations and `setoption` commands
//! - [`engine`]: the protocol state machine and the public [`UciEngine`] facade
//!
//! The library never implements chess rules; moves are passed through as text.

use std::io;

use thiserror::Error;

pub mod common;
pub mod engine;
pub mod feed;
pub mod logger;
pub mod options;
pub mod process;
pub mod resolve;

pub use common::Res;
pub use engine::{EngineBuilder, EngineListener, GoRequest, ProtectionStatus, UciEngine};
pub use logger::{EngineLogger, NoopLogger, StreamLogger};

/// All the ways driving an engine can fail. Failures inside the background threads
/// are never surfaced through this type; they go to the [`EngineLogger`] instead,
/// because an engine crash must not take the host down with it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("couldn't launch engine executable '{path}': {source}")]
    Launch {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("couldn't locate an executable for '{0}'")]
    ResourceNotFound(String),
    #[error("the engine process has already been started")]
    AlreadyStarted,
    #[error("unknown option type in declaration 'option {0}'")]
    UnknownOptionType(String),
    #[error("the engine didn't declare an option named '{0}'")]
    UnknownOption(String),
    #[error("invalid value '{value}' for option '{name}'")]
    InvalidOptionValue { name: String, value: String },
    #[error("malformed option declaration 'option {line}': {reason}")]
    MalformedOption { line: String, reason: String },
    #[error("couldn't parse {name} ('{text}')")]
    Parse { name: String, text: String },
}
