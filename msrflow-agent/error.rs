use std::io;
use thiserror::Error;

use msrflow_abi::BackendError;

/// Byte offset of the first invalid or unconsumed character in a command or
/// core-set string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid character at column {offset}")]
pub struct SyntaxError {
    pub offset: usize,
}

#[derive(Error, Debug)]
pub enum MsrflowError {
    #[error("cannot find system type")]
    UnknownSystem,

    #[error("cannot find module for system type '{system}'")]
    NoModule { system: String },

    #[error("{module}: {source}")]
    Backend {
        module: String,
        source: BackendError,
    },

    #[error("{module}: disjoint core ids not yet implemented ({num_cores} cores, max id {max_id})")]
    DisjointCores {
        module: String,
        num_cores: usize,
        max_id: usize,
    },

    #[error("invalid core parameter '{spec}' at column {offset}")]
    CoreSyntax { spec: String, offset: usize },

    #[error("command syntax error in '{input}' at column {offset}")]
    CommandSyntax { input: String, offset: usize },

    #[error("cannot determine current core: {0}")]
    CurrentCore(#[from] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MsrflowError>;
