// src/error.rs

//! Crate-wide error type.
//!
//! One `thiserror`-derived enum, one variant per error kind named in the
//! design's error handling section, rather than one variant per fallible
//! call site. Every module in this crate returns `crate::error::Result<T>`.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: malformed recipe: {reason}")]
    RecipeMalformed { path: PathBuf, reason: String },

    #[error("dependency cycle detected, stalled on: {}", remaining.join(", "))]
    DependencyCycle { remaining: Vec<String> },

    #[error("{program} {} failed{}: {stderr}", args.join(" "), status.map(|s| format!(" (exit {s})")).unwrap_or_default())]
    SubprocessFailed {
        program: String,
        args: Vec<String>,
        status: Option<i32>,
        stderr: String,
    },

    #[error("mount leaked at {path}: {detail}")]
    MountLeaked { path: PathBuf, detail: String },

    #[error("freshness mismatch for {package}: {detail}")]
    FreshnessMismatch { package: String, detail: String },

    #[error("incomplete configuration: missing {field}")]
    ConfigIncomplete { field: String },

    #[error("network failure fetching {url}: {source}")]
    NetworkFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("toml error: {0}")]
    Toml(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn subprocess_failed(
        program: impl Into<String>,
        args: &[impl AsRef<str>],
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Error::SubprocessFailed {
            program: program.into(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            status,
            stderr: stderr.into(),
        }
    }
}
