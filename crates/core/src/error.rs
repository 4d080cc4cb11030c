use crate::ast::SourceLocation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A malformed or unsupported contract clause, reported once at the
/// declaration that carries it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclError {
    pub callable: String,
    pub location: SourceLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clause: Option<String>,
    pub message: String,
}

impl DeclError {
    pub fn new(
        callable: &str,
        location: SourceLocation,
        clause: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        DeclError {
            callable: callable.to_owned(),
            location,
            clause: clause.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Lexer or parser failure inside a single clause.
    pub fn syntax(
        callable: &str,
        location: SourceLocation,
        clause: &str,
        message: impl Into<String>,
    ) -> Self {
        DeclError::new(callable, location, Some(clause), message)
    }
}

/// Failure to obtain a program unit.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("could not read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse program unit '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
