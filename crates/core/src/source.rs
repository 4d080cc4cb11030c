//! Source provider abstraction for loading program units.
//!
//! The [`SourceProvider`] trait abstracts file I/O so the loader can be
//! driven from the filesystem (CLI) or from memory (tests, embedding).

use crate::ast::Program;
use crate::error::LoadError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Trait that abstracts reading program unit text.
pub trait SourceProvider {
    /// Read the source text for a given path.
    fn read_source(&self, path: &Path) -> Result<String, std::io::Error>;
}

/// Default filesystem-backed source provider.
pub struct FileSystemProvider;

impl SourceProvider for FileSystemProvider {
    fn read_source(&self, path: &Path) -> Result<String, std::io::Error> {
        std::fs::read_to_string(path)
    }
}

/// In-memory source provider for tests and embedding.
///
/// Maps paths to source text strings. Lookups normalize `.` and `..`
/// without touching the filesystem.
pub struct InMemoryProvider {
    files: HashMap<PathBuf, String>,
}

impl InMemoryProvider {
    /// Create a new in-memory provider from a map of paths to source text.
    pub fn new(files: HashMap<PathBuf, String>) -> Self {
        let files = files
            .into_iter()
            .map(|(k, v)| (Self::normalize_path(&k), v))
            .collect();
        Self { files }
    }

    fn normalize_path(path: &Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => {
                    if !components.is_empty() {
                        components.pop();
                    }
                }
                other => components.push(other),
            }
        }
        components.iter().collect()
    }
}

impl SourceProvider for InMemoryProvider {
    fn read_source(&self, path: &Path) -> Result<String, std::io::Error> {
        let normalized = Self::normalize_path(path);
        self.files.get(&normalized).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found in memory: {}", normalized.display()),
            )
        })
    }
}

/// Read and deserialize a program unit through `provider`.
pub fn load_program(provider: &dyn SourceProvider, path: &Path) -> Result<Program, LoadError> {
    let text = provider.read_source(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let program: Program = serde_json::from_str(&text).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        unit = %program.unit,
        callables = program.callables.len(),
        "loaded program unit"
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = r#"{
        "unit": "tx.kt",
        "callables": [
            {"name": "start", "owner": "Transaction", "location": {"line": 1, "column": 1}}
        ]
    }"#;

    fn provider() -> InMemoryProvider {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("/units/tx.json"), UNIT.to_string());
        files.insert(PathBuf::from("/units/broken.json"), "{".to_string());
        InMemoryProvider::new(files)
    }

    #[test]
    fn normalize_path_resolves_dot_and_dotdot() {
        let p = Path::new("/a/b/../c/./d");
        let normalized = InMemoryProvider::normalize_path(p);
        assert_eq!(normalized, PathBuf::from("/a/c/d"));
    }

    #[test]
    fn loads_program_from_memory() {
        let program = load_program(&provider(), Path::new("/units/./tx.json")).unwrap();
        assert_eq!(program.unit, "tx.kt");
        assert_eq!(program.callables[0].id(), "Transaction.start");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_program(&provider(), Path::new("/units/none.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().contains("none.json"));
    }

    #[test]
    fn malformed_json_is_json_error() {
        let err = load_program(&provider(), Path::new("/units/broken.json")).unwrap_err();
        assert!(matches!(err, LoadError::Json { .. }));
    }
}
