//! Locating and reading the service configuration file.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::document::{Document, DocumentError, Format};

pub const CONFIG_FILE_NAME: &str = "vm-manager-service.conf";

/// Searched in order when no path is given.
pub const SEARCH_PATHS: [&str; 3] = [
    "./vm-manager-service.conf",
    "dist/vm-manager-service.conf",
    "/etc/vm-manager-service/vm-manager-service.conf",
];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration file not found (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
}

/// First of `candidates` that is a regular file.
pub fn find_config_file<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf, LoadError> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| LoadError::NotFound {
            searched: candidates.iter().map(|p| p.as_ref().to_path_buf()).collect(),
        })
}

/// Read and parse `path`; `.toml` files are TOML, anything else JSON.
pub fn load_document(path: &Path) -> Result<Document, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format = Format::from_path(&path.to_string_lossy());
    let doc = Document::parse(&text, format).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), ?format, "configuration loaded");
    Ok(doc)
}
