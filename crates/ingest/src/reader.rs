use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read source text {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source text {path:?} is not valid UTF-8")]
    Decode { path: PathBuf },
}

pub struct FileReader;

impl FileReader {
    /// Read a source file as UTF-8, dropping a leading byte-order mark.
    pub async fn read_file(path: &Path) -> Result<String, IngestError> {
        let bytes = fs::read(path).await.map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let content = String::from_utf8(bytes).map_err(|_| IngestError::Decode {
            path: path.to_path_buf(),
        })?;

        Ok(match content.strip_prefix('\u{feff}') {
            Some(stripped) => stripped.to_string(),
            None => content,
        })
    }
}
