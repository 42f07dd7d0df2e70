//! Feed file loading and strict parsing.

use crate::model::association::AssociationLink;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Content written when the feed file does not exist yet.
pub const EMPTY_FEED: &str = "[]";

pub type FeedResult<T> = Result<T, FeedError>;

/// Outcome of one successful feed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLoad {
    /// The feed was missing and an empty one was created.
    Bootstrapped,
    /// The feed parsed to an empty list (or `null`/blank content).
    NoCandidates,
    /// Candidates in feed order, duplicates included.
    Candidates(Vec<AssociationLink>),
}

impl FeedLoad {
    pub fn candidates(&self) -> &[AssociationLink] {
        match self {
            Self::Candidates(links) => links,
            Self::Bootstrapped | Self::NoCandidates => &[],
        }
    }
}

#[derive(Debug)]
pub enum FeedError {
    /// The feed could not be read, or the bootstrap file could not be written.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The content is not a JSON list of `{employeeId, departmentId}`.
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Display for FeedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "feed `{}` is not accessible: {source}", path.display())
            }
            Self::Format { path, source } => {
                write!(f, "feed `{}` is malformed: {source}", path.display())
            }
        }
    }
}

impl Error for FeedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Format { source, .. } => Some(source),
        }
    }
}

/// Parses feed content.
///
/// Returns `Ok(None)` for blank content or a JSON `null`, which callers treat
/// like an empty list.
pub fn parse_feed(content: &[u8]) -> Result<Option<Vec<AssociationLink>>, serde_json::Error> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<Option<Vec<AssociationLink>>>(content)
}

/// Loads the feed at `path`, creating it with `[]` when missing.
///
/// # Errors
/// - `FeedError::Io` when the file exists but cannot be read, or cannot be
///   created during bootstrap.
/// - `FeedError::Format` when the content does not match the feed shape.
pub async fn load_feed(path: &Path) -> FeedResult<FeedLoad> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            if bootstrap_feed(path).await? {
                return Ok(FeedLoad::Bootstrapped);
            }
            // Another writer created the file first; read what it wrote.
            tokio::fs::read(path).await.map_err(|source| FeedError::Io {
                path: path.to_path_buf(),
                source,
            })?
        }
        Err(source) => {
            return Err(FeedError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let parsed = parse_feed(&bytes).map_err(|source| FeedError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    match parsed {
        Some(links) if !links.is_empty() => Ok(FeedLoad::Candidates(links)),
        _ => Ok(FeedLoad::NoCandidates),
    }
}

/// Creates the feed file with [`EMPTY_FEED`]. Returns `false` when the file
/// appeared between the read attempt and creation.
async fn bootstrap_feed(path: &Path) -> FeedResult<bool> {
    let io_err = |source: std::io::Error| FeedError::Io {
        path: path.to_path_buf(),
        source,
    };

    warn!(
        "event=feed_bootstrap module=feed status=start path={} reason=not_found",
        path.display()
    );

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(io_err(err)),
    };
    file.write_all(EMPTY_FEED.as_bytes())
        .await
        .map_err(io_err)?;
    file.flush().await.map_err(io_err)?;

    info!(
        "event=feed_bootstrap module=feed status=ok path={}",
        path.display()
    );
    Ok(true)
}
