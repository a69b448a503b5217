//! Directory listings of a static document root.

use std::{
    fs::Metadata,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::AppError, tz};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub id: String,
    pub name: String,
    pub atime: String,
    pub mtime: String,
    pub ctime: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetQuery {
    #[serde(default = "root")]
    pub path: String,
}

fn root() -> String { "/".into() }

/// Uuid-shaped id derived from the entry's path below the document root.
pub fn asset_id(path: &str) -> String {
    let digest = hex(&Sha256::digest(path.as_bytes()));
    format!("{}-{}-{}-{}", &digest[0..8], &digest[8..12], &digest[12..16], &digest[16..32])
}

fn hex(bytes: &[u8]) -> String { bytes.iter().map(|b| format!("{b:02x}")).collect() }

fn timestamp(time: std::io::Result<SystemTime>) -> String {
    time.map(|t| tz::isoformat(&DateTime::<Utc>::from(t))).unwrap_or_default()
}

#[cfg(unix)]
fn changed(metadata: &Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    tz::isoformat(&tz::from_timestamp(metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1e9))
}

#[cfg(not(unix))]
fn changed(metadata: &Metadata) -> String { timestamp(metadata.created()) }

#[derive(Debug, Clone)]
pub struct AssetManager {
    document_root: PathBuf,
}

impl AssetManager {
    pub fn new(document_root: impl Into<PathBuf>) -> Self { Self { document_root: document_root.into() } }

    pub fn document_root(&self) -> &Path { &self.document_root }

    /// `path` relative to the document root, resolved lexically. Paths that
    /// climb above the root are not found.
    fn resolve(&self, path: &str) -> Result<(PathBuf, String), AppError> {
        if !path.starts_with('/') {
            return Err(AppError::Validation("Path must start with a forward slash '/'".into()));
        }
        let mut parts: Vec<&str> = Vec::new();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(AppError::NotFound(path.to_string()));
                    }
                }
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| AppError::NotFound(path.to_string()))?),
                Component::Prefix(_) => return Err(AppError::NotFound(path.to_string())),
            }
        }
        let mut full = self.document_root.clone();
        full.extend(&parts);
        Ok((full, format!("/{}", parts.join("/"))))
    }

    /// Plain files and directories in the directory at `path`, hidden (`.`)
    /// and private (`_`) names excluded, sorted by name.
    pub async fn list_assets(&self, path: &str) -> Result<Vec<AssetEntry>, AppError> {
        let (directory, normalized) = self.resolve(path)?;
        let root = tokio::fs::canonicalize(&self.document_root).await?;
        let directory = tokio::fs::canonicalize(&directory).await?;
        if !directory.starts_with(&root) || !tokio::fs::metadata(&directory).await?.is_dir() {
            return Err(AppError::NotFound(normalized));
        }
        let prefix = normalized.trim_end_matches('/');

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&directory).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            // Symlinks and special files are not listed.
            let file_type = entry.file_type().await?;
            if !file_type.is_file() && !file_type.is_dir() {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(name, error = %e, "skipping unreadable asset");
                    continue;
                }
            };
            let is_dir = metadata.is_dir();
            entries.push(AssetEntry {
                kind: if is_dir { "directory" } else { "file" }.into(),
                size: (!is_dir).then(|| metadata.len()),
                id: asset_id(&format!("{prefix}/{name}")),
                atime: timestamp(metadata.accessed()),
                mtime: timestamp(metadata.modified()),
                ctime: changed(&metadata),
                name,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// `GET path?path=/sub/dir`.
    pub fn router(self, path: &str) -> Router {
        Router::new().route(path, get(list_assets)).with_state(Arc::new(self))
    }
}

async fn list_assets(State(manager): State<Arc<AssetManager>>, Query(query): Query<AssetQuery>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(manager.list_assets(&query.path).await?))
}
