//! Wireguard config handout.
//!
//! The pool is a directory of pre-generated configs. A member's first visit
//! to `/get_wireguard` claims the first unassigned file (by name); every later
//! visit serves that same file again.

use std::io;
use std::path::{Path, PathBuf};

use axum::{
    Extension,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, info, warn};

use portal_db::wireguard::ClaimOutcome;
use portal_types::models::{Account, ResourceAssignment};

use crate::auth::{AppState, flash_redirect, run_db};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct ConfigPool {
    dir: PathBuf,
}

impl ConfigPool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Candidate file names in claim order: regular, non-hidden, sorted.
    pub async fn list(&self) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping non UTF-8 file name in {}", self.dir.display());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    /// Read one config. Names that could escape the pool directory are refused.
    pub async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        if !is_plain_name(name) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("bad config name '{}'", name)));
        }
        tokio::fs::read(self.dir.join(name)).await
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

pub async fn get_wireguard(
    State(state): State<AppState>,
    jar: CookieJar,
    Extension(user): Extension<Account>,
) -> Result<Response, ApiError> {
    let uid = user.id;

    if let Some(assignment) = run_db(&state, move |db| db.get_assignment(uid)).await? {
        return serve(&state, &assignment).await;
    }

    let files = state.pool.list().await.map_err(|e| {
        error!("Failed to list wireguard pool {}: {}", state.pool.dir().display(), e);
        ApiError::Internal(e.to_string())
    })?;

    let outcome = run_db(&state, move |db| {
        let taken = db.assigned_filenames()?;
        let candidates: Vec<String> = files.into_iter().filter(|f| !taken.contains(f)).collect();
        db.claim_next(uid, &candidates)
    })
    .await?;

    match outcome {
        ClaimOutcome::Claimed(assignment) => {
            info!("{} ({}) claimed wireguard config {}", user.username, uid, assignment.filename);
            serve(&state, &assignment).await
        }
        ClaimOutcome::Existing(assignment) => serve(&state, &assignment).await,
        ClaimOutcome::Exhausted => {
            warn!("Wireguard pool exhausted, {} ({}) got nothing", user.username, uid);
            flash_redirect(&state, jar, ApiError::ResourceExhausted.flash(), "/home")
        }
    }
}

async fn serve(state: &AppState, assignment: &ResourceAssignment) -> Result<Response, ApiError> {
    let bytes = state.pool.read(&assignment.filename).await.map_err(|e| {
        error!("Assigned config {} unreadable: {}", assignment.filename, e);
        ApiError::Internal(e.to_string())
    })?;

    let safe_name = assignment.filename.replace(['"', '\\'], "_");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe_name))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_lists_sorted_visible_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.conf", "a.conf", ".hidden"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let pool = ConfigPool::new(dir.path());
        assert_eq!(pool.list().await.unwrap(), ["a.conf", "b.conf"]);
        assert_eq!(pool.read("a.conf").await.unwrap(), b"a.conf");
    }

    #[tokio::test]
    async fn read_refuses_path_tricks() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConfigPool::new(dir.path());
        for name in ["../secret", "sub/x.conf", ".hidden", ""] {
            let err = pool.read(name).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[tokio::test]
    async fn missing_pool_dir_is_an_error() {
        let pool = ConfigPool::new("/nonexistent/portal-pool");
        assert!(pool.list().await.is_err());
    }
}
