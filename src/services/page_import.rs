//! Start-up import of page credentials from a JSON file on disk

use std::path::{Path, PathBuf};

use serde_json::Value;
use sqlx::SqlitePool;

use crate::domain::page::{self, PageCredential};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to store imported credential: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Inserted(PathBuf),
    Replaced(PathBuf),
    /// The file matched the stored page id and name
    Unchanged(PathBuf),
    NoFile,
}

/// Files checked in order; `explicit` (from `FB_PAGE_JSON`) comes first.
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = explicit.map(Path::to_path_buf).into_iter().collect();
    candidates.push(PathBuf::from("/tmp/fb_page.json"));
    candidates.extend(
        ["data/fb_page.json", "config/fb_page.json", "fb_page.json"]
            .into_iter()
            .map(PathBuf::from),
    );
    candidates
}

/// Import the first candidate that holds a complete credential. Broken files
/// are logged and skipped.
pub async fn import_page_credentials(
    db: &SqlitePool,
    candidates: &[PathBuf],
) -> Result<ImportOutcome, ImportError> {
    for path in candidates {
        if !path.exists() {
            continue;
        }

        let credential = match read_credential(path) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                tracing::debug!(path = %path.display(), "Credential file is missing fields, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load page credentials");
                continue;
            }
        };

        return apply(db, path, &credential).await;
    }

    Ok(ImportOutcome::NoFile)
}

async fn apply(
    db: &SqlitePool,
    path: &Path,
    credential: &PageCredential,
) -> Result<ImportOutcome, ImportError> {
    let outcome = match page::get_page(db).await? {
        None => {
            page::set_page(db, credential).await?;
            tracing::info!(path = %path.display(), "Loaded page credentials");
            ImportOutcome::Inserted(path.to_path_buf())
        }
        Some(existing)
            if existing.page_id != credential.page_id
                || existing.page_name != credential.page_name =>
        {
            page::set_page(db, credential).await?;
            tracing::info!(path = %path.display(), "Updated page credentials");
            ImportOutcome::Replaced(path.to_path_buf())
        }
        Some(_) => ImportOutcome::Unchanged(path.to_path_buf()),
    };
    Ok(outcome)
}

fn read_credential(path: &Path) -> Result<Option<PageCredential>, ImportError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|source| ImportError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let page_id = field(&parsed, &["pageId", "page_id", "id"], "pageId");
    let page_name = field(&parsed, &["pageName", "page_name", "name"], "pageName");
    let access_token = field(&parsed, &["accessToken", "access_token", "token"], "accessToken");

    Ok(match (page_id, page_name, access_token) {
        (Some(page_id), Some(page_name), Some(access_token)) => Some(PageCredential {
            page_id,
            page_name,
            access_token,
        }),
        _ => None,
    })
}

/// First non-empty value among `keys`, falling back to `page.<nested>`.
/// Numbers are accepted and stringified (page ids are often numeric).
fn field(doc: &Value, keys: &[&str], nested: &str) -> Option<String> {
    keys.iter()
        .filter_map(|key| doc.get(*key))
        .chain(doc.get("page").and_then(|p| p.get(nested)))
        .find_map(as_text)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
