use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::models::JobId;

static UNSUPPORTED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/:*?"<>\\|]"#).expect("static pattern"));

/// An upload as the intake layer received it.
#[derive(Debug, Clone, Default)]
pub struct UploadedArtifact {
    /// Set once the body has been buffered to disk.
    pub staging_path: Option<PathBuf>,
    /// Filename the client sent in the content disposition.
    pub filename: Option<String>,
}

pub fn sanitize(raw: &str) -> String {
    UNSUPPORTED_CHARS.replace_all(raw, "").into_owned()
}

fn fresh() -> JobId {
    JobId::new(Uuid::new_v4().simple().to_string())
}

/// Staged uploads that carry a client filename keep their staging name, so the
/// same staged file always maps to the same job. Everything else gets a new id.
pub fn allocate(artifact: &UploadedArtifact) -> JobId {
    let has_filename = artifact
        .filename
        .as_deref()
        .map_or(false, |name| !name.trim().is_empty());

    let staged_name = artifact
        .staging_path
        .as_deref()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy());

    match staged_name {
        Some(name) if has_filename => {
            let id = sanitize(&name);
            if id.is_empty() || id == "." || id == ".." {
                fresh()
            } else {
                JobId::new(id)
            }
        }
        _ => fresh(),
    }
}

/// Lowercased extension of the client filename including the dot, `.wav` when absent.
pub fn extension(filename: Option<&str>) -> String {
    filename
        .map(Path::new)
        .and_then(Path::extension)
        .map(|ext| sanitize(&ext.to_string_lossy().to_lowercase()))
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".wav".to_owned())
}
