//! Transient audio files.
//!
//! Inbound voice notes and synthesized replies are written to short-lived
//! files. A `TransientAudio` owns one such file: `release` deletes it, and
//! dropping an unreleased artifact deletes it as well.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

/// Turn an opaque conversation id into something usable in a file name.
pub fn sanitize_stem(raw: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(raw, "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "conversation".to_string()
    } else {
        cleaned.chars().take(48).collect()
    }
}

/// Owned handle to a short-lived audio file.
#[derive(Debug)]
pub struct TransientAudio {
    path: PathBuf,
    released: bool,
}

impl TransientAudio {
    /// Take ownership of an existing file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    /// Unique path in `dir` for a file belonging to `conversation_id`.
    ///
    /// Nothing is created on disk; wrap the path with `TransientAudio::new`
    /// before writing so a partial file is removed on failure.
    pub fn reserve_path(dir: &Path, prefix: &str, conversation_id: &str, extension: &str) -> PathBuf {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        dir.join(format!(
            "{}_{}_{}.{}",
            prefix,
            sanitize_stem(conversation_id),
            &suffix[..8],
            extension
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give up ownership without deleting the file.
    pub fn into_path(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }

    /// Delete the file. Consumes the handle so it cannot be released twice.
    pub fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Released audio file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for TransientAudio {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove audio file {}: {}", self.path.display(), e);
            }
        }
    }
}
