//! Configuration loading from disk
//!
//! The document lives at `superface/super.json`. It is located either by an
//! explicit path or by walking upward from a starting directory a bounded
//! number of levels.

use std::path::{Path, PathBuf};

use crate::config::{normalize, NormalizedDocument};
use crate::error::PerformError;

/// Relative location of the configuration document.
pub const DEFAULT_SUPER_JSON_PATH: &str = "superface/super.json";

/// How many parent directories discovery will visit.
pub const MAX_DISCOVERY_LEVELS: usize = 5;

/// Load and normalize the configuration document at `path`.
pub fn load_super_json(path: &Path) -> Result<NormalizedDocument, PerformError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PerformError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let document: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        PerformError::Config(format!("invalid JSON in {}: {e}", path.display()))
    })?;
    normalize(&document)
}

/// Walk upward from `start` looking for `superface/super.json`.
///
/// Returns the first existing path, or `None` after `MAX_DISCOVERY_LEVELS`
/// parents have been visited.
pub fn discover_super_json(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    for _ in 0..=MAX_DISCOVERY_LEVELS {
        let candidate = dir.join(DEFAULT_SUPER_JSON_PATH);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}
