//! Editor configuration (`sheetprune.toml`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EditorError, Result};

/// File looked up in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "sheetprune.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Background written on description cells of deleted entries
    pub marker_color: String,
    /// Sibling directory that receives the staged copy
    pub output_dir: String,
    /// Emit progress callbacks while saving
    pub report_progress: bool,
    /// Worker threads for payload inspection; 0 uses the rayon default
    pub scan_threads: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            marker_color: "FFFF0000".to_string(),
            output_dir: "filtered".to_string(),
            report_progress: true,
            scan_threads: 0,
        }
    }
}

impl EditorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EditorError::Config(format!("{}: {e}", path.display())))?;
        let config: EditorConfig = toml::from_str(&content)
            .map_err(|e| EditorError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// `path` when given, else `sheetprune.toml` in `dir` if present, else defaults
    pub fn discover(path: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            Self::from_file(candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_dir.trim().is_empty() {
            return Err(EditorError::Config("output_dir must not be empty".to_string()));
        }
        if self.output_dir.contains(['/', '\\']) || self.output_dir == ".." || self.output_dir == "." {
            return Err(EditorError::Config(format!(
                "output_dir '{}' must be a plain directory name",
                self.output_dir
            )));
        }
        self.marker_argb()?;
        Ok(())
    }

    /// Marker colour normalized to uppercase ARGB
    pub fn marker_argb(&self) -> Result<String> {
        normalize_argb(&self.marker_color).ok_or_else(|| {
            EditorError::Config(format!("marker_color '{}' is not a colour", self.marker_color))
        })
    }
}

/// Accepts `#RRGGBB`, `RRGGBB` or `AARRGGBB`; opaque alpha is added when missing
pub fn normalize_argb(text: &str) -> Option<String> {
    let hex = text.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => Some(format!("FF{}", hex.to_ascii_uppercase())),
        8 => Some(hex.to_ascii_uppercase()),
        _ => None,
    }
}
