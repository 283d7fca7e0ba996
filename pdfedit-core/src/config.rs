use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_EXPIRY};
use crate::commit::{CommitOptions, DEFAULT_COVER_PADDING};
use crate::geometry::Color;
use crate::history::{DEFAULT_MAX_BRANCHES, DEFAULT_MAX_RECORDS};
use crate::hit_test::DEFAULT_HIT_TOLERANCE;
use crate::runs::DEFAULT_LINE_THRESHOLD;

/// Tunables for every component, read from `config.toml`. Missing keys take
/// their defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub line_threshold: f32,
    pub hit_tolerance: f32,
    pub cover_padding: f32,
    pub background: Color,
    pub cache_capacity: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "cache_expiry_ms")]
    pub cache_expiry: Duration,
    pub history_max_records: usize,
    pub history_max_branches: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            line_threshold: DEFAULT_LINE_THRESHOLD,
            hit_tolerance: DEFAULT_HIT_TOLERANCE,
            cover_padding: DEFAULT_COVER_PADDING,
            background: Color::WHITE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_expiry: DEFAULT_CACHE_EXPIRY,
            history_max_records: DEFAULT_MAX_RECORDS,
            history_max_branches: DEFAULT_MAX_BRANCHES,
        }
    }
}

impl EditorConfig {
    /// Reads `path`, or returns the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("failed to decode config file {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let tmp = path.with_extension("toml.tmp");
        let payload = toml::to_string_pretty(self)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp config file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn commit_options(&self) -> CommitOptions {
        CommitOptions {
            padding: self.cover_padding,
            background: self.background,
            overlay_only: false,
        }
    }
}
