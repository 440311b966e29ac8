// SPDX-License-Identifier: MIT
//! Compressor configuration: TOML file, environment, then CLI overrides

use serde::{Deserialize, Serialize};

/// What to do with whitespace of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitespaceMode {
    /// Drop it
    #[default]
    Ignore,
    /// Keep it in the global whitespace container
    Global,
    /// Keep it as part of the text value
    Text,
}

impl WhitespaceMode {
    /// Parse the one-letter form used in path options (`i`, `g`, `t`)
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            b'i' => Some(Self::Ignore),
            b'g' => Some(Self::Global),
            b't' => Some(Self::Text),
            _ => None,
        }
    }

    pub fn flag(self) -> char {
        match self {
            Self::Ignore => 'i',
            Self::Global => 'g',
            Self::Text => 't',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitespaceConfig {
    /// Text consisting only of whitespace
    pub full: WhitespaceMode,
    /// Leading whitespace of text values
    pub left: WhitespaceMode,
    /// Trailing whitespace of text values
    pub right: WhitespaceMode,
    /// Whitespace between attributes of a start tag
    pub attribute: WhitespaceMode,
}

impl WhitespaceConfig {
    /// Keep every whitespace byte
    pub fn preserve() -> Self {
        Self {
            full: WhitespaceMode::Global,
            left: WhitespaceMode::Global,
            right: WhitespaceMode::Global,
            attribute: WhitespaceMode::Global,
        }
    }
}

/// Markup that is passed through verbatim unless dropped here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    pub comments: bool,
    pub doctype: bool,
    pub processing_instructions: bool,
    pub cdata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path expressions, tried in order before the built-in catch-alls
    pub paths: Vec<String>,
    pub whitespace: WhitespaceConfig,
    pub ignore: IgnoreConfig,
    /// Container bytes after which a run block is closed
    pub memory_cutoff: usize, // bytes
    /// DEFLATE level, 1 (fast) to 9 (small)
    pub level: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            whitespace: WhitespaceConfig::default(),
            ignore: IgnoreConfig::default(),
            memory_cutoff: 8 * 1024 * 1024,
            level: 6,
        }
    }
}

impl Config {
    /// Defaults overridden by `PATHPRESS_*` variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `PATHPRESS_*` variables on top of `self`
    pub fn with_env(mut self) -> Self {
        if let Ok(paths) = std::env::var("PATHPRESS_PATHS") {
            self.paths = paths.split_whitespace().map(str::to_string).collect();
        }
        self.memory_cutoff = std::env::var("PATHPRESS_MEMORY_CUTOFF")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.memory_cutoff);
        self.level = std::env::var("PATHPRESS_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.level);
        if let Some(mode) = std::env::var("PATHPRESS_WHITESPACE")
            .ok()
            .and_then(|s| s.bytes().next())
            .and_then(WhitespaceMode::from_flag)
        {
            self.whitespace.full = mode;
        }
        self
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=9).contains(&self.level) {
            return Err(format!("compression level must be between 1 and 9, got {}", self.level));
        }

        if self.memory_cutoff < 1024 {
            return Err("memory cutoff must be at least 1024 bytes".to_string());
        }

        // Attribute whitespace has no text value to attach to
        if self.whitespace.attribute == WhitespaceMode::Text {
            return Err("attribute whitespace can only be ignored or stored globally".to_string());
        }

        if let Some(bad) = self.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(format!("path expression '{}' must start with '/'", bad));
        }

        Ok(())
    }
}
