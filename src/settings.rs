//! Engine Settings
//!
//! Deserialised from JSON; every field has a default so partial files work.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::env::EnvError;

pub const DEFAULT_TEMPLATE_NAME: &str = "noname.j2tpl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Drop the first newline after a statement or comment tag.
    #[serde(default)]
    pub trim_blocks: bool,
    /// Strip spaces and tabs before a statement or comment tag that starts a line.
    #[serde(default)]
    pub lstrip_blocks: bool,
    /// Name given to templates loaded without one.
    #[serde(default = "default_template_name")]
    pub default_template_name: String,
}

fn default_template_name() -> String {
    DEFAULT_TEMPLATE_NAME.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trim_blocks: false,
            lstrip_blocks: false,
            default_template_name: default_template_name(),
        }
    }
}

impl Settings {
    pub fn from_json_file(path: &Path) -> Result<Self, EnvError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"trimBlocks": true}"#).unwrap();
        assert!(settings.trim_blocks);
        assert!(!settings.lstrip_blocks);
        assert_eq!(settings.default_template_name, DEFAULT_TEMPLATE_NAME);
    }
}
