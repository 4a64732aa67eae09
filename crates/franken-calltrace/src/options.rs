//! Session configuration for instrumented handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the values reachable from one root share a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeMode {
    /// One root and one open-node stack for the whole session.
    #[default]
    Shared,
    /// Every wrapped value gets its own root and stack.
    Isolated,
}

impl fmt::Display for TreeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Isolated => f.write_str("isolated"),
        }
    }
}

/// Parse a tree mode from CLI/user input.
pub fn parse_tree_mode(input: &str) -> Option<TreeMode> {
    match input.trim().to_ascii_lowercase().as_str() {
        "shared" => Some(TreeMode::Shared),
        "isolated" => Some(TreeMode::Isolated),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("invalid instrumentation options: {detail}")]
    InvalidJson { detail: String },
}

/// Options accepted by [`crate::realm::Realm::create_instrumented_handle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct InstrumentOptions {
    pub tree_mode: TreeMode,
}

impl InstrumentOptions {
    pub fn shared() -> Self {
        Self {
            tree_mode: TreeMode::Shared,
        }
    }

    pub fn isolated() -> Self {
        Self {
            tree_mode: TreeMode::Isolated,
        }
    }

    /// Parse `{"treeMode": "shared" | "isolated"}`; missing fields take
    /// their defaults.
    pub fn from_json(input: &str) -> Result<Self, OptionsError> {
        serde_json::from_str(input).map_err(|err| OptionsError::InvalidJson {
            detail: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_shared() {
        assert_eq!(InstrumentOptions::default().tree_mode, TreeMode::Shared);
    }

    #[test]
    fn parse_tree_mode_is_lenient_about_case_and_space() {
        assert_eq!(parse_tree_mode(" Isolated "), Some(TreeMode::Isolated));
        assert_eq!(parse_tree_mode("SHARED"), Some(TreeMode::Shared));
        assert_eq!(parse_tree_mode("huge"), None);
    }

    #[test]
    fn from_json_reads_camel_case() {
        let opts = InstrumentOptions::from_json(r#"{"treeMode":"isolated"}"#).unwrap();
        assert_eq!(opts, InstrumentOptions::isolated());
        assert_eq!(InstrumentOptions::from_json("{}").unwrap(), InstrumentOptions::shared());
    }

    #[test]
    fn from_json_rejects_unknown_modes_and_fields() {
        assert!(InstrumentOptions::from_json(r#"{"treeMode":"huge"}"#).is_err());
        assert!(matches!(
            InstrumentOptions::from_json(r#"{"hugeTree":true}"#),
            Err(OptionsError::InvalidJson { .. })
        ));
    }

    #[test]
    fn tree_mode_display_matches_serde() {
        for mode in [TreeMode::Shared, TreeMode::Isolated] {
            assert_eq!(
                serde_json::to_value(mode).unwrap(),
                serde_json::Value::String(mode.to_string())
            );
        }
    }
}
