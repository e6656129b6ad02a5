use crate::error::{RankError, Result};
use crate::selection::SelectionPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

pub const DEFAULT_LOCAL_FILE: &str = ".tierank/config.toml";
pub const DEFAULT_GLOBAL_CONFIG_FILE: &str = ".config/tierank/config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub selection: SelectionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SelectionConfig {
    pub window: Option<usize>,
    pub settled_threshold: Option<u32>,
}

impl Config {
    pub fn selection_policy(&self) -> Result<SelectionPolicy> {
        let defaults = SelectionPolicy::default();
        let window = self.selection.window.unwrap_or(defaults.window);
        if window == 0 {
            return Err(RankError::ConfigParse(
                "selection.window must be at least 1".to_string(),
            ));
        }
        Ok(SelectionPolicy {
            window,
            settled_threshold: self
                .selection
                .settled_threshold
                .unwrap_or(defaults.settled_threshold),
        })
    }
}

/// Load the global config from `$HOME` overlaid with the collection's own
/// file. Missing files are skipped; with neither present the defaults apply.
pub fn load_config(root: &Path) -> Result<Config> {
    let global = std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(DEFAULT_GLOBAL_CONFIG_FILE));
    load_config_with_global(root, global.as_deref())
}

pub(crate) fn load_config_with_global(root: &Path, global_path: Option<&Path>) -> Result<Config> {
    let mut merged = Table::new();
    if let Some(path) = global_path {
        merge_file_if_exists(&mut merged, path)?;
    }
    merge_file_if_exists(&mut merged, &root.join(DEFAULT_LOCAL_FILE))?;

    Value::Table(merged)
        .try_into()
        .map_err(|e: toml::de::Error| RankError::ConfigParse(e.to_string()))
}

fn merge_file_if_exists(merged: &mut Table, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let content = std::fs::read_to_string(path)?;
    let overlay: Table = toml::from_str(&content)
        .map_err(|e| RankError::ConfigParse(format!("{}: {}", path.display(), e)))?;
    overlay_sections(merged, overlay);
    Ok(())
}

/// Sections such as `[selection]` merge key by key; any other value in
/// `overlay` replaces the one in `base`.
fn overlay_sections(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(section) => match base.get_mut(&key) {
                Some(Value::Table(existing)) => overlay_sections(existing, section),
                _ => {
                    base.insert(key, Value::Table(section));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
