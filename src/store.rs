use crate::error::{RankError, Result};
use crate::model::Collection;
use crate::ranking;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATA_DIR: &str = ".tierank";
pub const STORE_FILENAME: &str = "collection.json";

pub fn from_json(json: &str) -> Result<Collection> {
    Ok(serde_json::from_str(json)?)
}

pub fn to_json(collection: &Collection) -> Result<String> {
    Ok(serde_json::to_string_pretty(collection)?)
}

pub fn store_path(root: &Path) -> PathBuf {
    root.join(DATA_DIR).join(STORE_FILENAME)
}

/// Create an empty collection under `root`.
pub fn init(root: &Path) -> Result<()> {
    let path = store_path(root);
    if path.exists() {
        return Err(RankError::AlreadyInitialized(path.display().to_string()));
    }
    fs::create_dir_all(root.join(DATA_DIR))?;
    save(root, &Collection::default())
}

/// Read the collection and verify its ranks before anyone operates on it.
pub fn load(root: &Path) -> Result<Collection> {
    let path = store_path(root);
    if !path.exists() {
        return Err(RankError::NotInitialized);
    }
    let collection = from_json(&fs::read_to_string(&path)?)?;
    ranking::check_invariants(&collection)?;
    debug!(
        path = %path.display(),
        items = collection.items.len(),
        sessions = collection.sessions.len(),
        "loaded collection"
    );
    Ok(collection)
}

/// Write through a temporary file and rename, so a crash never leaves a
/// half-written collection behind.
pub fn save(root: &Path, collection: &Collection) -> Result<()> {
    let path = store_path(root);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, to_json(collection)?)?;
    fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), "saved collection");
    Ok(())
}

fn resolve_among<'a>(
    kind: &str,
    prefix: &str,
    candidates: impl Iterator<Item = &'a String>,
) -> Result<String> {
    let mut matches: Vec<&String> = Vec::new();
    for id in candidates {
        if id == prefix {
            return Ok(id.clone());
        }
        if id.starts_with(prefix) && !matches.contains(&id) {
            matches.push(id);
        }
    }
    match matches.len() {
        0 => Err(RankError::NotFound(format!("no {kind} matching '{prefix}'"))),
        1 => Ok(matches[0].clone()),
        n => Err(RankError::InvalidOperation(format!(
            "ambiguous prefix '{prefix}' matches {n} {kind}s: {}",
            matches
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Resolve a prefix like "it-a3" to a full item id, placed or pending.
/// Retired ids are matched too so callers can report them as gone rather
/// than unknown.
pub fn resolve_id(collection: &Collection, prefix: &str) -> Result<String> {
    let ids = collection
        .items
        .keys()
        .chain(collection.sessions.values().map(|s| &s.item_id))
        .chain(collection.retired.iter());
    resolve_among("item", prefix, ids)
}

pub fn resolve_session(collection: &Collection, prefix: &str) -> Result<String> {
    resolve_among("session", prefix, collection.sessions.keys())
}
