//! On-disk snapshot: `index.json` plus `images/<fragment-id>.png`.

use super::{IndexError, PartitionSnapshot};
use crate::model::FragmentId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;
/// File holding the serialized partitions.
pub const INDEX_FILE: &str = "index.json";
/// Directory holding image assets.
pub const IMAGES_DIR: &str = "images";

/// Serialized state of the whole index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Format version.
    pub version: u32,
    /// One entry per partition.
    pub partitions: Vec<PartitionSnapshot>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> IndexError + '_ {
    move |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `snapshot` and `assets` into `dir`, replacing `index.json` atomically.
pub fn save(
    dir: &Path,
    snapshot: &IndexSnapshot,
    assets: &[(FragmentId, Vec<u8>)],
) -> Result<(), IndexError> {
    let images = dir.join(IMAGES_DIR);
    fs::create_dir_all(&images).map_err(io_error(&images))?;

    for (fragment_id, png) in assets {
        let path = images.join(format!("{fragment_id}.png"));
        if path.exists() {
            continue;
        }
        fs::write(&path, png).map_err(io_error(&path))?;
    }

    let body = serde_json::to_vec_pretty(snapshot)?;
    let temp = dir.join(format!("{INDEX_FILE}.tmp"));
    fs::write(&temp, body).map_err(io_error(&temp))?;
    let target = dir.join(INDEX_FILE);
    fs::rename(&temp, &target).map_err(io_error(&target))?;

    tracing::debug!(
        dir = %dir.display(),
        partitions = snapshot.partitions.len(),
        assets = assets.len(),
        "Index snapshot written"
    );
    Ok(())
}

/// Read a snapshot from `dir`. Returns `None` when no `index.json` exists yet.
pub fn load(
    dir: &Path,
) -> Result<Option<(IndexSnapshot, Vec<(FragmentId, Vec<u8>)>)>, IndexError> {
    let index_path = dir.join(INDEX_FILE);
    if !index_path.exists() {
        return Ok(None);
    }

    let body = fs::read(&index_path).map_err(io_error(&index_path))?;
    let snapshot: IndexSnapshot = serde_json::from_slice(&body)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(IndexError::UnsupportedSnapshot(snapshot.version));
    }

    let images = dir.join(IMAGES_DIR);
    let mut assets = Vec::new();
    if images.is_dir() {
        for entry in fs::read_dir(&images).map_err(io_error(&images))? {
            let path: PathBuf = entry.map_err(io_error(&images))?.path();
            let Some(fragment_id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<FragmentId>().ok())
            else {
                continue;
            };
            let png = fs::read(&path).map_err(io_error(&path))?;
            assets.push((fragment_id, png));
        }
    }
    Ok(Some((snapshot, assets)))
}
