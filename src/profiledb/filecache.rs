use std::{io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::profile::{Device, Profile};
use crate::refreshable::write_atomic;

pub const FILE_CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCache {
    pub version: u32,
    pub sync_time: DateTime<Utc>,
    pub profiles: Vec<Profile>,
    pub devices: Vec<Device>,
}

#[derive(Deserialize)]
struct Version {
    version: u32,
}

pub async fn load(path: &Path) -> Result<Option<FileCache>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("No profile cache at {}", path.display());
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let Version { version } = serde_json::from_slice(&data)
        .with_context(|| format!("decoding version of {}", path.display()))?;
    if version != FILE_CACHE_VERSION {
        warn!(
            "Ignoring profile cache {} of version {}, expected {}",
            path.display(),
            version,
            FILE_CACHE_VERSION
        );
        return Ok(None);
    }
    let cache = serde_json::from_slice(&data)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(Some(cache))
}

pub async fn store(path: &Path, cache: &FileCache) -> Result<()> {
    let data = serde_json::to_vec(cache)?;
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || write_atomic(&path, &data, None))
        .await?
        .context("writing profile cache")
}
