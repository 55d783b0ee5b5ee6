use std::{collections::HashSet, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::profile::{Device, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRequest {
    pub sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageResponse {
    pub sync_time: DateTime<Utc>,
    pub profiles: Vec<Profile>,
    pub devices: Vec<Device>,
}

#[async_trait]
pub trait ProfileStorage: Send + Sync {
    async fn profiles(&self, request: StorageRequest) -> Result<StorageResponse>;
}

#[derive(Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<Profile>,
    #[serde(default)]
    devices: Vec<Device>,
}

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ProfileStorage for JsonFileStorage {
    async fn profiles(&self, request: StorageRequest) -> Result<StorageResponse> {
        let sync_time = Utc::now();
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: ProfilesFile = serde_json::from_slice(&data)
            .with_context(|| format!("decoding {}", self.path.display()))?;

        let profiles = file
            .profiles
            .into_iter()
            .filter(|p| request.sync_time.map_or(true, |since| p.updated_at > since))
            .collect::<Vec<_>>();
        let changed = profiles.iter().map(|p| &p.id).collect::<HashSet<_>>();
        let devices = file
            .devices
            .into_iter()
            .filter(|d| changed.contains(&d.profile_id))
            .collect();
        Ok(StorageResponse {
            sync_time,
            profiles,
            devices,
        })
    }
}
