use std::{collections::HashMap, net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{errcoll::ErrorCollector, metrics::Metrics, refresher::Refresher};

pub mod filecache;
pub mod profile;
pub mod storage;

pub use profile::{Device, DeviceId, Profile, ProfileId};
pub use storage::{JsonFileStorage, ProfileStorage, StorageRequest, StorageResponse};

use filecache::{FileCache, FILE_CACHE_VERSION};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("device not found")]
    DeviceNotFound,
    #[error("profile not found")]
    ProfileNotFound,
}

pub struct ProfileDbConfig {
    pub storage: Arc<dyn ProfileStorage>,
    pub cache_path: PathBuf,
    pub full_sync_interval: Duration,
    pub metrics: Arc<Metrics>,
    pub errors: Arc<dyn ErrorCollector>,
}

#[derive(Default)]
struct Index {
    profiles: HashMap<ProfileId, Arc<Profile>>,
    devices: HashMap<DeviceId, Arc<Device>>,
    device_to_profile: HashMap<DeviceId, ProfileId>,
    device_id_to_ip: HashMap<DeviceId, IpAddr>,
    ip_to_device_id: HashMap<IpAddr, DeviceId>,
    dedicated_ip_to_device_id: HashMap<IpAddr, DeviceId>,
}

impl Index {
    fn build(profiles: Vec<Profile>, devices: Vec<Device>, errors: &dyn ErrorCollector) -> Self {
        let mut index = Self::default();
        for profile in profiles.into_iter().filter(|p| !p.deleted) {
            index.profiles.insert(profile.id.clone(), Arc::new(profile));
        }
        for device in devices {
            match index.profiles.get(&device.profile_id) {
                Some(profile) if profile.has_device(&device.id) => index.set_device(device),
                _ => errors.collect(anyhow!(
                    "device {} is not listed by profile {}",
                    device.id,
                    device.profile_id
                )),
            }
        }
        index
    }

    fn merge(&mut self, profiles: Vec<Profile>, devices: Vec<Device>) {
        for profile in profiles {
            if profile.deleted {
                debug!("profile {} deleted", profile.id);
                self.profiles.remove(&profile.id);
            } else {
                self.profiles.insert(profile.id.clone(), Arc::new(profile));
            }
        }
        for device in devices {
            self.set_device(device);
        }
    }

    /// Installs `device`, unlinking the addresses it no longer owns first.
    fn set_device(&mut self, device: Device) {
        let id = device.id.clone();
        if let Some(old_ip) = self.device_id_to_ip.get(&id).copied() {
            if device.linked_ip != Some(old_ip) {
                self.unlink_ip(&id, old_ip);
            }
        }
        if let Some(old) = self.devices.get(&id).cloned() {
            for ip in old.dedicated_ips.iter().filter(|ip| !device.dedicated_ips.contains(ip)) {
                self.unlink_dedicated_ip(&id, *ip);
            }
        }

        if let Some(ip) = device.linked_ip {
            if let Some(previous) = self.ip_to_device_id.get(&ip).cloned() {
                if previous != id {
                    self.unlink_ip(&previous, ip);
                }
            }
            self.device_id_to_ip.insert(id.clone(), ip);
            self.ip_to_device_id.insert(ip, id.clone());
        }
        for ip in &device.dedicated_ips {
            self.dedicated_ip_to_device_id.insert(*ip, id.clone());
        }
        self.device_to_profile
            .insert(id.clone(), device.profile_id.clone());
        self.devices.insert(id, Arc::new(device));
    }

    fn unlink_ip(&mut self, id: &DeviceId, ip: IpAddr) {
        self.device_id_to_ip.remove(id);
        if self.ip_to_device_id.get(&ip) == Some(id) {
            self.ip_to_device_id.remove(&ip);
        }
    }

    fn unlink_dedicated_ip(&mut self, id: &DeviceId, ip: IpAddr) {
        if self.dedicated_ip_to_device_id.get(&ip) == Some(id) {
            self.dedicated_ip_to_device_id.remove(&ip);
        }
    }

    fn remove_device(&mut self, id: &DeviceId) {
        if let Some(ip) = self.device_id_to_ip.get(id).copied() {
            self.unlink_ip(id, ip);
        }
        if let Some(device) = self.devices.remove(id) {
            for ip in &device.dedicated_ips {
                self.unlink_dedicated_ip(id, *ip);
            }
        }
        self.device_to_profile.remove(id);
    }

    fn is_stale(&self, id: &DeviceId) -> bool {
        match self.device_to_profile.get(id) {
            Some(profile_id) => self
                .profiles
                .get(profile_id)
                .map_or(true, |profile| !profile.has_device(id)),
            None => false,
        }
    }

    fn lookup(&self, id: &DeviceId) -> Result<(Arc<Profile>, Arc<Device>), ProfileError> {
        let profile_id = self
            .device_to_profile
            .get(id)
            .ok_or(ProfileError::DeviceNotFound)?;
        let profile = self
            .profiles
            .get(profile_id)
            .ok_or(ProfileError::ProfileNotFound)?;
        if !profile.has_device(id) {
            return Err(ProfileError::DeviceNotFound);
        }
        let device = self.devices.get(id).ok_or(ProfileError::DeviceNotFound)?;
        Ok((profile.clone(), device.clone()))
    }
}

struct SyncState {
    sync_time: Option<DateTime<Utc>>,
    full_sync_time: Option<DateTime<Utc>>,
}

pub struct ProfileDb {
    storage: Arc<dyn ProfileStorage>,
    cache_path: PathBuf,
    full_sync_interval: Duration,
    sync: Mutex<SyncState>,
    index: Arc<RwLock<Index>>,
    metrics: Arc<Metrics>,
    errors: Arc<dyn ErrorCollector>,
}

impl ProfileDb {
    pub async fn new(config: ProfileDbConfig) -> Self {
        let mut state = SyncState {
            sync_time: None,
            full_sync_time: None,
        };
        let mut index = Index::default();
        match filecache::load(&config.cache_path).await {
            Ok(Some(cache)) => {
                index = Index::build(cache.profiles, cache.devices, config.errors.as_ref());
                state.sync_time = Some(cache.sync_time);
                state.full_sync_time = Some(cache.sync_time);
                info!(
                    "Loaded {} profiles from {}",
                    index.profiles.len(),
                    config.cache_path.display()
                );
            }
            Ok(None) => (),
            Err(err) => config.errors.collect(err.context("loading profile cache")),
        }
        config
            .metrics
            .set_profiledb_size(index.profiles.len(), index.devices.len());

        Self {
            storage: config.storage,
            cache_path: config.cache_path,
            full_sync_interval: config.full_sync_interval,
            sync: Mutex::new(state),
            index: Arc::new(RwLock::new(index)),
            metrics: config.metrics,
            errors: config.errors,
        }
    }

    pub fn profile_by_device_id(
        &self,
        id: &DeviceId,
    ) -> Result<(Arc<Profile>, Arc<Device>), ProfileError> {
        let (result, stale) = {
            let index = self.index.read();
            let result = index.lookup(id);
            let stale = result.is_err() && index.is_stale(id);
            (result, stale)
        };
        if stale {
            self.cleanup(id.clone());
        }
        result
    }

    pub fn profile_by_linked_ip(
        &self,
        ip: IpAddr,
    ) -> Result<(Arc<Profile>, Arc<Device>), ProfileError> {
        let id = self
            .index
            .read()
            .ip_to_device_id
            .get(&ip)
            .cloned()
            .ok_or(ProfileError::DeviceNotFound)?;
        self.profile_by_device_id(&id)
    }

    pub fn profile_by_dedicated_ip(
        &self,
        ip: IpAddr,
    ) -> Result<(Arc<Profile>, Arc<Device>), ProfileError> {
        let id = self
            .index
            .read()
            .dedicated_ip_to_device_id
            .get(&ip)
            .cloned()
            .ok_or(ProfileError::DeviceNotFound)?;
        self.profile_by_device_id(&id)
    }

    fn cleanup(&self, id: DeviceId) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return,
        };
        let index = self.index.clone();
        handle.spawn(async move {
            let mut index = index.write();
            if index.is_stale(&id) {
                debug!("removing stale device {}", id);
                index.remove_device(&id);
            }
        });
    }

    async fn sync(&self) -> Result<()> {
        let mut state = self.sync.lock().await;
        let now = Utc::now();
        let full = state.full_sync_time.map_or(true, |last| {
            (now - last)
                .to_std()
                .map_or(false, |elapsed| elapsed >= self.full_sync_interval)
        });
        let request = StorageRequest {
            sync_time: if full { None } else { state.sync_time },
        };
        let response = self.storage.profiles(request).await?;
        debug!(
            "Got {} profiles and {} devices, full sync: {}",
            response.profiles.len(),
            response.devices.len(),
            full
        );

        let sync_time = response.sync_time;
        let snapshot = if full {
            let index = Index::build(
                response.profiles.clone(),
                response.devices.clone(),
                self.errors.as_ref(),
            );
            *self.index.write() = index;
            Some(FileCache {
                version: FILE_CACHE_VERSION,
                sync_time,
                profiles: response
                    .profiles
                    .into_iter()
                    .filter(|p| !p.deleted)
                    .collect(),
                devices: response.devices,
            })
        } else {
            self.index
                .write()
                .merge(response.profiles, response.devices);
            None
        };

        state.sync_time = Some(sync_time);
        if full {
            state.full_sync_time = Some(sync_time);
        }
        {
            let index = self.index.read();
            self.metrics
                .set_profiledb_size(index.profiles.len(), index.devices.len());
        }
        self.metrics.profiledb_synced(full);

        if let Some(snapshot) = snapshot {
            filecache::store(&self.cache_path, &snapshot).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Refresher for ProfileDb {
    async fn refresh(&self) -> Result<()> {
        self.sync().await
    }
}
