use std::{
    fs::FileTimes,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{anyhow, bail, Context, Result};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode, Url};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone)]
pub struct RefreshableConfig {
    pub id: String,
    pub url: Url,
    pub cache_path: PathBuf,
    pub staleness: Duration,
    pub timeout: Duration,
    pub max_size: u64,
}

pub struct Refreshable {
    http: Client,
    id: String,
    url: Url,
    cache_path: PathBuf,
    staleness: Duration,
    max_size: u64,
}

impl Refreshable {
    pub fn new(config: RefreshableConfig) -> Result<Self> {
        let http = Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            id: config.id,
            url: config.url,
            cache_path: config.cache_path,
            staleness: config.staleness,
            max_size: config.max_size,
        })
    }

    pub async fn refresh(&self, accept_stale: bool) -> Result<Bytes> {
        if self.url.scheme() == "file" {
            let path = self
                .url
                .to_file_path()
                .map_err(|_| anyhow!("{}: bad file url {}", self.id, self.url))?;
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("{}: reading {}", self.id, path.display()))?;
            return Ok(Bytes::from(content));
        }

        let now = SystemTime::now();
        match self.use_cached(accept_stale, now).await {
            Ok(Some(cached)) => {
                debug!("{}: using cached copy {}", self.id, self.cache_path.display());
                return Ok(cached);
            }
            Ok(None) => (),
            Err(err) => warn!(
                "{}: reading cache {}: {:#}",
                self.id,
                self.cache_path.display(),
                err
            ),
        }

        let body = self
            .fetch()
            .await
            .with_context(|| format!("{}: fetching {}", self.id, self.url))?;
        let path = self.cache_path.clone();
        let content = body.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &content, Some(now)))
            .await?
            .with_context(|| format!("{}: writing cache", self.id))?;
        info!("{}: fetched {} bytes from {}", self.id, body.len(), self.url);
        Ok(body)
    }

    async fn use_cached(&self, accept_stale: bool, now: SystemTime) -> Result<Option<Bytes>> {
        let mut file = match tokio::fs::File::open(&self.cache_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        let fresh_until = metadata.modified()?.checked_add(self.staleness);
        if !accept_stale && fresh_until.map_or(false, |until| until <= now) {
            debug!("{}: cached copy is stale", self.id);
            return Ok(None);
        }
        let mut content = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut content).await?;
        if content.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(content)))
    }

    async fn fetch(&self) -> Result<Bytes> {
        let mut response = self.http.get(self.url.clone()).send().await?;
        match response.status() {
            StatusCode::OK => (),
            code => bail!("unexpected status code {}", code),
        }
        if let Some(len) = response.content_length() {
            if len > self.max_size {
                bail!("content length {} exceeds {} bytes", len, self.max_size);
            }
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > self.max_size {
                bail!("response exceeds {} bytes", self.max_size);
            }
            body.extend_from_slice(&chunk);
        }
        if body.is_empty() {
            bail!("empty response");
        }
        Ok(body.freeze())
    }
}

/// Replaces the file at `path` with `data` through a temporary file in the
/// same directory, so readers see either the old or the new content.
pub fn write_atomic(path: &Path, data: &[u8], times: Option<SystemTime>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    if let Some(time) = times {
        tmp.as_file()
            .set_times(FileTimes::new().set_accessed(time).set_modified(time))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
