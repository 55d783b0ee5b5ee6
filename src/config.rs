use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::filter::FilterId;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub admin: Admin,
    pub filters: Filters,
    #[serde(default)]
    pub safe_search: SafeSearch,
    #[serde(default)]
    pub hash_prefix: HashPrefix,
    pub public_suffix_list_url: Option<String>,
    pub profiledb: Option<ProfileDb>,
}

impl Config {
    pub fn init() -> Result<Self> {
        let config_name = std::env::args()
            .nth(1)
            .ok_or_else(|| anyhow!("Config file should be specified as first argument"))?;
        Self::load(&config_name)
    }

    pub fn load(name: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name))
            .build()?;
        Ok(settings.try_deserialize::<Self>()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Admin {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Filters {
    pub cache_dir: PathBuf,
    pub rule_list_index_url: String,
    pub blocked_services_index_url: Option<String>,
    pub category_index_url: Option<String>,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub index_staleness: Duration,
    #[serde(with = "humantime_serde")]
    pub rule_list_staleness: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    pub max_size: u64,
    pub rule_list_cache_size: usize,
    #[serde(default, with = "humantime_serde")]
    pub rule_list_cache_ttl: Option<Duration>,
    pub category_cache_size: usize,
    pub custom_cache_size: usize,
    #[serde(default)]
    pub dnsrewrite_allowlist: Vec<FilterId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafeSearch {
    pub general_url: Option<String>,
    pub youtube_url: Option<String>,
    pub cache_size: usize,
    #[serde(default, with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
}

impl Default for SafeSearch {
    fn default() -> Self {
        Self {
            general_url: None,
            youtube_url: None,
            cache_size: 1024,
            cache_ttl: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HashPrefix {
    pub adult_blocking: Option<HashPrefixTable>,
    pub safe_browsing: Option<HashPrefixTable>,
    pub newly_registered: Option<HashPrefixTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashPrefixTable {
    pub url: String,
    pub replacement_host: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub staleness: Duration,
    pub cache_size: usize,
    #[serde(default, with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
    pub txt_suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileDb {
    pub storage_path: PathBuf,
    pub cache_path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub full_sync_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use pretty_assertions::assert_eq;

    use super::Config;

    #[test]
    fn should_load_yaml() -> anyhow::Result<()> {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        file.write_all(
            br#"
admin:
  bind_addr: "127.0.0.1:8181"
filters:
  cache_dir: /var/cache/dnsgate
  rule_list_index_url: https://filters.example/index.json
  refresh_interval: 1h
  refresh_timeout: 5m
  index_staleness: 1h
  rule_list_staleness: 12h
  fetch_timeout: 30s
  max_size: 268435456
  rule_list_cache_size: 10000
  rule_list_cache_ttl: 10m
  category_cache_size: 1000
  custom_cache_size: 1000
  dnsrewrite_allowlist: [safe_search_rewrites]
hash_prefix:
  adult_blocking:
    url: https://filters.example/adult.txt
    replacement_host: family-block.dns.example
    ttl: 10s
    staleness: 1h
    cache_size: 10000
    txt_suffix: family.dns.example
public_suffix_list_url: https://publicsuffix.org/list/public_suffix_list.dat
"#,
        )?;

        let config = Config::load(file.path().to_str().unwrap())?;

        assert_eq!(config.admin.bind_addr, "127.0.0.1:8181".parse()?);
        assert_eq!(config.filters.refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.filters.rule_list_cache_ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.filters.dnsrewrite_allowlist[0].as_str(), "safe_search_rewrites");
        assert_eq!(config.safe_search.cache_size, 1024);
        let adult = config.hash_prefix.adult_blocking.unwrap();
        assert_eq!(adult.ttl, Duration::from_secs(10));
        assert_eq!(adult.txt_suffix.as_deref(), Some("family.dns.example"));
        assert!(config.hash_prefix.safe_browsing.is_none());
        assert!(config.profiledb.is_none());
        Ok(())
    }
}
