use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use dnsgate::{
    admin,
    cache_manager::CacheManager,
    config::Config,
    errcoll::{ErrorCollector, LogErrorCollector},
    filter::{storage::StorageConfig, FilterStorage},
    metrics::Metrics,
    profiledb::{JsonFileStorage, ProfileDb, ProfileDbConfig},
    psl::PublicSuffixes,
    refreshable::{Refreshable, RefreshableConfig},
    refresher::{self, Refresher},
    resolver::SystemResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::init()?;
    info!("Starting service");

    let registry = prometheus::default_registry().clone();
    let metrics = Arc::new(Metrics::new(&registry)?);
    let errors: Arc<dyn ErrorCollector> =
        Arc::new(LogErrorCollector::new(Some(metrics.errors_counter())));
    let psl = Arc::new(load_public_suffixes(&config).await);
    let cache_manager = Arc::new(CacheManager::new());

    let filters = Arc::new(FilterStorage::new(StorageConfig {
        filters: config.filters.clone(),
        safe_search: config.safe_search.clone(),
        hash_prefix: config.hash_prefix.clone(),
        resolver: Arc::new(SystemResolver),
        psl,
        cache_manager: cache_manager.clone(),
        metrics: metrics.clone(),
        errors: errors.clone(),
    })?);
    if let Err(err) = filters.refresh_initial().await {
        errors.collect(err.context("initial filters refresh"));
    }
    refresher::spawn_worker(
        "filters",
        filters,
        config.filters.refresh_interval,
        config.filters.refresh_timeout,
    );

    if let Some(profiledb) = config.profiledb {
        let db = Arc::new(
            ProfileDb::new(ProfileDbConfig {
                storage: Arc::new(JsonFileStorage::new(profiledb.storage_path)),
                cache_path: profiledb.cache_path,
                full_sync_interval: profiledb.full_sync_interval,
                metrics,
                errors: errors.clone(),
            })
            .await,
        );
        if let Err(err) = db.refresh().await {
            errors.collect(err.context("initial profiles sync"));
        }
        refresher::spawn_worker(
            "profiledb",
            db,
            profiledb.refresh_interval,
            profiledb.refresh_timeout,
        );
    }

    admin::serve(config.admin.bind_addr, registry, cache_manager).await;
    Ok(())
}

async fn load_public_suffixes(config: &Config) -> PublicSuffixes {
    let url = match &config.public_suffix_list_url {
        Some(url) => url,
        None => return PublicSuffixes::fallback(),
    };
    let list = async {
        let refreshable = Refreshable::new(RefreshableConfig {
            id: "public_suffix_list".to_owned(),
            url: url.parse()?,
            cache_path: config.filters.cache_dir.join("public_suffix_list.dat"),
            staleness: config.filters.index_staleness,
            timeout: config.filters.fetch_timeout,
            max_size: config.filters.max_size,
        })?;
        let data = refreshable.refresh(true).await?;
        PublicSuffixes::parse(&String::from_utf8_lossy(&data))
    };
    match list.await {
        Ok(list) => list,
        Err(err) => {
            warn!("Using built-in public suffixes: {:#}", err);
            PublicSuffixes::fallback()
        }
    }
}
