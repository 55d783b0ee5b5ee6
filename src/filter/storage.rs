use std::{
    any::Any,
    collections::HashMap,
    hash::Hash,
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use log::{error, info};
use parking_lot::RwLock;
use reqwest::Url;
use tokio::sync::mpsc;

use super::{
    category::CategoryFilter,
    composite::Composite,
    config::FilterConfig,
    custom::CustomFilters,
    hashprefix::{HashPrefixConfig, HashPrefixFilter, HashStorage, TxtMatcher},
    index::{decode_categories, decode_rule_lists},
    rulelist::{CompileOptions, RuleList},
    safesearch::SafeSearchFilter,
    service::ServiceFilter,
    CategoryId, FilterCache, FilterId,
};
use crate::{
    cache_manager::CacheManager,
    config,
    errcoll::ErrorCollector,
    metrics::Metrics,
    psl::PublicSuffixes,
    refreshable::{Refreshable, RefreshableConfig},
    refresher::Refresher,
    resolver::Resolver,
};

pub struct StorageConfig {
    pub filters: config::Filters,
    pub safe_search: config::SafeSearch,
    pub hash_prefix: config::HashPrefix,
    pub resolver: Arc<dyn Resolver>,
    pub psl: Arc<PublicSuffixes>,
    pub cache_manager: Arc<CacheManager>,
    pub metrics: Arc<Metrics>,
    pub errors: Arc<dyn ErrorCollector>,
}

pub struct FilterStorage {
    config: config::Filters,
    rule_list_index: Refreshable,
    category_index: Option<Refreshable>,
    rule_lists: RwLock<HashMap<FilterId, Arc<RuleList>>>,
    categories: RwLock<HashMap<CategoryId, Arc<CategoryFilter>>>,
    services: Option<ServiceFilter>,
    safe_search: Vec<Arc<SafeSearchFilter>>,
    safe_search_cache: (usize, Option<Duration>),
    adult_blocking: Option<Arc<HashPrefixFilter>>,
    safe_browsing: Option<Arc<HashPrefixFilter>>,
    newly_registered: Option<Arc<HashPrefixFilter>>,
    txt: Option<Arc<TxtMatcher>>,
    custom: CustomFilters,
    psl: Arc<PublicSuffixes>,
    cache_manager: Arc<CacheManager>,
    metrics: Arc<Metrics>,
    errors: Arc<dyn ErrorCollector>,
}

impl FilterStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let StorageConfig {
            filters,
            safe_search: safe_search_config,
            hash_prefix,
            resolver,
            psl,
            cache_manager,
            metrics,
            errors,
        } = config;

        let index = |id: &str, url: &str| {
            let path = filters.cache_dir.join(format!("{}.json", id));
            Refreshable::new(RefreshableConfig {
                staleness: filters.index_staleness,
                ..refreshable(&filters, id, url, path)?
            })
        };
        let rule_list_index = index("rule_lists_index", &filters.rule_list_index_url)?;
        let category_index = filters
            .category_index_url
            .as_deref()
            .map(|url| index("categories_index", url))
            .transpose()?;
        let services = filters
            .blocked_services_index_url
            .as_deref()
            .map(|url| index("blocked_services_index", url).map(ServiceFilter::new))
            .transpose()?;

        let mut safe_search = Vec::new();
        for (id, url) in [
            (FilterId::GENERAL_SAFE_SEARCH, &safe_search_config.general_url),
            (FilterId::YOUTUBE_SAFE_SEARCH, &safe_search_config.youtube_url),
        ] {
            if let Some(url) = url {
                let path = filters.cache_dir.join(format!("{}.txt", id));
                let refreshable = Refreshable::new(refreshable(&filters, id, url, path)?)?;
                safe_search.push(Arc::new(SafeSearchFilter::new(
                    FilterId::reserved(id),
                    refreshable,
                )));
            }
        }

        let mut txt = TxtMatcher::new();
        let mut hash_prefix_filter = |id: &'static str,
                                      table: Option<config::HashPrefixTable>|
         -> Result<Option<Arc<HashPrefixFilter>>> {
            let table = match table {
                Some(table) => table,
                None => return Ok(None),
            };
            let path = filters.cache_dir.join(format!("{}.txt", id));
            let refreshable = Refreshable::new(RefreshableConfig {
                staleness: table.staleness,
                ..refreshable(&filters, id, &table.url, path)?
            })?;
            let storage = Arc::new(HashStorage::new());
            if let Some(suffix) = &table.txt_suffix {
                txt.add_table(suffix, FilterId::reserved(id), storage.clone());
            }
            let cache = FilterCache::new(
                &format!("filters/{}", id),
                table.cache_size,
                table.cache_ttl,
                metrics.clone(),
            );
            cache.register(&cache_manager);
            Ok(Some(Arc::new(HashPrefixFilter::new(HashPrefixConfig {
                id: FilterId::reserved(id),
                storage,
                resolver: resolver.clone(),
                replacement_host: table.replacement_host,
                ttl: table.ttl,
                cache,
                psl: psl.clone(),
                refreshable,
            }))))
        };
        let adult_blocking = hash_prefix_filter(FilterId::ADULT_BLOCKING, hash_prefix.adult_blocking)?;
        let safe_browsing = hash_prefix_filter(FilterId::SAFE_BROWSING, hash_prefix.safe_browsing)?;
        let newly_registered =
            hash_prefix_filter(FilterId::NEWLY_REGISTERED, hash_prefix.newly_registered)?;

        let custom = CustomFilters::new(filters.custom_cache_size);
        cache_manager.add("filters/custom", custom.cache());

        Ok(Self {
            rule_list_index,
            category_index,
            rule_lists: RwLock::new(HashMap::new()),
            categories: RwLock::new(HashMap::new()),
            services,
            safe_search,
            safe_search_cache: (safe_search_config.cache_size, safe_search_config.cache_ttl),
            adult_blocking,
            safe_browsing,
            newly_registered,
            txt: (!txt.is_empty()).then(|| Arc::new(txt)),
            custom,
            psl,
            cache_manager,
            metrics,
            errors,
            config: filters,
        })
    }

    pub fn has_list_id(&self, id: &FilterId) -> bool {
        self.rule_lists.read().contains_key(id)
    }

    pub async fn refresh_initial(&self) -> Result<()> {
        self.refresh_all(true).await
    }

    pub fn for_config(&self, config: &FilterConfig, now: DateTime<Utc>) -> Composite {
        let mut composite = Composite {
            txt: self.txt.clone(),
            ..Default::default()
        };

        if let Some(custom) = config.custom.as_ref().filter(|c| !c.rules.is_empty()) {
            composite.custom = Some(self.custom.get(custom));
        }
        if config.rule_lists.enabled {
            let lists = self.rule_lists.read();
            composite.rule_lists = select(&lists, &config.rule_lists.ids);
        }

        let parental = &config.parental;
        if parental.enabled && !parental.is_paused(now) {
            composite.safe_search = self
                .safe_search
                .iter()
                .filter(|f| match f.id().as_str() {
                    FilterId::GENERAL_SAFE_SEARCH => parental.safe_search_general,
                    FilterId::YOUTUBE_SAFE_SEARCH => parental.safe_search_youtube,
                    _ => false,
                })
                .cloned()
                .collect();
            if let Some(services) = &self.services {
                composite.services = services.lists(&parental.blocked_services);
            }
            if parental.adult_blocking {
                composite.adult_blocking = self.adult_blocking.clone();
            }
            let categories = self.categories.read();
            composite.categories = select(&categories, &parental.categories);
        }

        let safe_browsing = &config.safe_browsing;
        if safe_browsing.enabled {
            if safe_browsing.dangerous_domains {
                composite.safe_browsing = self.safe_browsing.clone();
            }
            if safe_browsing.newly_registered {
                composite.newly_registered = self.newly_registered.clone();
            }
        }
        composite
    }

    async fn refresh_all(&self, accept_stale: bool) -> Result<()> {
        let started = Instant::now();
        info!("Refreshing filters, accept stale: {}", accept_stale);
        let timeout = self.config.refresh_timeout;
        let result = tokio::time::timeout(timeout, self.refresh_round(accept_stale))
            .await
            .map_err(|_| anyhow!("filters refresh timed out after {:?}", timeout))
            .and_then(|r| r);
        self.metrics.observe_refresh("filters", started);
        match &result {
            Ok(()) => info!("Refreshed filters in {:?}", started.elapsed()),
            Err(err) => error!("Failed to refresh filters: {:#}", err),
        }
        result
    }

    async fn refresh_round(&self, accept_stale: bool) -> Result<()> {
        let rule_lists = self.refresh_rule_lists(accept_stale).await;
        let categories = self.refresh_categories(accept_stale).await;

        if let Some(services) = &self.services {
            let result = services.refresh(accept_stale, self.errors.as_ref()).await;
            self.report(FilterId::BLOCKED_SERVICE, result);
        }
        for filter in &self.safe_search {
            let (capacity, ttl) = self.safe_search_cache;
            let cache = FilterCache::new(
                &format!("filters/{}", filter.id()),
                capacity,
                ttl,
                self.metrics.clone(),
            );
            let result = filter.refresh(accept_stale, Some(cache.clone())).await;
            if result.is_ok() {
                cache.register(&self.cache_manager);
            }
            self.report(filter.id().as_str(), result);
        }
        for filter in [&self.adult_blocking, &self.safe_browsing, &self.newly_registered]
            .into_iter()
            .flatten()
        {
            let result = filter.refresh(accept_stale).await;
            self.report(filter.id().as_str(), result);
        }

        rule_lists.and(categories)
    }

    fn report(&self, id: &str, result: Result<usize>) {
        match result {
            Ok(count) => {
                info!("{}: {} entries", id, count);
                self.metrics.set_filter_status(id, Some(count));
            }
            Err(err) => {
                self.metrics.set_filter_status(id, None);
                self.errors
                    .collect(err.context(format!("refreshing filter {}", id)));
            }
        }
    }

    async fn refresh_rule_lists(&self, accept_stale: bool) -> Result<()> {
        let data = self
            .rule_list_index
            .refresh(accept_stale)
            .await
            .context("rule list index")?;
        let entries = decode_rule_lists(&data, self.errors.as_ref())?;

        let tasks = entries
            .into_iter()
            .map(|entry| {
                let task = self.compile_rule_list(entry.id.clone(), entry.url, accept_stale)?;
                Ok((entry.id, task))
            })
            .collect::<Result<Vec<_>>>()?;
        let results = fan_in(tasks).await;

        let lists = self.install(&self.rule_lists, results, RuleList::rules_count);
        info!("Installed {} rule lists", lists);
        Ok(())
    }

    fn compile_rule_list(
        &self,
        id: FilterId,
        url: Url,
        accept_stale: bool,
    ) -> Result<BoxFuture<'static, Result<(RuleList, FilterCache)>>> {
        let path = self.config.cache_dir.join(format!("{}.txt", id));
        let refreshable =
            Refreshable::new(refreshable(&self.config, id.as_str(), url.as_str(), path)?)?;
        let options = CompileOptions {
            rewrites: self.config.dnsrewrite_allowlist.contains(&id),
            client_rules: false,
        };
        let cache = FilterCache::new(
            &format!("filters/{}", id),
            self.config.rule_list_cache_size,
            self.config.rule_list_cache_ttl,
            self.metrics.clone(),
        );
        Ok(async move {
            let data = refreshable.refresh(accept_stale).await?;
            let list_cache = cache.clone();
            let list = tokio::task::spawn_blocking(move || {
                RuleList::from_bytes(&data, id, None, options, Some(list_cache))
            })
            .await??;
            Ok((list, cache))
        }
        .boxed())
    }

    fn compile_category(
        &self,
        id: CategoryId,
        url: Url,
        accept_stale: bool,
    ) -> Result<BoxFuture<'static, Result<(CategoryFilter, FilterCache)>>> {
        let path = self
            .config
            .cache_dir
            .join("categories")
            .join(format!("{}.txt", id));
        let refreshable =
            Refreshable::new(refreshable(&self.config, id.as_str(), url.as_str(), path)?)?;
        let cache = FilterCache::new(
            &format!("categories/{}", id),
            self.config.category_cache_size,
            None,
            self.metrics.clone(),
        );
        let psl = self.psl.clone();
        Ok(async move {
            let data = refreshable.refresh(accept_stale).await?;
            let filter_cache = cache.clone();
            let filter = tokio::task::spawn_blocking(move || {
                CategoryFilter::new(id, &data, psl, Some(filter_cache))
            })
            .await??;
            Ok((filter, cache))
        }
        .boxed())
    }

    async fn refresh_categories(&self, accept_stale: bool) -> Result<()> {
        let index = match &self.category_index {
            Some(index) => index,
            None => return Ok(()),
        };
        let data = index.refresh(accept_stale).await.context("category index")?;
        let entries = decode_categories(&data, self.errors.as_ref())?;

        let tasks = entries
            .into_iter()
            .map(|entry| {
                let task = self.compile_category(entry.id.clone(), entry.url, accept_stale)?;
                Ok((entry.id, task))
            })
            .collect::<Result<Vec<_>>>()?;
        let results = fan_in(tasks).await;

        let categories = self.install(&self.categories, results, CategoryFilter::len);
        info!("Installed {} categories", categories);
        Ok(())
    }

    /// Publishes the compiled filters of a round. Filters that failed keep
    /// the version of the previous round, if there is one. Result caches are
    /// registered only here, so a compile that outlives its round never
    /// replaces the cache of a published filter.
    fn install<K, T>(
        &self,
        current: &RwLock<HashMap<K, Arc<T>>>,
        results: Vec<(K, Result<(T, FilterCache)>)>,
        size: impl Fn(&T) -> usize,
    ) -> usize
    where
        K: Hash + Eq + std::fmt::Display,
    {
        let mut next = HashMap::with_capacity(results.len());
        for (id, result) in results {
            let key = id.to_string();
            match result {
                Ok((filter, cache)) => {
                    self.metrics.set_filter_status(&key, Some(size(&filter)));
                    cache.register(&self.cache_manager);
                    next.insert(id, Arc::new(filter));
                }
                Err(err) => {
                    self.metrics.set_filter_status(&key, None);
                    self.errors
                        .collect(err.context(format!("refreshing filter {}", key)));
                    if let Some(previous) = current.read().get(&id) {
                        next.insert(id, previous.clone());
                    }
                }
            }
        }
        let count = next.len();
        *current.write() = next;
        count
    }
}

#[async_trait]
impl Refresher for FilterStorage {
    async fn refresh(&self) -> Result<()> {
        self.refresh_all(false).await
    }
}

fn refreshable(
    config: &config::Filters,
    id: &str,
    url: &str,
    cache_path: PathBuf,
) -> Result<RefreshableConfig> {
    Ok(RefreshableConfig {
        id: id.to_owned(),
        url: url.parse().with_context(|| format!("{}: bad url {:?}", id, url))?,
        cache_path,
        staleness: config.rule_list_staleness,
        timeout: config.fetch_timeout,
        max_size: config.max_size,
    })
}

fn select<K: Hash + Eq, T>(filters: &HashMap<K, Arc<T>>, ids: &[K]) -> Vec<Arc<T>> {
    ids.iter().filter_map(|id| filters.get(id).cloned()).collect()
}

async fn fan_in<K, T>(tasks: Vec<(K, BoxFuture<'static, Result<T>>)>) -> Vec<(K, Result<T>)>
where
    K: Send + 'static,
    T: Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(tasks.len().max(1));
    for (key, task) in tasks {
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow!("panicked: {}", panic_message(&panic))));
            let _ = tx.send((key, result)).await;
        });
    }
    drop(tx);

    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
