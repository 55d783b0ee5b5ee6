use std::{net::IpAddr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    cache::{ClearableCache, ResultCache},
    cache_manager::CacheManager,
    dns::{RecordType, Request, Response},
    metrics::Metrics,
};

pub mod cache_key;
pub mod category;
pub mod composite;
pub mod config;
pub mod custom;
pub mod hashprefix;
pub mod id;
pub mod index;
pub mod rulelist;
pub mod safesearch;
pub mod schedule;
pub mod service;
pub mod storage;

pub use cache_key::CacheKey;
pub use composite::Composite;
pub use config::FilterConfig;
pub use id::{BlockedServiceId, CategoryId, FilterId, IdError, RuleText};
pub use storage::FilterStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    Allowed {
        list: FilterId,
        rule: RuleText,
    },
    Blocked {
        list: FilterId,
        rule: RuleText,
    },
    ModifiedRequest {
        request: Request,
        list: FilterId,
        rule: RuleText,
    },
    ModifiedResponse {
        response: Response,
        list: FilterId,
        rule: RuleText,
    },
}

impl FilterResult {
    pub fn list(&self) -> &FilterId {
        match self {
            FilterResult::Allowed { list, .. }
            | FilterResult::Blocked { list, .. }
            | FilterResult::ModifiedRequest { list, .. }
            | FilterResult::ModifiedResponse { list, .. } => list,
        }
    }

    pub fn rule(&self) -> &RuleText {
        match self {
            FilterResult::Allowed { rule, .. }
            | FilterResult::Blocked { rule, .. }
            | FilterResult::ModifiedRequest { rule, .. }
            | FilterResult::ModifiedResponse { rule, .. } => rule,
        }
    }

    pub fn for_request(mut self, request: &Request) -> Self {
        match &mut self {
            FilterResult::ModifiedRequest { request: r, .. } => r.id = request.id,
            FilterResult::ModifiedResponse { response, .. } => response.id = request.id,
            FilterResult::Allowed { .. } | FilterResult::Blocked { .. } => (),
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: Request,
    pub client_ip: Option<IpAddr>,
    pub client_name: Option<String>,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_ip: None,
            client_name: None,
        }
    }

    pub fn with_client(mut self, ip: Option<IpAddr>, name: Option<String>) -> Self {
        self.client_ip = ip;
        self.client_name = name;
        self
    }

    pub fn host(&self) -> &str {
        self.request.host()
    }

    pub fn qtype(&self) -> RecordType {
        self.request.qtype()
    }

    pub fn qclass(&self) -> u16 {
        self.request.qclass()
    }
}

#[async_trait]
pub trait Filter: Send + Sync {
    async fn filter_request(&self, ctx: &RequestContext) -> Result<Option<FilterResult>>;

    async fn filter_response(
        &self,
        ctx: &RequestContext,
        response: &Response,
    ) -> Result<Option<FilterResult>>;
}

/// Result cache of one filter reporting hits and misses to metrics. A cached
/// `None` is a stored miss.
#[derive(Clone)]
pub struct FilterCache {
    id: Arc<str>,
    cache: Arc<ResultCache<CacheKey, Option<FilterResult>>>,
    metrics: Arc<Metrics>,
}

impl FilterCache {
    pub fn new(
        id: &str,
        capacity: usize,
        ttl: Option<Duration>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id: id.into(),
            cache: Arc::new(ResultCache::new(capacity, ttl)),
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn register(&self, manager: &CacheManager) {
        manager.add(self.id.as_ref(), self.cache.clone());
    }

    pub fn get(&self, key: &CacheKey) -> Option<Option<FilterResult>> {
        let cached = self.cache.get(key);
        self.metrics.cache_lookup(&self.id, cached.is_some());
        cached
    }

    pub fn insert(&self, key: CacheKey, result: Option<FilterResult>) {
        self.cache.insert(key, result);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
