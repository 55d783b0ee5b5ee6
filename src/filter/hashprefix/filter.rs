use std::{net::IpAddr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use super::storage::HashStorage;
use crate::{
    dns::{Rcode, RecordData, RecordType, Response},
    filter::{CacheKey, Filter, FilterCache, FilterId, FilterResult, RequestContext, RuleText},
    psl::PublicSuffixes,
    refreshable::Refreshable,
    resolver::{IpFamily, Resolver},
};

const MAX_LABELS: usize = 4;

pub struct HashPrefixConfig {
    pub id: FilterId,
    pub storage: Arc<HashStorage>,
    pub resolver: Arc<dyn Resolver>,
    pub replacement_host: String,
    pub ttl: Duration,
    pub cache: FilterCache,
    pub psl: Arc<PublicSuffixes>,
    pub refreshable: Refreshable,
}

pub struct HashPrefixFilter {
    id: FilterId,
    storage: Arc<HashStorage>,
    resolver: Arc<dyn Resolver>,
    replacement_host: String,
    ttl: u32,
    cache: FilterCache,
    psl: Arc<PublicSuffixes>,
    refreshable: Refreshable,
}

impl HashPrefixFilter {
    pub fn new(config: HashPrefixConfig) -> Self {
        Self {
            id: config.id,
            storage: config.storage,
            resolver: config.resolver,
            replacement_host: config.replacement_host,
            ttl: config.ttl.as_secs().try_into().unwrap_or(u32::MAX),
            cache: config.cache,
            psl: config.psl,
            refreshable: config.refreshable,
        }
    }

    pub fn id(&self) -> &FilterId {
        &self.id
    }

    pub async fn refresh(&self, accept_stale: bool) -> Result<usize> {
        let data = self.refreshable.refresh(accept_stale).await?;
        self.cache.clear();
        let count = self.storage.reset(&data)?;
        // Lookups racing the swap may have cached results of the old table.
        self.cache.clear();
        Ok(count)
    }

    /// Builds the response for a matched host. Resolver failures give a
    /// SERVFAIL that must not be cached.
    async fn matched(
        &self,
        ctx: &RequestContext,
        family: Option<IpFamily>,
        host: &str,
    ) -> Result<(FilterResult, bool)> {
        let rule = RuleText::new(host)?;
        let (response, cacheable) = match family {
            None => (Response::new(&ctx.request, Rcode::NxDomain), true),
            Some(family) => match self.resolver.lookup_ip(&self.replacement_host, family).await {
                Ok(ips) => {
                    let answers = ips.into_iter().map(|ip| match ip {
                        IpAddr::V4(ip) => RecordData::A(ip),
                        IpAddr::V6(ip) => RecordData::Aaaa(ip),
                    });
                    (Response::with_answers(&ctx.request, self.ttl, answers), true)
                }
                Err(err) => {
                    debug!("{}: resolving {}: {:#}", self.id, self.replacement_host, err);
                    (Response::new(&ctx.request, Rcode::ServFail), false)
                }
            },
        };
        let result = FilterResult::ModifiedResponse {
            response,
            list: self.id.clone(),
            rule,
        };
        Ok((result, cacheable))
    }
}

#[async_trait]
impl Filter for HashPrefixFilter {
    async fn filter_request(&self, ctx: &RequestContext) -> Result<Option<FilterResult>> {
        let family = match ctx.qtype() {
            RecordType::A => Some(IpFamily::V4),
            RecordType::AAAA => Some(IpFamily::V6),
            RecordType::HTTPS => None,
            _ => return Ok(None),
        };
        let key = CacheKey::new(ctx.host(), ctx.qtype(), ctx.qclass(), false);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.map(|r| r.for_request(&ctx.request)));
        }

        let matched = hashable_subdomains(ctx.host(), &self.psl)
            .into_iter()
            .find(|domain| self.storage.matches(domain));
        let result = match matched {
            Some(domain) => {
                let (result, cacheable) = self.matched(ctx, family, domain).await?;
                if !cacheable {
                    return Ok(Some(result));
                }
                Some(result)
            }
            None => None,
        };
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    async fn filter_response(
        &self,
        _ctx: &RequestContext,
        _response: &Response,
    ) -> Result<Option<FilterResult>> {
        Ok(None)
    }
}

pub fn hashable_subdomains<'a>(host: &'a str, psl: &PublicSuffixes) -> Vec<&'a str> {
    let host = match host.rmatch_indices('.').nth(MAX_LABELS - 1) {
        Some((idx, _)) => &host[idx + 1..],
        None => host,
    };
    let suffix_len = psl.icann_suffix(host).map_or(0, str::len);
    let mut subdomains = Vec::new();
    let mut rest = host;
    while rest.len() > suffix_len {
        subdomains.push(rest);
        match rest.split_once('.') {
            Some((_, parent)) => rest = parent,
            None => break,
        }
    }
    subdomains
}
