use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};

use super::{CacheKey, CategoryId, FilterCache, FilterId, FilterResult, RequestContext, RuleText};
use crate::{dns::normalize_host, psl::PublicSuffixes};

pub struct CategoryFilter {
    id: CategoryId,
    list: FilterId,
    domains: HashSet<String>,
    psl: Arc<PublicSuffixes>,
    cache: Option<FilterCache>,
}

impl CategoryFilter {
    pub fn new(
        id: CategoryId,
        data: &[u8],
        psl: Arc<PublicSuffixes>,
        cache: Option<FilterCache>,
    ) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .with_context(|| format!("category {}: bad domain list", id))?;
        let domains = text
            .lines()
            .map(str::trim)
            .filter(|x| !x.is_empty() && !x.starts_with('#'))
            .map(normalize_host)
            .collect();
        Ok(Self {
            list: FilterId::from(&id),
            id,
            domains,
            psl,
            cache,
        })
    }

    pub fn id(&self) -> &CategoryId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn filter_request(&self, ctx: &RequestContext) -> Result<Option<FilterResult>> {
        let key = CacheKey::new(ctx.host(), ctx.qtype(), ctx.qclass(), false);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(cached);
        }
        let result = match self.matching_domain(ctx.host()) {
            Some(domain) => Some(FilterResult::Blocked {
                list: self.list.clone(),
                rule: RuleText::new(domain)?,
            }),
            None => None,
        };
        if let Some(cache) = &self.cache {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    fn matching_domain<'a>(&self, host: &'a str) -> Option<&'a str> {
        let suffix_len = self.psl.icann_suffix(host).map_or(0, str::len);
        let mut rest = host;
        loop {
            if rest.len() <= suffix_len {
                return None;
            }
            if self.domains.contains(rest) {
                return Some(rest);
            }
            rest = rest.split_once('.')?.1;
        }
    }
}
