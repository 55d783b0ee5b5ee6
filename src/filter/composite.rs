use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    category::CategoryFilter,
    hashprefix::{HashPrefixFilter, TxtMatcher},
    rulelist::RuleList,
    safesearch::SafeSearchFilter,
    Filter, FilterResult, RequestContext,
};
use crate::dns::Response;

/// Filters selected for one filtering configuration, checked in a fixed
/// order. The first result wins, except that an allowlist rule of any rule
/// list beats blocking rules of the others.
#[derive(Default)]
pub struct Composite {
    pub(super) txt: Option<Arc<TxtMatcher>>,
    pub(super) custom: Option<Arc<RuleList>>,
    pub(super) rule_lists: Vec<Arc<RuleList>>,
    pub(super) safe_search: Vec<Arc<SafeSearchFilter>>,
    pub(super) services: Vec<Arc<RuleList>>,
    pub(super) adult_blocking: Option<Arc<HashPrefixFilter>>,
    pub(super) categories: Vec<Arc<CategoryFilter>>,
    pub(super) safe_browsing: Option<Arc<HashPrefixFilter>>,
    pub(super) newly_registered: Option<Arc<HashPrefixFilter>>,
}

impl Composite {
    pub fn is_empty(&self) -> bool {
        self.txt.is_none()
            && self.custom.is_none()
            && self.rule_lists.is_empty()
            && self.safe_search.is_empty()
            && self.services.is_empty()
            && self.adult_blocking.is_none()
            && self.categories.is_empty()
            && self.safe_browsing.is_none()
            && self.newly_registered.is_none()
    }

    pub fn has_parental(&self) -> bool {
        !self.safe_search.is_empty()
            || !self.services.is_empty()
            || self.adult_blocking.is_some()
            || !self.categories.is_empty()
    }
}

fn first_of_lists(
    lists: &[Arc<RuleList>],
    filter: impl Fn(&RuleList) -> Option<FilterResult>,
) -> Option<FilterResult> {
    let mut first = None;
    for list in lists {
        match filter(list) {
            Some(result @ FilterResult::Allowed { .. }) => return Some(result),
            Some(result) => {
                if first.is_none() {
                    first = Some(result);
                }
            }
            None => (),
        }
    }
    first
}

#[async_trait]
impl Filter for Composite {
    async fn filter_request(&self, ctx: &RequestContext) -> Result<Option<FilterResult>> {
        if let Some(txt) = &self.txt {
            if let Some(result) = txt.match_request(ctx)? {
                return Ok(Some(result));
            }
        }
        if let Some(result) = self.custom.as_ref().and_then(|c| c.filter_request(ctx)) {
            return Ok(Some(result));
        }
        if let Some(result) = first_of_lists(&self.rule_lists, |l| l.filter_request(ctx)) {
            return Ok(Some(result));
        }

        if let Some(result) = self.safe_search.iter().find_map(|f| f.filter_request(ctx)) {
            return Ok(Some(result));
        }
        if let Some(result) = self.services.iter().find_map(|l| l.filter_request(ctx)) {
            return Ok(Some(result));
        }
        if let Some(adult) = &self.adult_blocking {
            if let Some(result) = adult.filter_request(ctx).await? {
                return Ok(Some(result));
            }
        }
        for category in &self.categories {
            if let Some(result) = category.filter_request(ctx)? {
                return Ok(Some(result));
            }
        }

        for filter in [&self.safe_browsing, &self.newly_registered].into_iter().flatten() {
            if let Some(result) = filter.filter_request(ctx).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    async fn filter_response(
        &self,
        ctx: &RequestContext,
        response: &Response,
    ) -> Result<Option<FilterResult>> {
        if let Some(result) = self
            .custom
            .as_ref()
            .and_then(|c| c.filter_response(ctx, response))
        {
            return Ok(Some(result));
        }
        if let Some(result) =
            first_of_lists(&self.rule_lists, |l| l.filter_response(ctx, response))
        {
            return Ok(Some(result));
        }
        Ok(self
            .services
            .iter()
            .find_map(|l| l.filter_response(ctx, response)))
    }
}
