use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwapOption;

use super::{
    rulelist::{CompileOptions, RuleList},
    FilterCache, FilterId, FilterResult, RequestContext,
};
use crate::{dns::RecordType, refreshable::Refreshable};

pub struct SafeSearchFilter {
    id: FilterId,
    refreshable: Refreshable,
    list: ArcSwapOption<RuleList>,
}

impl SafeSearchFilter {
    pub fn new(id: FilterId, refreshable: Refreshable) -> Self {
        Self {
            id,
            refreshable,
            list: ArcSwapOption::empty(),
        }
    }

    pub fn id(&self) -> &FilterId {
        &self.id
    }

    pub async fn refresh(&self, accept_stale: bool, cache: Option<FilterCache>) -> Result<usize> {
        let data = self.refreshable.refresh(accept_stale).await?;
        let options = CompileOptions {
            rewrites: true,
            ..Default::default()
        };
        let list = RuleList::from_bytes(&data, self.id.clone(), None, options, cache)?;
        let count = list.rules_count();
        self.list.store(Some(Arc::new(list)));
        Ok(count)
    }

    pub fn filter_request(&self, ctx: &RequestContext) -> Option<FilterResult> {
        match ctx.qtype() {
            RecordType::A | RecordType::AAAA | RecordType::HTTPS => (),
            _ => return None,
        }
        self.list.load_full()?.filter_request(ctx)
    }
}
