use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use arc_swap::ArcSwap;
use log::debug;

use super::{
    index::decode_services,
    rulelist::{CompileOptions, RuleList},
    BlockedServiceId, FilterId,
};
use crate::{errcoll::ErrorCollector, refreshable::Refreshable};

pub struct ServiceFilter {
    refreshable: Refreshable,
    services: ArcSwap<HashMap<BlockedServiceId, Arc<RuleList>>>,
}

impl ServiceFilter {
    pub fn new(refreshable: Refreshable) -> Self {
        Self {
            refreshable,
            services: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub async fn refresh(&self, accept_stale: bool, errors: &dyn ErrorCollector) -> Result<usize> {
        let data = self.refreshable.refresh(accept_stale).await?;
        let entries = decode_services(&data, errors)?;
        let services = entries
            .into_iter()
            .map(|entry| {
                let list = RuleList::new(
                    &entry.rules.join("\n"),
                    FilterId::reserved(FilterId::BLOCKED_SERVICE),
                    Some(entry.id.as_str().to_owned()),
                    CompileOptions::default(),
                    None,
                );
                (entry.id, Arc::new(list))
            })
            .collect::<HashMap<_, _>>();
        let count = services.len();
        self.services.store(Arc::new(services));
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.services.load().len()
    }

    pub fn lists(&self, ids: &[BlockedServiceId]) -> Vec<Arc<RuleList>> {
        let services = self.services.load();
        ids.iter()
            .filter_map(|id| {
                let list = services.get(id).cloned();
                if list.is_none() {
                    debug!("unknown blocked service {}", id);
                }
                list
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use pretty_assertions::assert_eq;

    use super::ServiceFilter;
    use crate::{
        dns::{RecordType, Request},
        errcoll::testing::RecordingCollector,
        filter::{BlockedServiceId, FilterId, FilterResult, RequestContext},
        refreshable::{Refreshable, RefreshableConfig},
    };

    #[tokio::test]
    async fn should_block_enabled_services() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let index_path = dir.path().join("services.json");
        std::fs::File::create(&index_path)?.write_all(
            br#"{"blocked_services": [
                {"id": "youtube", "name": "YouTube", "rules": ["||youtube.com^"]},
                {"id": "tiktok", "name": "TikTok", "rules": ["||tiktok.com^"]}
            ]}"#,
        )?;
        let filter = ServiceFilter::new(Refreshable::new(RefreshableConfig {
            id: "blocked_services".to_owned(),
            url: reqwest::Url::from_file_path(&index_path).unwrap(),
            cache_path: dir.path().join("cache.json"),
            staleness: Duration::from_secs(60),
            timeout: Duration::from_secs(1),
            max_size: 1 << 20,
        })?);
        let errors = RecordingCollector::default();

        assert_eq!(filter.refresh(false, &errors).await?, 2);

        let lists = filter.lists(&[
            BlockedServiceId::new("youtube")?,
            BlockedServiceId::new("unknown")?,
        ]);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].scope(), Some("youtube"));
        let ctx = RequestContext::new(Request::new(1, "www.youtube.com", RecordType::A));
        match lists[0].filter_request(&ctx) {
            Some(FilterResult::Blocked { list, .. }) => {
                assert_eq!(list.as_str(), FilterId::BLOCKED_SERVICE)
            }
            other => panic!("unexpected result {:?}", other),
        }
        Ok(())
    }
}
