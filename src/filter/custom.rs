use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use super::{
    config::CustomConfig,
    rulelist::{CompileOptions, RuleList},
    FilterId,
};
use crate::cache::{ClearableCache, ResultCache};

struct Compiled {
    updated_at: DateTime<Utc>,
    list: Arc<RuleList>,
}

pub struct CustomFilters {
    cache: Arc<ResultCache<String, Arc<Compiled>>>,
}

impl CustomFilters {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Arc::new(ResultCache::new(capacity, None)),
        }
    }

    pub fn cache(&self) -> Arc<dyn ClearableCache> {
        self.cache.clone()
    }

    pub fn get(&self, config: &CustomConfig) -> Arc<RuleList> {
        if let Some(compiled) = self.cache.get(config.profile_id.as_str()) {
            if compiled.updated_at == config.updated_at {
                return compiled.list.clone();
            }
        }
        let text = config
            .rules
            .iter()
            .map(|rule| rule.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let options = CompileOptions {
            rewrites: true,
            client_rules: true,
        };
        let list = Arc::new(RuleList::new(
            &text,
            FilterId::reserved(FilterId::CUSTOM),
            None,
            options,
            None,
        ));
        debug!("compiled custom rules of profile {}", config.profile_id);
        self.cache.insert(
            config.profile_id.clone(),
            Arc::new(Compiled {
                updated_at: config.updated_at,
                list: list.clone(),
            }),
        );
        list
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::CustomFilters;
    use crate::filter::{config::CustomConfig, RuleText};

    #[test]
    fn should_reuse_until_updated() {
        let filters = CustomFilters::new(10);
        let mut config = CustomConfig {
            profile_id: "prof1".to_owned(),
            updated_at: Utc::now(),
            rules: vec![RuleText::new("||custom.example^").unwrap()],
        };

        let first = filters.get(&config);
        assert!(Arc::ptr_eq(&first, &filters.get(&config)));

        config.updated_at = config.updated_at + Duration::seconds(1);
        config.rules.push(RuleText::new("||other.example^").unwrap());
        let updated = filters.get(&config);
        assert!(!Arc::ptr_eq(&first, &updated));
        assert_eq!(updated.rules_count(), 2);
    }
}
