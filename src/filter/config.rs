use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{schedule::Schedule, BlockedServiceId, CategoryId, FilterId, RuleText};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    #[serde(skip)]
    pub custom: Option<CustomConfig>,
    pub rule_lists: RuleListsConfig,
    pub parental: ParentalConfig,
    pub safe_browsing: SafeBrowsingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomConfig {
    pub profile_id: String,
    pub updated_at: DateTime<Utc>,
    pub rules: Vec<RuleText>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleListsConfig {
    pub enabled: bool,
    pub ids: Vec<FilterId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentalConfig {
    pub enabled: bool,
    pub pause_schedule: Option<Schedule>,
    pub adult_blocking: bool,
    pub safe_search_general: bool,
    pub safe_search_youtube: bool,
    pub blocked_services: Vec<BlockedServiceId>,
    pub categories: Vec<CategoryId>,
}

impl ParentalConfig {
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.pause_schedule
            .as_ref()
            .map_or(false, |schedule| schedule.contains(now))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeBrowsingConfig {
    pub enabled: bool,
    pub dangerous_domains: bool,
    pub newly_registered: bool,
}
