use std::{net::IpAddr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::{
    config::{CustomConfig, FilterConfig},
    id::string_id,
    RuleText,
};

string_id!(ProfileId, "profile id");
string_id!(DeviceId, "device id");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub custom_rules: Vec<RuleText>,
    #[serde(default)]
    pub device_ids: Vec<DeviceId>,
    #[serde(with = "humantime_serde")]
    pub filtered_response_ttl: Duration,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl Profile {
    pub fn filter_config(&self) -> FilterConfig {
        let custom = (!self.custom_rules.is_empty()).then(|| CustomConfig {
            profile_id: self.id.to_string(),
            updated_at: self.updated_at,
            rules: self.custom_rules.clone(),
        });
        FilterConfig {
            custom,
            ..self.filter.clone()
        }
    }

    pub fn has_device(&self, id: &DeviceId) -> bool {
        self.device_ids.contains(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub profile_id: ProfileId,
    #[serde(default)]
    pub linked_ip: Option<IpAddr>,
    #[serde(default)]
    pub dedicated_ips: Vec<IpAddr>,
}
