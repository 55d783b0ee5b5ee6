use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use super::{BlockedServiceId, CategoryId, FilterId};
use crate::errcoll::ErrorCollector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleListEntry {
    pub id: FilterId,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub id: BlockedServiceId,
    pub name: String,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEntry {
    pub id: CategoryId,
    pub url: Url,
}

#[derive(Deserialize)]
struct RuleListIndex {
    filters: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRuleList {
    filter_key: String,
    download_url: String,
}

#[derive(Deserialize)]
struct ServiceIndex {
    blocked_services: Vec<Value>,
}

#[derive(Deserialize)]
struct RawService {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rules: Vec<String>,
}

#[derive(Deserialize)]
struct CategoryIndex {
    filters: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCategory {
    download_url: String,
}

pub fn decode_rule_lists(data: &[u8], errors: &dyn ErrorCollector) -> Result<Vec<RuleListEntry>> {
    let index: RuleListIndex = serde_json::from_slice(data).context("decoding rule list index")?;
    let mut seen = HashSet::new();
    let entries = index
        .filters
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| {
            let entry = serde_json::from_value::<RawRuleList>(value)
                .map_err(anyhow::Error::from)
                .and_then(|raw| {
                    let id = FilterId::new(&raw.filter_key)?;
                    if id.is_reserved() {
                        bail!("filter id {} is reserved", id);
                    }
                    Ok(RuleListEntry {
                        id,
                        url: absolute_url(&raw.download_url)?,
                    })
                })
                .and_then(|entry| unique(&mut seen, entry.id.to_string(), entry));
            collect_invalid(entry, errors, "rule list", i)
        })
        .collect();
    Ok(entries)
}

pub fn decode_services(data: &[u8], errors: &dyn ErrorCollector) -> Result<Vec<ServiceEntry>> {
    let index: ServiceIndex =
        serde_json::from_slice(data).context("decoding blocked service index")?;
    let mut seen = HashSet::new();
    let entries = index
        .blocked_services
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| {
            let entry = serde_json::from_value::<RawService>(value)
                .map_err(anyhow::Error::from)
                .and_then(|raw| {
                    if raw.rules.is_empty() {
                        bail!("service {} has no rules", raw.id);
                    }
                    Ok(ServiceEntry {
                        id: BlockedServiceId::new(&raw.id)?,
                        name: raw.name,
                        rules: raw.rules,
                    })
                })
                .and_then(|entry| unique(&mut seen, entry.id.to_string(), entry));
            collect_invalid(entry, errors, "blocked service", i)
        })
        .collect();
    Ok(entries)
}

pub fn decode_categories(data: &[u8], errors: &dyn ErrorCollector) -> Result<Vec<CategoryEntry>> {
    let index: CategoryIndex = serde_json::from_slice(data).context("decoding category index")?;
    let entries = index
        .filters
        .into_iter()
        .enumerate()
        .filter_map(|(i, (key, value))| {
            let entry = serde_json::from_value::<RawCategory>(value)
                .map_err(anyhow::Error::from)
                .and_then(|raw| {
                    Ok(CategoryEntry {
                        id: CategoryId::new(&key)?,
                        url: absolute_url(&raw.download_url)?,
                    })
                });
            collect_invalid(entry, errors, "category", i)
        })
        .collect();
    Ok(entries)
}

fn absolute_url(s: &str) -> Result<Url> {
    let url = Url::parse(s).with_context(|| format!("bad url {:?}", s))?;
    if url.cannot_be_a_base() {
        bail!("url {:?} is not absolute", s);
    }
    Ok(url)
}

fn unique<T>(seen: &mut HashSet<String>, id: String, entry: T) -> Result<T> {
    if seen.contains(&id) {
        return Err(anyhow!("duplicate id {}", id));
    }
    seen.insert(id);
    Ok(entry)
}

fn collect_invalid<T>(
    entry: Result<T>,
    errors: &dyn ErrorCollector,
    kind: &str,
    idx: usize,
) -> Option<T> {
    match entry {
        Ok(entry) => Some(entry),
        Err(err) => {
            errors.collect(err.context(format!("{} index entry {}", kind, idx)));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{decode_categories, decode_rule_lists, decode_services};
    use crate::errcoll::testing::RecordingCollector;

    #[test]
    fn should_skip_invalid_rule_lists() {
        let errors = RecordingCollector::default();
        let index = br#"{"filters": [
            {"filterKey": "adguard_dns_filter", "downloadUrl": "https://filters.example/1.txt"},
            {"filterKey": "bad/key", "downloadUrl": "https://filters.example/2.txt"},
            {"filterKey": "relative", "downloadUrl": "/3.txt"},
            {"downloadUrl": "https://filters.example/4.txt"},
            {"filterKey": "adguard_dns_filter", "downloadUrl": "https://filters.example/5.txt"},
            {"filterKey": "custom", "downloadUrl": "https://filters.example/6.txt"}
        ]}"#;

        let entries = decode_rule_lists(index, &errors).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id.as_str(), "adguard_dns_filter");
        assert_eq!(errors.messages().len(), 5);
        assert!(errors.messages()[0].starts_with("rule list index entry 1"));
        assert!(errors.messages()[4].contains("reserved"));
    }

    #[test]
    fn should_fail_on_broken_index() {
        let errors = RecordingCollector::default();

        assert!(decode_rule_lists(b"[]", &errors).is_err());
        assert!(decode_services(b"{", &errors).is_err());
    }

    #[test]
    fn should_decode_services() {
        let errors = RecordingCollector::default();
        let index = br#"{"blocked_services": [
            {"id": "youtube", "name": "YouTube", "rules": ["||youtube.com^", "||ytimg.com^"]},
            {"id": "empty", "name": "Empty", "rules": []},
            {"id": "", "rules": ["||x.example^"]},
            {"id": "youtube", "name": "YouTube again", "rules": ["||x.example^"]}
        ]}"#;

        let services = decode_services(index, &errors).unwrap();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "YouTube");
        assert_eq!(services[0].rules.len(), 2);
        assert_eq!(errors.messages().len(), 3);
        assert!(errors.messages()[2].contains("duplicate id youtube"));
    }

    #[test]
    fn should_decode_categories() {
        let errors = RecordingCollector::default();
        let index = br#"{"filters": {
            "gambling": {"downloadUrl": "https://filters.example/gambling.txt"},
            "bad": {"url": "https://filters.example/bad.txt"}
        }}"#;

        let categories = decode_categories(index, &errors).unwrap();

        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].id.as_str(), "gambling");
        assert_eq!(errors.messages().len(), 1);
    }
}
