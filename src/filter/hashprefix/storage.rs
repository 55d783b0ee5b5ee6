use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};

use crate::dns::normalize_host;

pub const PREFIX_LEN: usize = 2;
pub const SUFFIX_LEN: usize = 30;

pub type Prefix = [u8; PREFIX_LEN];
type Suffix = [u8; SUFFIX_LEN];

#[derive(Default)]
pub struct HashStorage {
    table: ArcSwap<HashMap<Prefix, Vec<Suffix>>>,
}

impl HashStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self, data: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(data).context("hash prefix list is not utf-8")?;
        let mut table = HashMap::<Prefix, Vec<Suffix>>::new();
        let mut count = 0;
        let domains = text
            .lines()
            .map(str::trim)
            .filter(|x| !x.is_empty() && !x.starts_with('#'));
        for domain in domains {
            let (prefix, suffix) = split_hash(&normalize_host(domain));
            let bucket = table.entry(prefix).or_default();
            if !bucket.contains(&suffix) {
                bucket.push(suffix);
                count += 1;
            }
        }
        self.table.store(Arc::new(table));
        Ok(count)
    }

    pub fn matches(&self, host: &str) -> bool {
        let (prefix, suffix) = split_hash(host);
        self.table
            .load()
            .get(&prefix)
            .map_or(false, |bucket| bucket.contains(&suffix))
    }

    pub fn hashes(&self, prefixes: &[Prefix]) -> Vec<String> {
        let table = self.table.load();
        prefixes
            .iter()
            .flat_map(|prefix| {
                table.get(prefix).into_iter().flatten().map(move |suffix| {
                    let mut full = Vec::with_capacity(PREFIX_LEN + SUFFIX_LEN);
                    full.extend_from_slice(prefix);
                    full.extend_from_slice(suffix);
                    hex::encode(full)
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.load().values().map(Vec::len).sum()
    }
}

fn split_hash(host: &str) -> (Prefix, Suffix) {
    let hash = Sha256::digest(host.as_bytes());
    let mut prefix = [0; PREFIX_LEN];
    let mut suffix = [0; SUFFIX_LEN];
    prefix.copy_from_slice(&hash[..PREFIX_LEN]);
    suffix.copy_from_slice(&hash[PREFIX_LEN..]);
    (prefix, suffix)
}
