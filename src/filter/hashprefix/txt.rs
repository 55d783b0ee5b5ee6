use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use log::debug;

use super::storage::{HashStorage, Prefix};
use crate::{
    dns::{RecordData, RecordType, Response},
    filter::{FilterId, FilterResult, RequestContext, RuleText},
};

pub const TXT_TTL: u32 = 60;

struct TxtTable {
    suffix: String,
    id: FilterId,
    storage: Arc<HashStorage>,
}

#[derive(Default)]
pub struct TxtMatcher {
    tables: Vec<TxtTable>,
}

impl TxtMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, suffix: &str, id: FilterId, storage: Arc<HashStorage>) {
        self.tables.push(TxtTable {
            suffix: suffix.trim_matches('.').to_ascii_lowercase(),
            id,
            storage,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn match_request(&self, ctx: &RequestContext) -> Result<Option<FilterResult>> {
        if ctx.qtype() != RecordType::TXT {
            return Ok(None);
        }
        let host = ctx.host();
        for table in &self.tables {
            let prefixes = match host
                .strip_suffix(table.suffix.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
            {
                Some(prefixes) => prefixes,
                None => continue,
            };
            let hashes = table.storage.hashes(&parse_prefixes(prefixes)?);
            let response = Response::with_answers(&ctx.request, TXT_TTL, [RecordData::Txt(hashes)]);
            return Ok(Some(FilterResult::ModifiedResponse {
                response,
                list: table.id.clone(),
                rule: RuleText::new(&table.suffix)?,
            }));
        }
        Ok(None)
    }
}

fn parse_prefixes(labels: &str) -> Result<Vec<Prefix>> {
    labels
        .split('.')
        .map(|label| {
            let hex_prefix = match label.len() {
                4 => label,
                // Deprecated: older clients send 8 hex characters.
                8 => {
                    debug!("truncating legacy hash prefix {}", label);
                    label
                        .get(..4)
                        .ok_or_else(|| anyhow!("bad hash prefix {:?}", label))?
                }
                len => bail!("bad hash prefix length {} in {:?}", len, label),
            };
            let bytes = hex::decode(hex_prefix)
                .map_err(|err| anyhow!("bad hash prefix {:?}: {}", label, err))?;
            Ok([bytes[0], bytes[1]])
        })
        .collect()
}
