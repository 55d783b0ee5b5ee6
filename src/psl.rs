use anyhow::{anyhow, Result};
use publicsuffix::{List, Psl, Type};

const FALLBACK_LIST: &str = "// ===BEGIN ICANN DOMAINS===
com
net
org
edu
gov
info
io
ru
de
uk
co.uk
org.uk
jp
co.jp
// ===END ICANN DOMAINS===
";

pub struct PublicSuffixes {
    list: Option<List>,
}

impl PublicSuffixes {
    pub fn parse(text: &str) -> Result<Self> {
        let list = text
            .parse::<List>()
            .map_err(|err| anyhow!("parsing public suffix list: {}", err))?;
        Ok(Self { list: Some(list) })
    }

    pub fn fallback() -> Self {
        Self::parse(FALLBACK_LIST).unwrap_or(Self { list: None })
    }

    pub fn icann_suffix<'a>(&self, host: &'a str) -> Option<&'a str> {
        let suffix = self.list.as_ref()?.suffix(host.as_bytes())?;
        if suffix.typ() != Some(Type::Icann) {
            return None;
        }
        host.get(host.len() - suffix.as_bytes().len()..)
    }
}
