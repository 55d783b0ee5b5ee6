use std::net::IpAddr;

use anyhow::{Context, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            IpFamily::V4 => ip.is_ipv4(),
            IpFamily::V6 => ip.is_ipv6(),
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_ip(&self, host: &str, family: IpFamily) -> Result<Vec<IpAddr>>;
}

pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str, family: IpFamily) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("resolving {}", host))?;
        let mut ips = addrs
            .map(|addr| addr.ip())
            .filter(|ip| family.matches(ip))
            .collect::<Vec<_>>();
        ips.dedup();
        Ok(ips)
    }
}


#[cfg(test)]
mod tests {
    use super::{IpFamily, Resolver, SystemResolver};

    #[tokio::test]
    async fn should_resolve_localhost_literal() -> anyhow::Result<()> {
        let ips = SystemResolver.lookup_ip("127.0.0.1", IpFamily::V4).await?;

        assert_eq!(ips, vec!["127.0.0.1".parse::<std::net::IpAddr>()?]);
        assert!(SystemResolver
            .lookup_ip("127.0.0.1", IpFamily::V6)
            .await?
            .is_empty());
        Ok(())
    }
}
