use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use super::{DnsLookup, NaptrRecord, SrvRecord};
use crate::config::ImsSettings;
use crate::error::{ImsError, Result};

/// [`DnsLookup`] backed by the system resolver configuration
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    /// Read `/etc/resolv.conf` (or the platform equivalent), falling back
    /// to public resolvers when it can't be read. Negative answers are
    /// cached for at most `negative_ttl`.
    pub fn from_system_conf(negative_ttl: Duration) -> Self {
        let (config, opts) = system_conf(negative_ttl);
        Self::new(config, opts)
    }

    /// System resolver with the negative cache TTL of `settings`
    pub fn from_settings(settings: &ImsSettings) -> Self {
        Self::from_system_conf(settings.dns_negative_cache_ttl())
    }

    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

fn system_conf(negative_ttl: Duration) -> (ResolverConfig, ResolverOpts) {
    let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
        Ok(conf) => conf,
        Err(e) => {
            warn!("Can't read system DNS configuration, using defaults: {}", e);
            (ResolverConfig::default(), ResolverOpts::default())
        }
    };
    opts.negative_max_ttl = Some(negative_ttl);
    (config, opts)
}

/// `Ok` when the name simply has no records of the asked type
fn no_records(name: &str, err: ResolveError) -> Result<()> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => {
            debug!("No records for {}", name);
            Ok(())
        }
        _ => Err(ImsError::resolution(name, err.to_string())),
    }
}

fn trim_root(name: String) -> String {
    match name.strip_suffix('.') {
        Some(trimmed) => trimmed.to_string(),
        None => name,
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn naptr(&self, name: &str) -> Result<Vec<NaptrRecord>> {
        let lookup = match self.resolver.lookup(name, RecordType::NAPTR).await {
            Ok(lookup) => lookup,
            Err(e) => return no_records(name, e).map(|_| Vec::new()),
        };

        Ok(lookup
            .iter()
            .filter_map(|rdata| match rdata {
                RData::NAPTR(naptr) => Some(NaptrRecord {
                    order: naptr.order(),
                    preference: naptr.preference(),
                    flags: String::from_utf8_lossy(naptr.flags()).into_owned(),
                    service: String::from_utf8_lossy(naptr.services()).into_owned(),
                    replacement: trim_root(naptr.replacement().to_utf8()),
                }),
                _ => None,
            })
            .collect())
    }

    async fn srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        let lookup = match self.resolver.srv_lookup(name).await {
            Ok(lookup) => lookup,
            Err(e) => return no_records(name, e).map(|_| Vec::new()),
        };

        Ok(lookup
            .iter()
            .map(|srv| SrvRecord {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: trim_root(srv.target().to_utf8()),
            })
            .collect())
    }

    async fn ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        let lookup = match self.resolver.ipv4_lookup(name).await {
            Ok(lookup) => lookup,
            Err(e) => return no_records(name, e).map(|_| Vec::new()),
        };

        Ok(lookup.iter().map(|a| a.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_root() {
        assert_eq!(trim_root("pcscf.example.com.".into()), "pcscf.example.com");
        assert_eq!(trim_root("pcscf.example.com".into()), "pcscf.example.com");
    }

    #[test]
    fn test_negative_ttl_applied() {
        let (_, opts) = system_conf(Duration::from_secs(7));
        assert_eq!(opts.negative_max_ttl, Some(Duration::from_secs(7)));

        let settings = ImsSettings::default();
        let (_, opts) = system_conf(settings.dns_negative_cache_ttl());
        assert_eq!(opts.negative_max_ttl, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_from_settings() {
        let mut settings = ImsSettings::default();
        settings.dns_negative_cache_ttl_secs = 9;
        let _lookup = HickoryLookup::from_settings(&settings);
    }
}
