use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{DnsLookup, DnsResolvedFields, NaptrRecord, SrvRecord};
use crate::config::SipProtocol;
use crate::error::{ImsError, Result};

const SIP_SRV_PREFIX: &str = "_sip._";
const SIPS_SRV_PREFIX: &str = "_sips._";

/// Locates the IMS outbound proxy (RFC 3263 style).
///
/// Resolution order, first success wins:
/// 1. an IPv4 literal is returned as is, without any query
/// 2. NAPTR on the host; the first record (by order, then preference)
///    whose service matches the transport is followed through SRV, or
///    through an A query of the host when its replacement has no SRV
/// 3. without a matching NAPTR, SRV on `_sip._<proto>.<host>`
///    (`_sips._tcp.<host>` for TLS), then A on the host
/// 4. a final A query on the host before giving up
///
/// The configured port is used unless an SRV record supplies one.
#[derive(Clone)]
pub struct DnsResolver {
    lookup: Arc<dyn DnsLookup>,
}

impl DnsResolver {
    pub fn new(lookup: Arc<dyn DnsLookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve(
        &self,
        host: &str,
        protocol: SipProtocol,
        port: u16,
    ) -> Result<DnsResolvedFields> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            warn!("IP address found instead of FQDN: {}", host);
            return Ok(DnsResolvedFields::new(ip, port));
        }
        validate_domain(host)?;

        let resolved = match self.matching_naptr(host, protocol).await {
            Some(naptr) => {
                debug!(
                    "NAPTR {} {} {} -> {}",
                    naptr.order, naptr.preference, naptr.service, naptr.replacement
                );
                let records = self.srv_records(&naptr.replacement).await;
                match best_srv(&records) {
                    Some(srv) => self.address_of(&srv.target, srv.port).await,
                    None => self.address_of(host, port).await,
                }
            }
            None => {
                debug!("No NAPTR record found: use DNS SRV instead");
                let records = self.srv_records(&srv_query(host, protocol)).await;
                match best_srv(&records) {
                    Some(srv) => self.address_of(&srv.target, srv.port).await,
                    None => {
                        debug!("No SRV record found: use DNS A instead");
                        self.address_of(host, port).await
                    }
                }
            }
        };

        let fields = match resolved {
            Some(fields) => fields,
            None => self.last_resort(host, port).await?,
        };

        debug!("SIP outbound proxy configuration: {};{}", fields, protocol);
        Ok(fields)
    }

    async fn matching_naptr(&self, host: &str, protocol: SipProtocol) -> Option<NaptrRecord> {
        debug!("DNS NAPTR lookup for {}", host);
        let mut records = match self.lookup.naptr(host).await {
            Ok(records) => records,
            Err(e) => {
                warn!("NAPTR lookup for {} failed: {}", host, e);
                return None;
            }
        };
        if records.is_empty() {
            return None;
        }
        debug!("NAPTR records found: {}", records.len());

        records.sort_by_key(|r| (r.order, r.preference));
        let service = protocol.naptr_service();
        records
            .into_iter()
            .find(|r| r.service.eq_ignore_ascii_case(service))
    }

    async fn srv_records(&self, name: &str) -> Vec<SrvRecord> {
        debug!("DNS SRV lookup for {}", name);
        match self.lookup.srv(name).await {
            Ok(records) => records,
            Err(e) => {
                warn!("SRV lookup for {} failed: {}", name, e);
                Vec::new()
            }
        }
    }

    async fn address_of(&self, name: &str, port: u16) -> Option<DnsResolvedFields> {
        debug!("DNS A lookup for {}", name);
        match self.lookup.ipv4(name).await {
            Ok(addresses) => addresses
                .first()
                .map(|ip| DnsResolvedFields::new(*ip, port)),
            Err(e) => {
                warn!("A lookup for {} failed: {}", name, e);
                None
            }
        }
    }

    async fn last_resort(&self, host: &str, port: u16) -> Result<DnsResolvedFields> {
        debug!("Proxy still unresolved, retrying DNS A for {}", host);
        let addresses = self
            .lookup
            .ipv4(host)
            .await
            .map_err(|e| ImsError::resolution(host, e.to_string()))?;
        addresses
            .first()
            .map(|ip| DnsResolvedFields::new(*ip, port))
            .ok_or_else(|| ImsError::resolution(host, "proxy IP address not found"))
    }
}

fn srv_query(host: &str, protocol: SipProtocol) -> String {
    let lower = host.to_ascii_lowercase();
    if lower.starts_with(SIP_SRV_PREFIX) || lower.starts_with(SIPS_SRV_PREFIX) {
        return host.to_string();
    }
    match protocol {
        SipProtocol::Tls => format!("{}tcp.{}", SIPS_SRV_PREFIX, host),
        SipProtocol::Udp => format!("{}udp.{}", SIP_SRV_PREFIX, host),
        SipProtocol::Tcp => format!("{}tcp.{}", SIP_SRV_PREFIX, host),
    }
}

/// Lowest priority wins; among equal priorities the highest weight; the
/// earliest record wins a full tie
pub fn best_srv(records: &[SrvRecord]) -> Option<&SrvRecord> {
    let mut best: Option<&SrvRecord> = None;
    for record in records {
        best = match best {
            None => Some(record),
            Some(current) => {
                if record.priority < current.priority
                    || (record.priority == current.priority && record.weight > current.weight)
                {
                    Some(record)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

/// Reject names that can't be sent to a resolver (RFC 1035 lengths,
/// letters, digits, hyphens, and the underscores of SRV owner names)
pub fn validate_domain(host: &str) -> Result<()> {
    let name = host.strip_suffix('.').unwrap_or(host);
    if name.is_empty() || name.len() > 253 {
        return Err(ImsError::InvalidDomain(host.to_string()));
    }

    for label in name.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(ImsError::InvalidDomain(host.to_string()));
        }
    }
    Ok(())
}
