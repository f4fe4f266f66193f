use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::{RData, Record, RecordType};
use hickory_resolver::TokioAsyncResolver;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub ip_addresses: BTreeSet<IpAddr>,
    pub cname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    Timeout,
    NxDomain,
    ServFail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub hostname: String,
    pub kind: ResolutionErrorKind,
}

impl ResolutionError {
    pub fn new(hostname: &str, kind: ResolutionErrorKind) -> Self {
        Self {
            hostname: hostname.to_string(),
            kind,
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} did not resolve ({:?})", self.hostname, self.kind)
    }
}

impl std::error::Error for ResolutionError {}

/// Name resolution used by brute-forcing and enrichment.
///
/// Implementations must bound every lookup by a timeout and must not retry,
/// retry policy belongs to the caller.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Address lookup, a name without addresses does not resolve.
    async fn resolve(&self, hostname: &str) -> Result<Resolution, ResolutionError>;

    /// Like [`Resolver::resolve`], but a name without addresses still answers
    /// with its CNAME when it has one (dangling CNAME).
    async fn resolve_with_dangling(&self, hostname: &str) -> Result<Resolution, ResolutionError> {
        self.resolve(hostname).await
    }
}

// region:        --- System resolver

pub struct DnsResolver {
    inner: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsResolver {
    /// Builds a resolver on the given nameservers, or on the default
    /// configuration when `nameservers` is empty.
    pub fn new(lookup_timeout: Duration, nameservers: &[IpAddr]) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = lookup_timeout;
        opts.attempts = 1;
        debug!("DNS resolver options: {:?}", opts);

        let config = if nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            ResolverConfig::from_parts(
                None,
                vec![],
                NameServerConfigGroup::from_ips_clear(nameservers, 53, true),
            )
        };
        let inner = TokioAsyncResolver::tokio(config, opts);
        debug!("DNS resolver created: {:?}", inner);

        Self {
            inner,
            timeout: lookup_timeout,
        }
    }

    pub fn shared(lookup_timeout: Duration, nameservers: &[IpAddr]) -> Arc<dyn Resolver> {
        Arc::new(Self::new(lookup_timeout, nameservers))
    }

    async fn lookup_cname(&self, hostname: &str) -> Result<Option<String>, ResolutionError> {
        let lookup = timeout(self.timeout, self.inner.lookup(hostname, RecordType::CNAME))
            .await
            .map_err(|_| ResolutionError::new(hostname, ResolutionErrorKind::Timeout))?
            .map_err(|err| classify(hostname, &err))?;

        Ok(first_cname(lookup.record_iter()))
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, hostname: &str) -> Result<Resolution, ResolutionError> {
        let lookup = timeout(self.timeout, self.inner.lookup_ip(hostname))
            .await
            .map_err(|_| ResolutionError::new(hostname, ResolutionErrorKind::Timeout))?;

        match lookup {
            Ok(lookup_ip) => {
                trace!("{:?}", lookup_ip);
                Ok(Resolution {
                    ip_addresses: lookup_ip.iter().collect(),
                    cname: first_cname(lookup_ip.as_lookup().record_iter()),
                })
            }
            Err(err) => {
                trace!("{:?}", err);
                Err(classify(hostname, &err))
            }
        }
    }

    async fn resolve_with_dangling(&self, hostname: &str) -> Result<Resolution, ResolutionError> {
        match self.resolve(hostname).await {
            Err(err) if err.kind == ResolutionErrorKind::NxDomain => {
                match self.lookup_cname(hostname).await {
                    Ok(Some(cname)) => Ok(Resolution {
                        ip_addresses: BTreeSet::new(),
                        cname: Some(cname),
                    }),
                    _ => Err(err),
                }
            }
            resolved => resolved,
        }
    }
}

fn classify(hostname: &str, err: &ResolveError) -> ResolutionError {
    let kind = match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => ResolutionErrorKind::NxDomain,
        ResolveErrorKind::Timeout => ResolutionErrorKind::Timeout,
        _ => ResolutionErrorKind::ServFail,
    };
    ResolutionError::new(hostname, kind)
}

fn first_cname<'a>(mut records: impl Iterator<Item = &'a Record>) -> Option<String> {
    records.find_map(|record| match record.data() {
        Some(RData::CNAME(cname)) => Some(normalize_name(&cname.0.to_string())),
        _ => None,
    })
}

fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

// endregion:     --- System resolver

// region:        --- Static resolver

/// In-memory resolver answering from a fixed table, unknown names are
/// `NxDomain`. A name with only a CNAME is dangling: it answers through
/// [`Resolver::resolve_with_dangling`] alone.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    records: HashMap<String, Resolution>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, hostname: &str, ip: IpAddr) -> Self {
        self.records
            .entry(normalize_name(hostname))
            .or_default()
            .ip_addresses
            .insert(ip);
        self
    }

    pub fn with_cname(mut self, hostname: &str, cname: &str) -> Self {
        self.records.entry(normalize_name(hostname)).or_default().cname =
            Some(normalize_name(cname));
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> Result<Resolution, ResolutionError> {
        self.records
            .get(&normalize_name(hostname))
            .filter(|resolution| !resolution.ip_addresses.is_empty())
            .cloned()
            .ok_or_else(|| ResolutionError::new(hostname, ResolutionErrorKind::NxDomain))
    }

    async fn resolve_with_dangling(&self, hostname: &str) -> Result<Resolution, ResolutionError> {
        self.records
            .get(&normalize_name(hostname))
            .cloned()
            .ok_or_else(|| ResolutionError::new(hostname, ResolutionErrorKind::NxDomain))
    }
}

// endregion:     --- Static resolver

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_answers_known_names() {
        let resolver = StaticResolver::new()
            .with_host("WWW.example.com", "93.184.216.34".parse().unwrap());

        let www = resolver.resolve("www.example.com").await.unwrap();
        assert_eq!(www.ip_addresses.len(), 1);
        assert_eq!(www.cname, None);

        let err = resolver.resolve("nope.example.com").await.unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::NxDomain);
    }

    #[tokio::test]
    async fn dangling_cname_needs_the_deeper_lookup() {
        let resolver = StaticResolver::new()
            .with_cname("shop.example.com.", "Shops.MyShopify.com.")
            .with_host("docs.example.com", "192.0.2.40".parse().unwrap())
            .with_cname("docs.example.com", "example.github.io");

        let err = resolver.resolve("shop.example.com").await.unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::NxDomain);

        let shop = resolver.resolve_with_dangling("shop.example.com").await.unwrap();
        assert!(shop.ip_addresses.is_empty());
        assert_eq!(shop.cname.as_deref(), Some("shops.myshopify.com"));

        let docs = resolver.resolve("docs.example.com").await.unwrap();
        assert_eq!(docs.cname.as_deref(), Some("example.github.io"));
        assert_eq!(resolver.resolve_with_dangling("docs.example.com").await.unwrap(), docs);
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("Foo.GitHub.io."), "foo.github.io");
    }
}
