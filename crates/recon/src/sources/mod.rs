pub mod alienvault;
pub mod crtsh;
pub mod hackertarget;
pub mod rapiddns;
pub mod threatcrowd;
pub mod wayback;

use crate::config::ScanOptions;
use crate::domain::scoped_hostname;
use crate::model::{Method, SourceId};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use self::alienvault::AlienVault;
use self::crtsh::CrtSh;
use self::hackertarget::HackerTarget;
use self::rapiddns::RapidDns;
use self::threatcrowd::ThreatCrowd;
use self::wayback::Wayback;

// region:        --- Constants

const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 2000;
const MAX_RATE_LIMIT_BACKOFF_MS: u64 = 10_000;

// endregion:     --- Constants

pub trait Module {
    fn name(&self) -> String;
    fn description(&self) -> String;
}

/// A third-party API queried for subdomains it has already observed.
#[async_trait]
pub trait PassiveSource: Module + Send + Sync {
    fn id(&self) -> SourceId;

    /// Hostnames known to the source, all of them subdomains of `domain`.
    ///
    /// Fails with `SourceUnavailable` only when the HTTP exchange itself fails,
    /// an unparseable body is an empty set.
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>>;
}

// region:        --- Registry

/// Maps every [`SourceId`] to the client querying it.
#[derive(Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, Arc<dyn PassiveSource>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::empty()
            .with_source(Arc::new(CrtSh::new()))
            .with_source(Arc::new(AlienVault::new()))
            .with_source(Arc::new(ThreatCrowd::new()))
            .with_source(Arc::new(Wayback::new()))
            .with_source(Arc::new(HackerTarget::new()))
            .with_source(Arc::new(RapidDns::new()))
    }
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Registers `source` under its id, replacing any previous client.
    pub fn with_source(mut self, source: Arc<dyn PassiveSource>) -> Self {
        self.sources.insert(source.id(), source);
        self
    }

    /// Sources serving the selected passive methods and allowed by `options`.
    pub fn select(
        &self,
        methods: &BTreeSet<Method>,
        options: &ScanOptions,
    ) -> Vec<Arc<dyn PassiveSource>> {
        self.sources
            .iter()
            .filter(|(id, _)| methods.contains(&id.method()) && options.allows(**id))
            .map(|(_, source)| source.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PassiveSource>> {
        self.sources.values()
    }
}

pub fn display_all() {
    let registry = SourceRegistry::default();
    println!("\nPassive sources");
    for source in registry.iter() {
        println!(
            "- {:22}{:28}{}",
            source.name(),
            source.id().method().as_str(),
            source.description()
        );
    }
}

// endregion:     --- Registry

// region:        --- HTTP requests

/// GET with a single backoff retry on HTTP 429, anything but a success status
/// makes the source unavailable.
#[instrument(name = "HTTP_request", level = "info", skip_all, fields(url = url))]
pub async fn http_request(http_client: &Client, source: SourceId, url: &str) -> Result<Response> {
    let mut retried = false;
    loop {
        info!("Sending request");
        let res = match http_client.get(url).send().await {
            Ok(res) => res,
            Err(err) => {
                error!("Reason: {}", err);
                return Err(Error::source_unavailable(source, err));
            }
        };
        info!("Receive with status: {}", res.status());
        debug!("Response: {:?}", res);

        if res.status() == StatusCode::TOO_MANY_REQUESTS && !retried {
            let backoff = retry_after(&res);
            warn!("Rate limited, retrying in {:?}", backoff);
            sleep(backoff).await;
            retried = true;
            continue;
        }

        if !res.status().is_success() {
            return Err(Error::source_unavailable(
                source,
                format!("HTTP status {}", res.status()),
            ));
        }

        return Ok(res);
    }
}

/// Reads the whole body, a failed read is a transport failure.
pub async fn read_body(res: Response, source: SourceId) -> Result<String> {
    res.text()
        .await
        .map_err(|err| Error::source_unavailable(source, err))
}

fn retry_after(res: &Response) -> Duration {
    let millis = res
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF_MS);

    Duration::from_millis(millis.min(MAX_RATE_LIMIT_BACKOFF_MS))
}

// endregion:     --- HTTP requests

/// Keeps the in-scope hostnames of `candidates`, normalized.
pub fn collect_scoped<I, S>(candidates: I, domain: &str) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .filter_map(|candidate| scoped_hostname(candidate.as_ref(), domain))
        .collect()
}
