use crate::model::SourceId;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

// region:        --- Constants

// concurrency numbers
pub const DEFAULT_THREADS: usize = 50;
pub const MIN_THREADS: usize = 1;
pub const MAX_THREADS: usize = 500;

// timeouts (seconds)
pub const DEFAULT_DNS_TIMEOUT_S: u64 = 3;
pub const MIN_DNS_TIMEOUT_S: u64 = 1;
pub const MAX_DNS_TIMEOUT_S: u64 = 30;

pub const DEFAULT_HTTP_TIMEOUT_S: u64 = 10;
pub const MIN_HTTP_TIMEOUT_S: u64 = 1;
pub const MAX_HTTP_TIMEOUT_S: u64 = 120;

pub const DEFAULT_EXTERNAL_RESOLVER: &str = "dnsx";

// endregion:     --- Constants

/// Options of one enumeration job.
///
/// Unknown keys are ignored when deserializing and numeric values out of
/// range are clamped by [`ScanOptions::clamped`] instead of being rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Worker pool size for DNS resolution.
    pub threads: usize,
    /// Per lookup timeout, in seconds.
    pub dns_timeout: u64,
    /// Per request timeout, in seconds.
    pub http_timeout: u64,
    /// Restricts passive enumeration to these sources, all sources when empty.
    pub sources: Vec<SourceId>,
    pub enable_fingerprint: bool,
    pub enable_takeover: bool,
    /// Wordlist for `dns_bruteforce`, the built-in list when absent.
    pub wordlist: Option<PathBuf>,
    /// Nameservers queried by the resolver, system configuration when empty.
    pub nameservers: Vec<IpAddr>,
    /// Allows the external fast resolver when it is installed.
    pub external_resolver: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            dns_timeout: DEFAULT_DNS_TIMEOUT_S,
            http_timeout: DEFAULT_HTTP_TIMEOUT_S,
            sources: Vec::new(),
            enable_fingerprint: false,
            enable_takeover: false,
            wordlist: None,
            nameservers: Vec::new(),
            external_resolver: true,
        }
    }
}

impl ScanOptions {
    pub fn clamped(mut self) -> Self {
        self.threads = self.threads.clamp(MIN_THREADS, MAX_THREADS);
        self.dns_timeout = self.dns_timeout.clamp(MIN_DNS_TIMEOUT_S, MAX_DNS_TIMEOUT_S);
        self.http_timeout = self
            .http_timeout
            .clamp(MIN_HTTP_TIMEOUT_S, MAX_HTTP_TIMEOUT_S);
        self.sources.sort();
        self.sources.dedup();
        self
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    /// Whether `source` may run under these options.
    pub fn allows(&self, source: SourceId) -> bool {
        self.sources.is_empty() || self.sources.contains(&source)
    }
}
