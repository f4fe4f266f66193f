use crate::config::ScanOptions;
use crate::dns::Resolution;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::to_string_pretty;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

// region:        --- Identifiers

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::InvalidRequest(format!("invalid job id: {:?}", s)))
    }
}

/// Enumeration method a job can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    DnsBruteforce,
    CertificateTransparency,
    ThreatIntelligence,
    WebArchive,
    DnsAggregators,
}

impl Method {
    pub fn all() -> [Method; 5] {
        [
            Method::DnsBruteforce,
            Method::CertificateTransparency,
            Method::ThreatIntelligence,
            Method::WebArchive,
            Method::DnsAggregators,
        ]
    }

    pub fn passive() -> [Method; 4] {
        [
            Method::CertificateTransparency,
            Method::ThreatIntelligence,
            Method::WebArchive,
            Method::DnsAggregators,
        ]
    }

    pub fn is_passive(&self) -> bool {
        !matches!(self, Method::DnsBruteforce)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::DnsBruteforce => "dns_bruteforce",
            Method::CertificateTransparency => "certificate_transparency",
            Method::ThreatIntelligence => "threat_intelligence",
            Method::WebArchive => "web_archive",
            Method::DnsAggregators => "dns_aggregators",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        Method::all()
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown method: {:?}", s)))
    }
}

/// Passive data source, each one belongs to a single passive [`Method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    CrtSh,
    AlienVault,
    ThreatCrowd,
    Wayback,
    HackerTarget,
    RapidDns,
}

impl SourceId {
    pub fn all() -> [SourceId; 6] {
        [
            SourceId::CrtSh,
            SourceId::AlienVault,
            SourceId::ThreatCrowd,
            SourceId::Wayback,
            SourceId::HackerTarget,
            SourceId::RapidDns,
        ]
    }

    pub fn method(&self) -> Method {
        match self {
            SourceId::CrtSh => Method::CertificateTransparency,
            SourceId::AlienVault | SourceId::ThreatCrowd => Method::ThreatIntelligence,
            SourceId::Wayback => Method::WebArchive,
            SourceId::HackerTarget | SourceId::RapidDns => Method::DnsAggregators,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::CrtSh => "crtsh",
            SourceId::AlienVault => "alienvault",
            SourceId::ThreatCrowd => "threatcrowd",
            SourceId::Wayback => "wayback",
            SourceId::HackerTarget => "hackertarget",
            SourceId::RapidDns => "rapiddns",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        SourceId::all()
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown source: {:?}", s)))
    }
}

// endregion:     --- Identifiers

// region:        --- Models

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// One-way state machine of a job.
    pub fn can_become(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued | JobStatus::Running, JobStatus::Cancelled | JobStatus::Failed) => {
                true
            }
            (JobStatus::Running, JobStatus::Completed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    pub server: Option<String>,
    pub cms: Vec<String>,
    pub title: Option<String>,
}

/// How sure a takeover flag is, from a bare CNAME match up to the unclaimed
/// resource page of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeoverConfidence {
    Low,
    Medium,
    High,
}

/// What a producer reports for one hostname.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub hostname: String,
    pub method: Method,
    pub ip_addresses: BTreeSet<IpAddr>,
    pub cname: Option<String>,
}

impl Discovery {
    pub fn new(hostname: impl Into<String>, method: Method) -> Self {
        Self {
            hostname: hostname.into(),
            method,
            ip_addresses: BTreeSet::new(),
            cname: None,
        }
    }

    pub fn resolved(hostname: impl Into<String>, method: Method, resolution: Resolution) -> Self {
        Self {
            hostname: hostname.into(),
            method,
            ip_addresses: resolution.ip_addresses,
            cname: resolution.cname,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdomainRecord {
    pub hostname: String,
    pub discovery_methods: BTreeSet<Method>,
    pub ip_addresses: BTreeSet<IpAddr>,
    pub cname: Option<String>,
    pub http_status: Option<u16>,
    pub takeover_vulnerable: bool,
    pub takeover_service: Option<String>,
    pub takeover_confidence: Option<TakeoverConfidence>,
    pub technology: Option<Technology>,
    #[serde(with = "time::serde::rfc3339")]
    pub discovered_at: OffsetDateTime,
}

impl SubdomainRecord {
    pub fn new(hostname: String) -> Self {
        Self {
            hostname,
            discovery_methods: BTreeSet::new(),
            ip_addresses: BTreeSet::new(),
            cname: None,
            http_status: None,
            takeover_vulnerable: false,
            takeover_service: None,
            takeover_confidence: None,
            technology: None,
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    /// Union of methods and addresses, the first CNAME seen is kept.
    pub fn absorb(&mut self, discovery: Discovery) {
        self.discovery_methods.insert(discovery.method);
        self.absorb_resolution(Resolution {
            ip_addresses: discovery.ip_addresses,
            cname: discovery.cname,
        });
    }

    pub fn absorb_resolution(&mut self, resolution: Resolution) {
        self.ip_addresses.extend(resolution.ip_addresses);
        if self.cname.is_none() {
            self.cname = resolution.cname;
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.ip_addresses.is_empty() || self.cname.is_some()
    }

    pub fn is_live(&self) -> bool {
        !self.ip_addresses.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProducerOutcome {
    Pending,
    Succeeded { found: usize },
    Failed { reason: String },
}

/// Per producer metadata so partial results stay visible on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerReport {
    pub name: String,
    pub method: Method,
    pub outcome: ProducerOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerationJob {
    pub id: JobId,
    pub target_domain: String,
    pub methods: BTreeSet<Method>,
    pub options: ScanOptions,
    pub status: JobStatus,
    pub progress_percentage: f32,
    pub current_method: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub discovered: BTreeMap<String, SubdomainRecord>,
    pub producers: Vec<ProducerReport>,
    pub error_message: Option<String>,
}

impl EnumerationJob {
    pub fn new(target_domain: String, methods: BTreeSet<Method>, options: ScanOptions) -> Self {
        Self {
            id: JobId::new(),
            target_domain,
            methods,
            options,
            status: JobStatus::Queued,
            progress_percentage: 0.0,
            current_method: None,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            discovered: BTreeMap::new(),
            producers: Vec::new(),
            error_message: None,
        }
    }

    pub fn progress_event(&self) -> ProgressEvent {
        ProgressEvent {
            job_id: self.id,
            status: self.status,
            current_method: self.current_method.clone(),
            subdomains_found: self.discovered.len(),
            progress_percentage: self.progress_percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub current_method: Option<String>,
    pub subdomains_found: usize,
    pub progress_percentage: f32,
}

// endregion:     --- Models

// region:        --- Exporting utils

pub fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        Ok(false)
    } else {
        fs::create_dir_all(dir)?;
        Ok(true)
    }
}

pub fn export_to_json(job: &EnumerationJob, path: &Path) -> Result<()> {
    let json = to_string_pretty(job)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

// endregion:     --- Exporting utils
