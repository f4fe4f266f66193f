use super::{collect_scoped, http_request, read_body, Module, PassiveSource};
use crate::model::SourceId;
use crate::Result;
use async_trait::async_trait;
use lazy_regex::regex;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://rapiddns.io";

// region:        --- Module info

pub struct RapidDns {
    base_url: String,
}

impl RapidDns {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for RapidDns {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for RapidDns {
    fn name(&self) -> String {
        "sources/rapiddns".to_string()
    }
    fn description(&self) -> String {
        "Scrape rapiddns.io subdomain tables".to_string()
    }
}

// endregion:     --- Module info

#[async_trait]
impl PassiveSource for RapidDns {
    fn id(&self) -> SourceId {
        SourceId::RapidDns
    }

    #[instrument(name = "query", level = "debug", fields(source = %self.id()), skip_all)]
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>> {
        let url = format!("{}/subdomain/{}?full=1", self.base_url, domain);
        let res = http_request(http_client, self.id(), &url).await?;
        let html = read_body(res, self.id()).await?;

        let hosts = regex!(r"[A-Za-z0-9_][A-Za-z0-9_.\-]*\.[A-Za-z]{2,63}")
            .find_iter(&html)
            .map(|found| found.as_str());

        let subdomains = collect_scoped(hosts, domain);
        debug!("{} collected", subdomains.len());
        Ok(subdomains)
    }
}
