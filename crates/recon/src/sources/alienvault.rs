use super::{collect_scoped, http_request, read_body, Module, PassiveSource};
use crate::model::SourceId;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://otx.alienvault.com";

// region:        --- Module info

pub struct AlienVault {
    base_url: String,
}

impl AlienVault {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for AlienVault {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for AlienVault {
    fn name(&self) -> String {
        "sources/alienvault".to_string()
    }
    fn description(&self) -> String {
        "Use AlienVault OTX passive DNS to find subdomains".to_string()
    }
}

// endregion:     --- Module info

#[derive(Debug, Deserialize)]
struct PassiveDnsResponse {
    #[serde(default)]
    passive_dns: Vec<PassiveDnsRecord>,
}

#[derive(Debug, Deserialize)]
struct PassiveDnsRecord {
    #[serde(default)]
    hostname: String,
}

#[async_trait]
impl PassiveSource for AlienVault {
    fn id(&self) -> SourceId {
        SourceId::AlienVault
    }

    #[instrument(name = "query", level = "debug", fields(source = %self.id()), skip_all)]
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>> {
        let url = format!(
            "{}/api/v1/indicators/domain/{}/passive_dns",
            self.base_url, domain
        );
        let res = http_request(http_client, self.id(), &url).await?;
        let body = read_body(res, self.id()).await?;

        let records = match serde_json::from_str::<PassiveDnsResponse>(&body) {
            Ok(response) => response.passive_dns,
            Err(err) => {
                debug!("Unparseable response: {}", err);
                return Ok(HashSet::new());
            }
        };

        let subdomains = collect_scoped(records.iter().map(|record| &record.hostname), domain);
        debug!("{} collected", subdomains.len());
        Ok(subdomains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_passive_dns_hostnames() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/indicators/domain/example.com/passive_dns"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"passive_dns": [
                    {"hostname": "vpn.example.com", "address": "10.0.0.1"},
                    {"hostname": "vpn.example.com", "address": "10.0.0.2"},
                    {"hostname": "mx.example.com"},
                    {"hostname": "example.com.attacker.net"},
                    {"address": "10.0.0.9"}
                ], "count": 5}"#,
            ))
            .mount(&server)
            .await;

        let source = AlienVault::with_base_url(&server.uri());
        let found = source.query(&Client::new(), "example.com").await.unwrap();

        assert_eq!(
            found,
            HashSet::from(["vpn.example.com".to_string(), "mx.example.com".to_string()])
        );
    }
}
