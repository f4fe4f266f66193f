use super::{collect_scoped, http_request, read_body, Module, PassiveSource};
use crate::model::SourceId;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://threatcrowd.org";

// region:        --- Module info

pub struct ThreatCrowd {
    base_url: String,
}

impl ThreatCrowd {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for ThreatCrowd {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ThreatCrowd {
    fn name(&self) -> String {
        "sources/threatcrowd".to_string()
    }
    fn description(&self) -> String {
        "Use ThreatCrowd domain reports to find subdomains".to_string()
    }
}

// endregion:     --- Module info

#[derive(Debug, Deserialize)]
struct DomainReport {
    #[serde(default)]
    subdomains: Vec<String>,
}

#[async_trait]
impl PassiveSource for ThreatCrowd {
    fn id(&self) -> SourceId {
        SourceId::ThreatCrowd
    }

    #[instrument(name = "query", level = "debug", fields(source = %self.id()), skip_all)]
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>> {
        let url = format!(
            "{}/searchApi/v2/domain/report/?domain={}",
            self.base_url, domain
        );
        let res = http_request(http_client, self.id(), &url).await?;
        let body = read_body(res, self.id()).await?;

        let subdomains = match serde_json::from_str::<DomainReport>(&body) {
            Ok(report) => collect_scoped(report.subdomains, domain),
            Err(err) => {
                debug!("Unparseable response: {}", err);
                HashSet::new()
            }
        };

        debug!("{} collected", subdomains.len());
        Ok(subdomains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_report_subdomains() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/searchApi/v2/domain/report/"))
            .and(query_param("domain", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"response_code": "1", "subdomains": ["dev.example.com", "Dev.Example.com", "example.net"]}"#,
            ))
            .mount(&server)
            .await;

        let source = ThreatCrowd::with_base_url(&server.uri());
        let found = source.query(&Client::new(), "example.com").await.unwrap();

        assert_eq!(found, HashSet::from(["dev.example.com".to_string()]));
    }

    #[tokio::test]
    async fn missing_field_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"response_code": "0"}"#))
            .mount(&server)
            .await;

        let source = ThreatCrowd::with_base_url(&server.uri());
        assert!(source
            .query(&Client::new(), "example.com")
            .await
            .unwrap()
            .is_empty());
    }
}
