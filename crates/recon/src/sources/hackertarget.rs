use super::{collect_scoped, http_request, read_body, Module, PassiveSource};
use crate::model::SourceId;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.hackertarget.com";

// region:        --- Module info

pub struct HackerTarget {
    base_url: String,
}

impl HackerTarget {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for HackerTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for HackerTarget {
    fn name(&self) -> String {
        "sources/hackertarget".to_string()
    }
    fn description(&self) -> String {
        "Use HackerTarget host search to find subdomains".to_string()
    }
}

// endregion:     --- Module info

#[async_trait]
impl PassiveSource for HackerTarget {
    fn id(&self) -> SourceId {
        SourceId::HackerTarget
    }

    #[instrument(name = "query", level = "debug", fields(source = %self.id()), skip_all)]
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>> {
        let url = format!("{}/hostsearch/?q={}", self.base_url, domain);
        let res = http_request(http_client, self.id(), &url).await?;
        let body = read_body(res, self.id()).await?;

        // one `host,ip` pair per line, errors come back as plain text
        let hosts = body
            .lines()
            .filter_map(|line| line.split_once(','))
            .map(|(host, _ip)| host);

        let subdomains = collect_scoped(hosts, domain);
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
    async fn parses_csv_lines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hostsearch/"))
            .and(query_param("q", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "ns1.example.com,192.0.2.1\nftp.example.com,192.0.2.2\nexample.org,192.0.2.3\n",
            ))
            .mount(&server)
            .await;

        let source = HackerTarget::with_base_url(&server.uri());
        let found = source.query(&Client::new(), "example.com").await.unwrap();

        assert_eq!(
            found,
            HashSet::from(["ns1.example.com".to_string(), "ftp.example.com".to_string()])
        );
    }

    #[tokio::test]
    async fn api_error_text_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("API count exceeded"))
            .mount(&server)
            .await;

        let source = HackerTarget::with_base_url(&server.uri());
        assert!(source
            .query(&Client::new(), "example.com")
            .await
            .unwrap()
            .is_empty());
    }
}
