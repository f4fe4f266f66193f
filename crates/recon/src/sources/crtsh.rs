use super::{collect_scoped, http_request, read_body, Module, PassiveSource};
use crate::model::SourceId;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, instrument, trace};

const BASE_URL: &str = "https://crt.sh";

// region:        --- Module info

pub struct CrtSh {
    base_url: String,
}

impl CrtSh {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for CrtSh {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for CrtSh {
    fn name(&self) -> String {
        "sources/crtsh".to_string()
    }

    fn description(&self) -> String {
        "Use crt.sh certificate transparency logs to find subdomains".to_string()
    }
}

// endregion:     --- Module info

#[derive(Debug, Deserialize)]
pub struct CrtShEntry {
    pub name_value: String,
}

#[async_trait]
impl PassiveSource for CrtSh {
    fn id(&self) -> SourceId {
        SourceId::CrtSh
    }

    #[instrument(name = "query", level = "debug", fields(source = %self.id()), skip_all)]
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>> {
        let url = format!("{}/?q=%25.{}&output=json", self.base_url, domain);
        let res = http_request(http_client, self.id(), &url).await?;
        let body = read_body(res, self.id()).await?;

        let crtsh_entries: Vec<CrtShEntry> = match serde_json::from_str(&body) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Unparseable response: {}", err);
                return Ok(HashSet::new());
            }
        };

        // one certificate may carry several names, newline separated
        let subdomains = collect_scoped(
            crtsh_entries
                .iter()
                .flat_map(|entry| entry.name_value.split('\n'))
                .inspect(|subdomain| trace!("Collecting: {:?}", subdomain)),
            domain,
        );

        debug!("{} collected", subdomains.len());
        Ok(subdomains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_name_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("output", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {"name_value": "example.com\nwww.example.com"},
                    {"name_value": "*.api.example.com"},
                    {"name_value": "Mail.Example.com"},
                    {"name_value": "unrelated.org"}
                ]"#,
            ))
            .mount(&server)
            .await;

        let source = CrtSh::with_base_url(&server.uri());
        let found = source.query(&Client::new(), "example.com").await.unwrap();

        let expected: HashSet<String> = [
            "example.com",
            "www.example.com",
            "api.example.com",
            "mail.example.com",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn garbage_body_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .mount(&server)
            .await;

        let source = CrtSh::with_base_url(&server.uri());
        let found = source.query(&Client::new(), "example.com").await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let source = CrtSh::with_base_url(&server.uri());
        let err = source
            .query(&Client::new(), "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }
}
