use super::{collect_scoped, http_request, read_body, Module, PassiveSource};
use crate::model::SourceId;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, instrument, trace};

const BASE_URL: &str = "https://web.archive.org";

// region:        --- Module info

pub struct Wayback {
    base_url: String,
}

impl Wayback {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Wayback {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Wayback {
    fn name(&self) -> String {
        "sources/wayback".to_string()
    }
    fn description(&self) -> String {
        "Use web.archive.org captures to find subdomains".to_string()
    }
}

// endregion:     --- Module info

#[derive(Debug, Deserialize)]
struct WaybackResponse(Vec<Vec<String>>);

#[async_trait]
impl PassiveSource for Wayback {
    fn id(&self) -> SourceId {
        SourceId::Wayback
    }

    #[instrument(name = "query", level = "debug", fields(source = %self.id()), skip_all)]
    async fn query(&self, http_client: &Client, domain: &str) -> Result<HashSet<String>> {
        let url = format!(
            "{}/cdx/search/cdx?url={}&output=json&matchType=domain&fl=original&collapse=urlkey",
            self.base_url, domain
        );
        let res = http_request(http_client, self.id(), &url).await?;
        let body = read_body(res, self.id()).await?;

        let archived_urls: Vec<String> = match serde_json::from_str::<WaybackResponse>(&body) {
            Ok(rows) => rows.0.into_iter().flatten().collect(),
            Err(err) => {
                debug!("Unparseable response: {}", err);
                return Ok(HashSet::new());
            }
        };

        // first row is the "original" header
        let hosts = archived_urls.iter().filter_map(|url| {
            if url == "original" {
                return None;
            }
            match Url::parse(url) {
                Ok(parsed_url) => parsed_url.host_str().map(|host| host.to_string()),
                Err(_) => {
                    trace!("Parsing url: {:?}", url);
                    None
                }
            }
        });

        let subdomains = collect_scoped(hosts, domain);
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
    async fn extracts_hosts_from_archived_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cdx/search/cdx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[["original"],
                    ["http://blog.example.com/2019/post"],
                    ["https://BLOG.example.com:443/about"],
                    ["https://shop.example.com/?q=1"],
                    ["not a url"],
                    ["https://cdn.other.net/example.com"]]"#,
            ))
            .mount(&server)
            .await;

        let source = Wayback::with_base_url(&server.uri());
        let found = source.query(&Client::new(), "example.com").await.unwrap();

        assert_eq!(
            found,
            HashSet::from(["blog.example.com".to_string(), "shop.example.com".to_string()])
        );
    }

    #[tokio::test]
    async fn empty_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let source = Wayback::with_base_url(&server.uri());
        assert!(source
            .query(&Client::new(), "example.com")
            .await
            .unwrap()
            .is_empty());
    }
}
