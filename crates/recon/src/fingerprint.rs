use crate::model::Technology;
use crate::Result;
use lazy_regex::regex;
use reqwest::header::{HeaderMap, SERVER};
use reqwest::{redirect, Client, Response};
use std::time::Duration;
use tracing::{debug, info, instrument};

// region:        --- Constants

const MAX_REDIRECTS: usize = 5;
const MAX_TITLE_CHARS: usize = 100;

// endregion:     --- Constants

// region:        --- Signatures

// (header, lowercased needle, technology)
const HEADER_SIGNATURES: &[(&str, &str, &str)] = &[
    ("x-powered-by", "php", "PHP"),
    ("x-powered-by", "asp.net", "ASP.NET"),
    ("x-powered-by", "express", "Express"),
    ("x-powered-by", "next.js", "Next.js"),
    ("x-generator", "drupal", "Drupal"),
    ("x-generator", "wordpress", "WordPress"),
    ("x-generator", "joomla", "Joomla"),
    ("x-drupal-cache", "", "Drupal"),
    ("set-cookie", "wordpress_", "WordPress"),
    ("set-cookie", "laravel_session", "Laravel"),
    ("set-cookie", "csrftoken", "Django"),
    ("set-cookie", "jsessionid", "Java"),
    ("set-cookie", "phpsessid", "PHP"),
];

// (lowercased needle, technology)
const BODY_SIGNATURES: &[(&str, &str)] = &[
    ("wp-content", "WordPress"),
    ("wp-includes", "WordPress"),
    ("/components/com_", "Joomla"),
    ("sites/all/modules", "Drupal"),
    ("drupal-settings-json", "Drupal"),
    ("csrfmiddlewaretoken", "Django"),
    ("name=\"csrf-token\"", "Laravel"),
    ("data-reactroot", "React"),
    ("__next_data__", "Next.js"),
    ("ng-version", "Angular"),
    ("ng-app", "Angular"),
    ("data-v-app", "Vue.js"),
    ("cdn.shopify.com", "Shopify"),
    ("static.squarespace.com", "Squarespace"),
    ("content=\"ghost", "Ghost"),
];

// endregion:     --- Signatures

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fingerprint {
    pub http_status: Option<u16>,
    pub server: Option<String>,
    pub cms_signals: Vec<String>,
    pub title: Option<String>,
    /// Raw response body, matched against takeover signatures.
    pub body: String,
}

impl Fingerprint {
    pub fn technology(&self) -> Option<Technology> {
        if self.server.is_none() && self.cms_signals.is_empty() && self.title.is_none() {
            return None;
        }

        Some(Technology {
            server: self.server.clone(),
            cms: self.cms_signals.clone(),
            title: self.title.clone(),
        })
    }
}

/// Single GET per scheme against live hosts, no crawling.
pub struct Fingerprinter {
    http_client: Client,
}

impl Fingerprinter {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        debug!("HTTP Client created: {:?}", http_client);

        Ok(Self { http_client })
    }

    /// Tries `https://` then `http://`, the first response wins. Without any
    /// response the fingerprint is empty.
    #[instrument(name = "fingerprint", level = "debug", skip_all, fields(hostname = hostname))]
    pub async fn probe(&self, hostname: &str) -> Fingerprint {
        for scheme in ["https", "http"] {
            let url = format!("{}://{}/", scheme, hostname);
            match self.http_client.get(&url).send().await {
                Ok(res) => {
                    let fingerprint = analyze(res).await;
                    info!(
                        "{:12} - {:?} {:?} {:?}",
                        "FINGERPRINT", fingerprint.http_status, fingerprint.server, fingerprint.cms_signals
                    );
                    return fingerprint;
                }
                Err(err) => debug!("{} unreachable: {}", url, err),
            }
        }

        Fingerprint::default()
    }
}

async fn analyze(res: Response) -> Fingerprint {
    let http_status = Some(res.status().as_u16());
    let server = res
        .headers()
        .get(SERVER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let mut cms_signals = header_signals(res.headers());
    let body = res.text().await.unwrap_or_default();
    let title = extract_title(&body);

    let lowercased = body.to_lowercase();
    for (needle, technology) in BODY_SIGNATURES {
        if lowercased.contains(needle) {
            push_unique(&mut cms_signals, technology);
        }
    }

    Fingerprint {
        http_status,
        server,
        cms_signals,
        title,
        body,
    }
}

fn header_signals(headers: &HeaderMap) -> Vec<String> {
    let mut signals = Vec::new();
    for (header, needle, technology) in HEADER_SIGNATURES {
        let matched = headers.get_all(*header).iter().any(|value| {
            value
                .to_str()
                .map(|value| value.to_lowercase().contains(needle))
                .unwrap_or(false)
        });
        if matched {
            push_unique(&mut signals, technology);
        }
    }
    signals
}

fn push_unique(signals: &mut Vec<String>, technology: &str) {
    if !signals.iter().any(|signal| signal == technology) {
        signals.push(technology.to_string());
    }
}

fn extract_title(body: &str) -> Option<String> {
    let captures = regex!(r"(?is)<title[^>]*>([^<]+)</title>").captures(body)?;
    let title: String = captures[1]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
