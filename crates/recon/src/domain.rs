use crate::{Error, Result};
use lazy_regex::regex;

/// Cleans user input into a bare lowercase domain: scheme, `www.` prefix,
/// path, port and trailing dot are dropped.
pub fn sanitize_domain(input: &str) -> String {
    let mut domain = input.trim().to_lowercase();

    if let Some(idx) = domain.find("://") {
        domain = domain[idx + 3..].to_string();
    }
    if let Some(idx) = domain.find('/') {
        domain.truncate(idx);
    }
    if let Some(idx) = domain.find(':') {
        domain.truncate(idx);
    }
    if let Some(stripped) = domain.strip_prefix("www.") {
        domain = stripped.to_string();
    }

    domain.trim_end_matches('.').to_string()
}

pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253
        && regex!(r"^([a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?\.)+([a-z]{2,63}|xn--[a-z0-9\-]{1,59})$").is_match(domain)
}

/// Sanitizes then validates a target domain.
pub fn validate_target(input: &str) -> Result<String> {
    let domain = sanitize_domain(input);
    if is_valid_domain(&domain) {
        Ok(domain)
    } else {
        Err(Error::InvalidRequest(format!("invalid domain: {:?}", input)))
    }
}

/// Normalizes a hostname reported by a source and keeps it only when it is
/// `domain` itself or one of its subdomains.
///
/// Wildcard prefixes (`*.`) are stripped, any other wildcard is rejected.
pub fn scoped_hostname(raw: &str, domain: &str) -> Option<String> {
    let mut hostname = raw.trim().trim_end_matches('.').to_lowercase();
    while let Some(stripped) = hostname.strip_prefix("*.") {
        hostname = stripped.to_string();
    }

    if hostname.is_empty() || hostname.len() > 253 {
        return None;
    }
    if !regex!(r"^[a-z0-9_]([a-z0-9_\-]{0,61}[a-z0-9_])?(\.[a-z0-9_]([a-z0-9_\-]{0,61}[a-z0-9_])?)*$")
        .is_match(&hostname)
    {
        return None;
    }

    if is_within(&hostname, domain) {
        Some(hostname)
    } else {
        None
    }
}

/// True when `hostname` equals `domain` or ends with `.{domain}`.
pub fn is_within(hostname: &str, domain: &str) -> bool {
    hostname == domain
        || hostname
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_domain("  HTTPS://www.Example.com/login "), "example.com");
        assert_eq!(sanitize_domain("example.com:8443"), "example.com");
        assert_eq!(sanitize_domain("api.example.com."), "api.example.com");
    }

    #[test]
    fn validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("a-b.co.uk"));
        assert!(!is_valid_domain("example"));
        assert!(!is_valid_domain("-bad.com"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(is_valid_domain("example.xn--p1ai"));
        assert!(is_valid_domain("xn--80ak6aa92e.xn--p1ai"));
        assert!(!is_valid_domain("example.xn--"));
        assert!(validate_target("").is_err());
        assert_eq!(validate_target("http://Example.COM").unwrap(), "example.com");
    }

    #[test]
    fn scoping() {
        assert_eq!(
            scoped_hostname("*.Dev.Example.com.", "example.com"),
            Some("dev.example.com".to_string())
        );
        assert_eq!(
            scoped_hostname("example.com", "example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(scoped_hostname("notexample.com", "example.com"), None);
        assert_eq!(scoped_hostname("example.com.evil.net", "example.com"), None);
        assert_eq!(scoped_hostname("a.*.example.com", "example.com"), None);
        assert_eq!(scoped_hostname("", "example.com"), None);
    }
}
