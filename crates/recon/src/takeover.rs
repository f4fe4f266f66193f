use crate::model::TakeoverConfidence;
use tracing::{debug, instrument};

/// A hosting service whose dangling CNAMEs can be claimed by a third party.
#[derive(Debug, PartialEq, Eq)]
pub struct Signature {
    pub service: &'static str,
    /// Suffixes matched at a label boundary. A pattern ending with `-` or `.`
    /// matches the start of a label instead.
    pub cname_patterns: &'static [&'static str],
    /// Body snippets served for an unclaimed resource, matched ignoring case.
    pub fingerprints: &'static [&'static str],
}

// region:        --- Signatures

pub static SIGNATURES: &[Signature] = &[
    Signature {
        service: "GitHub Pages",
        cname_patterns: &["github.io", "github.com"],
        fingerprints: &["There isn't a GitHub Pages site here", "For root URLs"],
    },
    Signature {
        service: "Heroku",
        cname_patterns: &["herokuapp.com", "herokussl.com", "herokudns.com"],
        fingerprints: &["No such app", "no-such-app"],
    },
    Signature {
        service: "AWS S3",
        cname_patterns: &["s3.amazonaws.com", "s3-website-", "s3-website."],
        fingerprints: &["NoSuchBucket", "The specified bucket does not exist"],
    },
    Signature {
        service: "AWS CloudFront",
        cname_patterns: &["cloudfront.net"],
        fingerprints: &["The request could not be satisfied", "Bad request"],
    },
    Signature {
        service: "Azure",
        cname_patterns: &[
            "azurewebsites.net",
            "cloudapp.net",
            "cloudapp.azure.com",
            "trafficmanager.net",
            "blob.core.windows.net",
        ],
        fingerprints: &["404 Web Site not found", "This site has been disabled"],
    },
    Signature {
        service: "Netlify",
        cname_patterns: &["netlify.com", "netlify.app"],
        fingerprints: &["Not Found - Request ID"],
    },
    Signature {
        service: "Vercel",
        cname_patterns: &["vercel.app", "now.sh"],
        fingerprints: &[
            "The deployment could not be found",
            "The page you were looking for doesn't exist",
        ],
    },
    Signature {
        service: "Wordpress",
        cname_patterns: &["wordpress.com"],
        fingerprints: &["Do you want to register"],
    },
    Signature {
        service: "Shopify",
        cname_patterns: &["myshopify.com"],
        fingerprints: &["Sorry, this shop is currently unavailable"],
    },
    Signature {
        service: "Tumblr",
        cname_patterns: &["tumblr.com"],
        fingerprints: &[
            "There's nothing here",
            "Whatever you were looking for doesn't currently exist",
        ],
    },
    Signature {
        service: "Bitbucket",
        cname_patterns: &["bitbucket.io"],
        fingerprints: &["Repository not found"],
    },
    Signature {
        service: "Ghost",
        cname_patterns: &["ghost.io"],
        fingerprints: &["The thing you were looking for is no longer here"],
    },
    Signature {
        service: "Pantheon",
        cname_patterns: &["pantheonsite.io"],
        fingerprints: &["404 error unknown site"],
    },
    Signature {
        service: "Fastly",
        cname_patterns: &["fastly.net"],
        fingerprints: &["Fastly error: unknown domain"],
    },
    Signature {
        service: "Zendesk",
        cname_patterns: &["zendesk.com"],
        fingerprints: &["Help Center Closed"],
    },
    Signature {
        service: "HelpJuice",
        cname_patterns: &["helpjuice.com"],
        fingerprints: &["We could not find what you're looking for"],
    },
    Signature {
        service: "Cargo",
        cname_patterns: &["cargocollective.com"],
        fingerprints: &["If you're moving your domain away from Cargo"],
    },
    Signature {
        service: "StatusPage",
        cname_patterns: &["statuspage.io"],
        fingerprints: &["Status page not found"],
    },
    Signature {
        service: "Surge",
        cname_patterns: &["surge.sh"],
        fingerprints: &["project not found"],
    },
    Signature {
        service: "Firebase",
        cname_patterns: &["firebaseapp.com", "web.app"],
        fingerprints: &["Site Not Found"],
    },
    Signature {
        service: "Readme.io",
        cname_patterns: &["readme.io"],
        fingerprints: &["Project doesnt exist... yet!"],
    },
    Signature {
        service: "Unbounce",
        cname_patterns: &["unbouncepages.com"],
        fingerprints: &["The requested URL was not found on this server"],
    },
];

// endregion:     --- Signatures

/// First signature whose CNAME pattern matches, case and trailing dot aside.
pub fn matching_signature(cname: &str) -> Option<&'static Signature> {
    let cname = cname.trim().trim_end_matches('.').to_lowercase();
    if cname.is_empty() {
        return None;
    }

    SIGNATURES.iter().find(|signature| {
        signature
            .cname_patterns
            .iter()
            .any(|pattern| matches_pattern(&cname, pattern))
    })
}

/// True when `hostname` points through `cname` to a service listed in
/// [`SIGNATURES`].
#[instrument(name = "takeover", level = "debug", skip_all, fields(hostname = hostname))]
pub fn check(hostname: &str, cname: Option<&str>) -> bool {
    match cname.and_then(matching_signature) {
        Some(signature) => {
            debug!("{:12} - {:?}", "VULNERABLE", signature.service);
            true
        }
        None => false,
    }
}

/// Confidence of a bare CNAME match. A CNAME whose target no longer
/// resolves is the classic dangling case.
pub fn cname_confidence(has_addresses: bool) -> TakeoverConfidence {
    if has_addresses {
        TakeoverConfidence::Low
    } else {
        TakeoverConfidence::Medium
    }
}

/// Grades the HTTP answer of a host whose CNAME matched `signature`: the
/// unclaimed resource page is `High`, a 404 is `Medium`, anything else adds
/// nothing.
pub fn response_confidence(
    signature: &Signature,
    http_status: Option<u16>,
    body: &str,
) -> Option<TakeoverConfidence> {
    let body = body.to_lowercase();
    let evidence = signature
        .fingerprints
        .iter()
        .find(|fingerprint| body.contains(&fingerprint.to_lowercase()));

    match (evidence, http_status) {
        (Some(fingerprint), _) => {
            debug!("{:12} - {:?}", "EVIDENCE", fingerprint);
            Some(TakeoverConfidence::High)
        }
        (None, Some(404)) => Some(TakeoverConfidence::Medium),
        _ => None,
    }
}

fn matches_pattern(cname: &str, pattern: &str) -> bool {
    if pattern.ends_with('-') || pattern.ends_with('.') {
        cname.starts_with(pattern) || cname.contains(&format!(".{}", pattern))
    } else {
        cname == pattern || cname.ends_with(&format!(".{}", pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_signature_matches_its_own_patterns() {
        for signature in SIGNATURES {
            for pattern in signature.cname_patterns {
                let cname = if pattern.ends_with('-') || pattern.ends_with('.') {
                    format!("victim.{}us-east-1.amazonaws.com", pattern)
                } else {
                    format!("victim.{}", pattern)
                };
                assert_eq!(
                    matching_signature(&cname).map(|found| found.service),
                    Some(signature.service),
                    "{}",
                    cname
                );
                assert!(check("sub.example.com", Some(&cname)));
            }
        }
    }

    #[test]
    fn matching_ignores_case_and_trailing_dot() {
        let signature = matching_signature("Example.GitHub.IO.").unwrap();
        assert_eq!(signature.service, "GitHub Pages");
    }

    #[test]
    fn patterns_match_at_label_boundary_only() {
        assert!(matching_signature("nothub.io").is_none());
        assert!(matching_signature("fakeherokuapp.com").is_none());
        assert!(matching_signature("github.io.evil.net").is_none());
        assert!(matching_signature("b.s3-website-eu-west-1.amazonaws.com").is_some());
    }

    #[test]
    fn no_cname_is_never_vulnerable() {
        assert!(!check("www.example.com", None));
        assert!(!check("www.example.com", Some("")));
        assert!(!check("www.example.com", Some("lb.example.net")));
    }

    #[test]
    fn dangling_cname_is_more_likely() {
        assert_eq!(cname_confidence(true), TakeoverConfidence::Low);
        assert_eq!(cname_confidence(false), TakeoverConfidence::Medium);
    }

    #[test]
    fn unclaimed_page_confirms_the_match() {
        let github = matching_signature("example.github.io").unwrap();

        let page = "<h1>404</h1><p>There isn't a GitHub Pages site here.</p>";
        assert_eq!(
            response_confidence(github, Some(404), page),
            Some(TakeoverConfidence::High)
        );
        assert_eq!(
            response_confidence(github, Some(200), &page.to_uppercase()),
            Some(TakeoverConfidence::High)
        );
        assert_eq!(
            response_confidence(github, Some(404), "<h1>Not here</h1>"),
            Some(TakeoverConfidence::Medium)
        );
        assert_eq!(response_confidence(github, Some(200), "<h1>Docs</h1>"), None);
        assert_eq!(response_confidence(github, None, ""), None);

        // another service's page is no evidence
        let heroku = matching_signature("app.herokuapp.com").unwrap();
        assert_eq!(response_confidence(heroku, Some(200), page), None);
    }

    #[test]
    fn table_is_complete() {
        assert!(SIGNATURES.len() >= 18);
        assert!(SIGNATURES.iter().all(|signature| !signature.fingerprints.is_empty()));
    }
}
