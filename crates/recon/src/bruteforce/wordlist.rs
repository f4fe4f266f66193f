use crate::domain::scoped_hostname;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const COMMON_WORDS: &[&str] = &[
    "www", "mail", "ftp", "admin", "test", "dev", "staging", "api", "cdn", "blog", "shop",
    "store", "support", "help", "docs", "portal", "dashboard", "app", "mobile", "m", "secure",
    "vpn", "webmail", "email", "pop", "imap", "smtp", "ns1", "ns2", "mx", "dns", "dns1", "dns2",
    "server", "host", "gateway", "qa", "uat", "beta", "demo", "sandbox", "prod", "status",
    "git", "jenkins", "grafana", "auth", "sso", "static", "assets",
];

/// Words used by `dns_bruteforce` when a job names no wordlist.
pub fn default_wordlist() -> Vec<String> {
    COMMON_WORDS.iter().map(|word| word.to_string()).collect()
}

pub fn load_wordlist(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|err| Error::Wordlist(format!("{}: {}", path.display(), err)))?;
    parse_wordlist(BufReader::new(file))
        .map_err(|err| match err {
            Error::Wordlist(reason) => Error::Wordlist(format!("{}: {}", path.display(), reason)),
            other => other,
        })
}

/// One word per line. Blank lines and `#` comments are skipped, words are
/// lowercased and deduplicated in first-seen order. Invalid UTF-8 is replaced
/// rather than rejected.
pub fn parse_wordlist(mut reader: impl BufRead) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut words = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|err| Error::Wordlist(err.to_string()))?;
        if read == 0 {
            break;
        }

        let word = String::from_utf8_lossy(&line).trim().to_lowercase();
        if word.is_empty() || word.starts_with('#') {
            continue;
        }
        if seen.insert(word.clone()) {
            words.push(word);
        }
    }

    if words.is_empty() {
        return Err(Error::Wordlist("no usable word".to_string()));
    }
    Ok(words)
}

/// `{word}.{domain}` for every word forming a valid hostname, deduplicated.
pub fn generate_candidates(domain: &str, words: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    words
        .iter()
        .filter_map(|word| scoped_hostname(&format!("{}.{}", word.trim_matches('.'), domain), domain))
        .filter(|candidate| candidate != domain && seen.insert(candidate.clone()))
        .collect()
}
