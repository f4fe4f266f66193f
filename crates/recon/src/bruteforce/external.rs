use super::BruteForceEvent;
use crate::config::{DEFAULT_DNS_TIMEOUT_S, DEFAULT_THREADS};
use crate::dns::Resolution;
use crate::domain::scoped_hostname;
use crate::model::{Discovery, Method};
use crate::{Error, Result};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// region:        --- Constants

const PROBE_TIMEOUT_MS: u64 = 5000;
const RUN_TIMEOUT_S: u64 = 300;

// endregion:     --- Constants

/// A mass-DNS binary (`dnsx` compatible) reading candidates on stdin and
/// printing `host [ip]` lines for those resolving.
#[derive(Debug, Clone)]
pub struct ExternalResolver {
    binary: PathBuf,
    run_timeout: Duration,
    threads: usize,
    lookup_timeout: Duration,
    nameservers: Vec<IpAddr>,
}

impl ExternalResolver {
    /// Capability probe: the binary is usable when `-version` exits successfully.
    pub async fn probe(binary: &Path) -> Option<Self> {
        let status = timeout(
            Duration::from_millis(PROBE_TIMEOUT_MS),
            Command::new(binary)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        match status {
            Ok(Ok(status)) if status.success() => {
                info!("{:12} - {:?}", "EXT RESOLVER", binary);
                Some(Self {
                    binary: binary.to_path_buf(),
                    run_timeout: Duration::from_secs(RUN_TIMEOUT_S),
                    threads: DEFAULT_THREADS,
                    lookup_timeout: Duration::from_secs(DEFAULT_DNS_TIMEOUT_S),
                    nameservers: Vec::new(),
                })
            }
            _ => {
                debug!("{:?} not available", binary);
                None
            }
        }
    }

    /// Same binary, run with the settings of one job.
    pub fn with_settings(
        mut self,
        threads: usize,
        lookup_timeout: Duration,
        nameservers: &[IpAddr],
    ) -> Self {
        self.threads = threads;
        self.lookup_timeout = lookup_timeout;
        self.nameservers = nameservers.to_vec();
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-silent", "-a", "-cname", "-resp"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        args.push("-t".to_string());
        args.push(self.threads.to_string());
        args.push("-timeout".to_string());
        args.push(format!("{}s", self.lookup_timeout.as_secs().max(1)));
        if !self.nameservers.is_empty() {
            let nameservers: Vec<String> = self.nameservers.iter().map(|ip| ip.to_string()).collect();
            args.push("-r".to_string());
            args.push(nameservers.join(","));
        }
        args
    }

    /// Streams every resolving candidate as a `Found` event. The child process
    /// is killed on cancellation, timeout or any early return.
    #[instrument(name = "external_resolve", level = "info", skip_all, fields(binary = ?self.binary))]
    pub async fn resolve_all(
        &self,
        domain: &str,
        candidates: &[String],
        events_tx: &mpsc::Sender<BruteForceEvent>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let args = self.args();
        debug!("{:?} {}", self.binary, args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ExternalTool("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ExternalTool("stdout not captured".to_string()))?;

        let input = candidates.join("\n");
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(input.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let mut lines = BufReader::new(stdout).lines();
        let deadline = sleep(self.run_timeout);
        tokio::pin!(deadline);
        let mut found = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cancelled after {} found", found);
                    writer.abort();
                    return Ok(found);
                }
                _ = &mut deadline => {
                    writer.abort();
                    return Err(Error::ExternalTool(format!("no result after {:?}", self.run_timeout)));
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        let Some(discovery) = parse_line(&line, domain) else {
                            continue;
                        };
                        found += 1;
                        if events_tx.send(BruteForceEvent::Found(discovery)).await.is_err() {
                            return Ok(found);
                        }
                    }
                    None => break,
                },
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!("Exited with {}", status);
            return Err(Error::ExternalTool(format!("exited with {}", status)));
        }

        info!("{} resolved", found);
        Ok(found)
    }
}

/// Parses `host [A] [1.2.3.4]`, `host [CNAME] [target]` or `host [1.2.3.4]`.
fn parse_line(line: &str, domain: &str) -> Option<Discovery> {
    let mut tokens = line.split_whitespace();
    let hostname = scoped_hostname(tokens.next()?, domain)?;

    let mut resolution = Resolution::default();
    let mut previous_tag = "";
    for token in tokens {
        let value = token.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = value.parse::<IpAddr>() {
            resolution.ip_addresses.insert(ip);
        } else if previous_tag.eq_ignore_ascii_case("cname") && resolution.cname.is_none() {
            resolution.cname = Some(value.trim_end_matches('.').to_lowercase());
        }
        previous_tag = value;
    }

    Some(Discovery::resolved(hostname, Method::DnsBruteforce, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;

    // answers for www and mail only
    #[cfg(unix)]
    const RESOLVING: &str = r#"while read -r host || [ -n "$host" ]; do
  case "$host" in
    www.*|mail.*) echo "$host [A] [192.0.2.1]" ;;
  esac
done
"#;

    #[cfg(unix)]
    const CRASHING: &str = r#"cat > /dev/null
echo "www.example.com [A] [192.0.2.1]"
exit 1
"#;

    #[cfg(unix)]
    fn fake_dnsx(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("dnsx");
        let script = format!("#!/bin/sh\n[ \"$1\" = \"-version\" ] && exit 0\n{}", body);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    async fn run(
        external: &ExternalResolver,
        candidates: &[&str],
    ) -> (Result<usize>, Vec<String>) {
        let candidates: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let result = external
            .resolve_all("example.com", &candidates, &events_tx, &CancellationToken::new())
            .await;
        drop(events_tx);

        let mut hostnames = Vec::new();
        while let Some(event) = events_rx.recv().await {
            if let BruteForceEvent::Found(discovery) = event {
                hostnames.push(discovery.hostname);
            }
        }
        hostnames.sort();
        (result, hostnames)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_what_the_tool_prints() {
        let dir = tempfile::tempdir().unwrap();
        let external = ExternalResolver::probe(&fake_dnsx(dir.path(), RESOLVING))
            .await
            .unwrap();

        let (result, hostnames) =
            run(&external, &["www.example.com", "nope.example.com", "mail.example.com"]).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(hostnames, vec!["mail.example.com", "www.example.com"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let external = ExternalResolver::probe(&fake_dnsx(dir.path(), CRASHING))
            .await
            .unwrap();

        let (result, hostnames) = run(&external, &["www.example.com"]).await;
        assert!(matches!(result, Err(Error::ExternalTool(_))));
        // lines printed before the exit are still reported
        assert_eq!(hostnames, vec!["www.example.com"]);
    }

    #[test]
    fn job_settings_reach_the_command_line() {
        let external = ExternalResolver {
            binary: PathBuf::from("dnsx"),
            run_timeout: Duration::from_secs(RUN_TIMEOUT_S),
            threads: DEFAULT_THREADS,
            lookup_timeout: Duration::from_secs(DEFAULT_DNS_TIMEOUT_S),
            nameservers: Vec::new(),
        };
        assert!(!external.args().contains(&"-r".to_string()));

        let nameservers: Vec<IpAddr> = vec!["1.1.1.1".parse().unwrap(), "9.9.9.9".parse().unwrap()];
        let args = external
            .with_settings(10, Duration::from_secs(7), &nameservers)
            .args();
        assert_eq!(
            args[4..],
            ["-t", "10", "-timeout", "7s", "-r", "1.1.1.1,9.9.9.9"]
        );
    }

    #[test]
    fn parses_output_lines() {
        let plain = parse_line("www.example.com [93.184.216.34]", "example.com").unwrap();
        assert_eq!(plain.hostname, "www.example.com");
        assert_eq!(plain.ip_addresses.len(), 1);

        let tagged = parse_line(
            "docs.example.com [CNAME] [Example.GitHub.io.] [A] [185.199.108.153]",
            "example.com",
        )
        .unwrap();
        assert_eq!(tagged.cname.as_deref(), Some("example.github.io"));
        assert_eq!(tagged.ip_addresses.len(), 1);

        assert!(parse_line("other.net [1.1.1.1]", "example.com").is_none());
        assert!(parse_line("", "example.com").is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_not_detected() {
        let probed = ExternalResolver::probe(Path::new("/nonexistent/dnsx-binary")).await;
        assert!(probed.is_none());
    }
}
