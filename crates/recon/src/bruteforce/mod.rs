mod external;
mod wordlist;

pub use external::ExternalResolver;
pub use wordlist::{default_wordlist, generate_candidates, load_wordlist, parse_wordlist};

use crate::dns::Resolver;
use crate::model::{Discovery, Method};
use futures::{stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

// region:        --- Constants

const EVENTS_QUEUE_CAPACITY: usize = 256;
// candidates between two progress events
const PROGRESS_STEP: usize = 25;

// endregion:     --- Constants

#[derive(Debug, Clone, PartialEq)]
pub enum BruteForceEvent {
    Found(Discovery),
    Progress { processed: usize, total: usize },
}

/// How candidates get resolved, chosen once by probing for the external tool.
#[derive(Debug, Clone)]
pub enum ResolveStrategy {
    Native,
    External(ExternalResolver),
}

impl ResolveStrategy {
    pub async fn detect(binary: &std::path::Path) -> Self {
        match ExternalResolver::probe(binary).await {
            Some(external) => ResolveStrategy::External(external),
            None => ResolveStrategy::Native,
        }
    }
}

#[derive(Clone)]
pub struct BruteForcer {
    resolver: Arc<dyn Resolver>,
    strategy: ResolveStrategy,
    concurrency: usize,
}

impl BruteForcer {
    pub fn new(resolver: Arc<dyn Resolver>, strategy: ResolveStrategy, concurrency: usize) -> Self {
        Self {
            resolver,
            strategy,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolves `{word}.{domain}` for every word and streams the candidates
    /// that resolve as soon as they do.
    ///
    /// The stream ends once every candidate is processed, when `cancel` fires
    /// or when the stream is dropped. It also ends if the resolving task
    /// panics, join the returned handle to tell both apart.
    pub fn bruteforce(
        &self,
        domain: &str,
        words: &[String],
        cancel: CancellationToken,
    ) -> (ReceiverStream<BruteForceEvent>, JoinHandle<()>) {
        let candidates = generate_candidates(domain, words);
        let domain = domain.to_string();
        let (events_tx, events_rx) = mpsc::channel(EVENTS_QUEUE_CAPACITY);

        let brute_forcer = self.clone();
        let handle = tokio::spawn(async move {
            brute_forcer
                .run(&domain, candidates, events_tx, cancel)
                .await;
        });

        (ReceiverStream::new(events_rx), handle)
    }

    #[instrument(name = "bruteforce", level = "info", skip_all, fields(domain = domain))]
    async fn run(
        &self,
        domain: &str,
        candidates: Vec<String>,
        events_tx: mpsc::Sender<BruteForceEvent>,
        cancel: CancellationToken,
    ) {
        info!("{:12} - {:?}", "CANDIDATES", candidates.len());

        if let ResolveStrategy::External(external) = &self.strategy {
            match external
                .resolve_all(domain, &candidates, &events_tx, &cancel)
                .await
            {
                Ok(_) => {
                    let total = candidates.len();
                    let _ = events_tx
                        .send(BruteForceEvent::Progress {
                            processed: total,
                            total,
                        })
                        .await;
                    return;
                }
                Err(err) => warn!("External resolver failed, falling back: {}", err),
            }
        }

        self.resolve_natively(candidates, &events_tx, &cancel).await;
    }

    async fn resolve_natively(
        &self,
        candidates: Vec<String>,
        events_tx: &mpsc::Sender<BruteForceEvent>,
        cancel: &CancellationToken,
    ) {
        let total = candidates.len();
        let mut processed = 0;
        let mut found = 0;

        let mut resolutions = stream::iter(candidates.into_iter())
            .map(|candidate| {
                let resolver = self.resolver.clone();
                async move {
                    let resolution = resolver.resolve(&candidate).await;
                    (candidate, resolution)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((candidate, resolution)) = resolutions.next().await {
            processed += 1;

            match resolution {
                Ok(resolution) => {
                    debug!("{:12} - {:?}", "RESOLVED", candidate);
                    found += 1;
                    let discovery = Discovery::resolved(candidate, Method::DnsBruteforce, resolution);
                    if events_tx.send(BruteForceEvent::Found(discovery)).await.is_err() {
                        return;
                    }
                }
                Err(err) => trace!("{:12} - {}", "NOT RESOLVED", err),
            }

            if processed % PROGRESS_STEP == 0 || processed == total {
                let progress = BruteForceEvent::Progress { processed, total };
                if events_tx.send(progress).await.is_err() {
                    return;
                }
            }

            if cancel.is_cancelled() {
                info!("Cancelled after {}/{} candidates", processed, total);
                return;
            }
        }

        if total == 0 {
            let _ = events_tx
                .send(BruteForceEvent::Progress {
                    processed: 0,
                    total: 0,
                })
                .await;
        }

        info!("{:12} - {:?}", "RESOLVED", found);
    }
}
