use crate::bruteforce::{
    default_wordlist, load_wordlist, BruteForceEvent, BruteForcer, ResolveStrategy,
};
use crate::config::ScanOptions;
use crate::diff::{diff_results, ResultDiff};
use crate::dns::{DnsResolver, Resolver};
use crate::domain::validate_target;
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::model::{
    Discovery, EnumerationJob, JobId, JobStatus, Method, ProducerOutcome, ProducerReport,
    ProgressEvent, SubdomainRecord,
};
use crate::sources::{PassiveSource, SourceRegistry};
use crate::store::{JobStore, MergeOutcome};
use crate::takeover;
use crate::{Error, Result};
use futures::{stream, Stream, StreamExt};
use reqwest::Client;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// region:        --- Constants

const PRODUCERS_QUEUE_CAPACITY: usize = 1024;
const PUBLISH_INTERVAL_MS: u64 = 250;
const FINGERPRINT_CONCURRENCY: usize = 20;

// share of the whole job
const DISCOVERY_PHASE: f32 = 90.0;
const RESOLVE_PHASE_END: f32 = 94.0;
const TAKEOVER_PHASE_END: f32 = 95.0;

// share of the discovery phase when both kinds of producers run
const BRUTEFORCE_WEIGHT: f32 = 0.7;
const PASSIVE_WEIGHT: f32 = 0.3;

const BRUTEFORCE_PRODUCER: &str = "dns_bruteforce";

// endregion:     --- Constants

/// What producers send to the orchestrator loop.
#[derive(Debug)]
enum ProducerMessage {
    Found(Discovery),
    BruteForceProgress { processed: usize, total: usize },
    Finished { name: String, outcome: ProducerOutcome },
}

/// Turns producer completion into the 0-90 discovery share.
#[derive(Debug, Clone, Default)]
struct DiscoveryProgress {
    passive_total: usize,
    passive_done: usize,
    bruteforce: bool,
    bruteforce_fraction: f32,
}

impl DiscoveryProgress {
    fn percentage(&self) -> f32 {
        let passive = if self.passive_total == 0 {
            0.0
        } else {
            self.passive_done as f32 / self.passive_total as f32
        };

        let phase = match (self.bruteforce, self.passive_total > 0) {
            (true, true) => BRUTEFORCE_WEIGHT * self.bruteforce_fraction + PASSIVE_WEIGHT * passive,
            (true, false) => self.bruteforce_fraction,
            (false, _) => passive,
        };

        phase.clamp(0.0, 1.0) * DISCOVERY_PHASE
    }
}

/// Runs enumeration jobs and answers queries about them.
#[derive(Clone)]
pub struct Orchestrator {
    store: JobStore,
    sources: SourceRegistry,
    resolver: Option<Arc<dyn Resolver>>,
    strategy: ResolveStrategy,
}

// region:        --- Constructors

impl Orchestrator {
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            sources: SourceRegistry::default(),
            resolver: None,
            strategy: ResolveStrategy::Native,
        }
    }

    /// Uses `resolver` for every job instead of one built from the job options.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = sources;
        self
    }

    /// Probes `binary` once and keeps the external strategy when it answers.
    pub async fn detect_external_resolver(mut self, binary: &Path) -> Self {
        self.strategy = ResolveStrategy::detect(binary).await;
        info!("{:12} - {:?}", "STRATEGY", self.strategy);
        self
    }
}

// endregion:     --- Constructors

// region:        --- Operations

impl Orchestrator {
    /// Validates the request, creates the job and dispatches it.
    pub async fn submit_job(
        &self,
        domain: &str,
        methods: impl IntoIterator<Item = Method>,
        options: ScanOptions,
    ) -> Result<JobId> {
        let target = validate_target(domain)?;
        let methods: BTreeSet<Method> = methods.into_iter().collect();
        if methods.is_empty() {
            return Err(Error::InvalidRequest("no method selected".to_string()));
        }

        let options = options.clamped();
        let runnable = methods.contains(&Method::DnsBruteforce)
            || !self.sources.select(&methods, &options).is_empty();
        if !runnable {
            return Err(Error::InvalidRequest(
                "no source left for the selected methods".to_string(),
            ));
        }

        let (id, _) = self.store.create(target, methods, options).await;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.start(id).await {
                error!("Job {} not dispatched: {}", id, err);
            }
        });

        Ok(id)
    }

    /// Moves a queued job to running and drives it until it is terminal.
    #[instrument(name = "job", level = "info", skip_all, fields(id = %id))]
    pub async fn start(&self, id: JobId) -> Result<()> {
        if !self.store.transition(id, JobStatus::Running).await? {
            info!("Not queued anymore, skipped");
            return Ok(());
        }

        let job = self.store.get(id).await?;
        let cancel = self.store.cancellation_token(id).await?;

        match self.run(&job, &cancel).await {
            Ok(()) if cancel.is_cancelled() => info!("Stopped by cancellation"),
            Ok(()) => {
                self.store.transition(id, JobStatus::Completed).await?;
            }
            Err(err) => {
                self.store.fail(id, err.to_string()).await?;
            }
        }

        Ok(())
    }

    pub async fn get_job(&self, id: JobId) -> Result<EnumerationJob> {
        self.store.get(id).await
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<()> {
        if self.store.cancel(id).await? {
            info!("{:12} - {}", "CANCELLED", id);
        }
        Ok(())
    }

    /// Latest snapshot first, then every published change, ending after the
    /// terminal event.
    pub async fn stream_progress(
        &self,
        id: JobId,
    ) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static> {
        let progress_rx = self.store.subscribe(id).await?;

        Ok(stream::unfold(
            (progress_rx, true, false),
            |(mut progress_rx, first, done)| async move {
                if done {
                    return None;
                }
                if !first && progress_rx.changed().await.is_err() {
                    return None;
                }

                let event = progress_rx.borrow_and_update().clone();
                let done = event.status.is_terminal();
                Some((event, (progress_rx, false, done)))
            },
        ))
    }

    pub async fn get_results(&self, id: JobId) -> Result<Vec<SubdomainRecord>> {
        self.store.results(id).await
    }

    pub async fn compare_jobs(&self, previous: JobId, current: JobId) -> Result<ResultDiff> {
        let previous = self.store.results(previous).await?;
        let current = self.store.results(current).await?;
        Ok(diff_results(&previous, &current))
    }
}

// endregion:     --- Operations

// region:        --- Job pipeline

impl Orchestrator {
    async fn run(&self, job: &EnumerationJob, cancel: &CancellationToken) -> Result<()> {
        let http_client = Client::builder()
            .timeout(job.options.http_timeout())
            .build()?;
        debug!("HTTP Client created: {:?}", http_client);

        let resolver = match &self.resolver {
            Some(resolver) => resolver.clone(),
            None => DnsResolver::shared(job.options.dns_timeout(), &job.options.nameservers),
        };

        self.discover(job, &http_client, resolver.clone(), cancel)
            .await?;
        if cancel.is_cancelled() {
            return Ok(());
        }

        self.enrich(job, resolver, cancel).await
    }

    #[instrument(name = "discovery", level = "info", skip_all)]
    async fn discover(
        &self,
        job: &EnumerationJob,
        http_client: &Client,
        resolver: Arc<dyn Resolver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let passive = self.sources.select(&job.methods, &job.options);
        let words = if job.methods.contains(&Method::DnsBruteforce) {
            let words = match job.options.wordlist.clone() {
                Some(path) => tokio::task::spawn_blocking(move || load_wordlist(&path))
                    .await
                    .map_err(|err| Error::Orchestration(format!("wordlist loading: {}", err)))??,
                None => default_wordlist(),
            };
            Some(words)
        } else {
            None
        };

        let mut producers: Vec<ProducerReport> = passive
            .iter()
            .map(|source| ProducerReport {
                name: source.id().to_string(),
                method: source.id().method(),
                outcome: ProducerOutcome::Pending,
            })
            .collect();
        if words.is_some() {
            producers.push(ProducerReport {
                name: BRUTEFORCE_PRODUCER.to_string(),
                method: Method::DnsBruteforce,
                outcome: ProducerOutcome::Pending,
            });
        }
        info!("{:12} - {:?}", "PRODUCERS", producers.len());
        self.store.set_producers(job.id, producers).await?;

        let mut progress = DiscoveryProgress {
            passive_total: passive.len(),
            bruteforce: words.is_some(),
            ..Default::default()
        };

        // launch producers
        let (producers_tx, mut producers_rx) = mpsc::channel(PRODUCERS_QUEUE_CAPACITY);
        let mut tasks = JoinSet::new();
        for source in passive {
            tasks.spawn(run_source(
                source,
                http_client.clone(),
                job.target_domain.clone(),
                producers_tx.clone(),
                cancel.clone(),
            ));
        }
        if let Some(words) = words {
            let strategy = match &self.strategy {
                ResolveStrategy::External(external) if job.options.external_resolver => {
                    ResolveStrategy::External(external.clone().with_settings(
                        job.options.threads,
                        job.options.dns_timeout(),
                        &job.options.nameservers,
                    ))
                }
                _ => ResolveStrategy::Native,
            };
            let brute_forcer = BruteForcer::new(resolver, strategy, job.options.threads);
            tasks.spawn(run_bruteforce(
                brute_forcer,
                job.target_domain.clone(),
                words,
                producers_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(producers_tx);

        // control loop, the only writer during discovery
        let mut last_publish = Instant::now();
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Ok(());
                }
                message = producers_rx.recv() => message,
            };
            let Some(message) = message else {
                break;
            };

            match message {
                ProducerMessage::Found(discovery) => {
                    let method = discovery.method;
                    if self.store.merge(job.id, discovery).await? == MergeOutcome::New {
                        self.store
                            .set_progress(job.id, progress.percentage(), Some(method.as_str()))
                            .await?;
                        self.publish_throttled(job.id, &mut last_publish).await?;
                    }
                }
                ProducerMessage::BruteForceProgress { processed, total } => {
                    progress.bruteforce_fraction = if total == 0 {
                        1.0
                    } else {
                        processed as f32 / total as f32
                    };
                    self.store
                        .set_progress(job.id, progress.percentage(), Some(BRUTEFORCE_PRODUCER))
                        .await?;
                    self.publish_throttled(job.id, &mut last_publish).await?;
                }
                ProducerMessage::Finished { name, outcome } => {
                    info!("{:12} - {} {:?}", "PRODUCER", name, outcome);
                    if name == BRUTEFORCE_PRODUCER {
                        progress.bruteforce_fraction = 1.0;
                    } else {
                        progress.passive_done += 1;
                    }
                    self.store.update_producer(job.id, &name, outcome).await?;
                    self.store
                        .set_progress(job.id, progress.percentage(), Some(name.as_str()))
                        .await?;
                    self.store.publish(job.id).await?;
                    last_publish = Instant::now();
                }
            }
        }

        // every sender is gone, surface panicked producers
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    return Err(Error::Orchestration(format!("producer panicked: {}", err)));
                }
            }
        }

        self.store
            .set_progress(job.id, DISCOVERY_PHASE, None)
            .await?;
        self.store.publish(job.id).await
    }

    #[instrument(name = "enrichment", level = "info", skip_all)]
    async fn enrich(
        &self,
        job: &EnumerationJob,
        resolver: Arc<dyn Resolver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.store
            .set_progress(job.id, DISCOVERY_PHASE, Some("enrichment"))
            .await?;
        self.store.publish(job.id).await?;

        // resolve passive finds
        let unresolved: Vec<String> = self
            .store
            .results(job.id)
            .await?
            .into_iter()
            .filter(|record| !record.is_resolved())
            .map(|record| record.hostname)
            .collect();
        info!("{:12} - {:?}", "TO RESOLVE", unresolved.len());

        let mut resolutions = stream::iter(unresolved.into_iter())
            .map(|hostname| {
                let resolver = resolver.clone();
                async move {
                    let resolution = resolver.resolve_with_dangling(&hostname).await;
                    (hostname, resolution)
                }
            })
            .buffer_unordered(job.options.threads);

        while let Some((hostname, resolution)) = resolutions.next().await {
            match resolution {
                Ok(resolution) => {
                    self.store
                        .update_record(job.id, &hostname, |record| {
                            record.absorb_resolution(resolution)
                        })
                        .await?;
                }
                Err(err) => debug!("{}", err),
            }
            if cancel.is_cancelled() {
                return Ok(());
            }
        }
        self.store
            .set_progress(job.id, RESOLVE_PHASE_END, Some("resolution"))
            .await?;

        // takeover
        if job.options.enable_takeover {
            for record in self.store.results(job.id).await? {
                let Some(cname) = record.cname.as_deref() else {
                    continue;
                };
                if !takeover::check(&record.hostname, Some(cname)) {
                    continue;
                }

                let service = takeover::matching_signature(cname).map(|sig| sig.service.to_string());
                let confidence = takeover::cname_confidence(record.is_live());
                warn!(
                    "{:12} - {} -> {} ({:?}, {:?})",
                    "TAKEOVER", record.hostname, cname, service, confidence
                );
                self.store
                    .update_record(job.id, &record.hostname, |record| {
                        record.takeover_vulnerable = true;
                        record.takeover_service = service;
                        record.takeover_confidence = Some(confidence);
                    })
                    .await?;
            }
        }
        self.store
            .set_progress(job.id, TAKEOVER_PHASE_END, Some("takeover"))
            .await?;
        self.store.publish(job.id).await?;
        if cancel.is_cancelled() {
            return Ok(());
        }

        // fingerprint
        if job.options.enable_fingerprint {
            self.fingerprint(job, cancel).await?;
        }

        Ok(())
    }

    async fn fingerprint(&self, job: &EnumerationJob, cancel: &CancellationToken) -> Result<()> {
        let fingerprinter = Fingerprinter::new(job.options.http_timeout())?;
        let live: Vec<String> = self
            .store
            .results(job.id)
            .await?
            .into_iter()
            .filter(|record| record.is_live())
            .map(|record| record.hostname)
            .collect();
        info!("{:12} - {:?}", "TO PROBE", live.len());

        let total = live.len();
        let fingerprinter = &fingerprinter;
        let mut probes = stream::iter(live.into_iter())
            .map(|hostname| async move {
                let fingerprint = fingerprinter.probe(&hostname).await;
                (hostname, fingerprint)
            })
            .buffer_unordered(job.options.threads.min(FINGERPRINT_CONCURRENCY));

        let mut processed = 0;
        let mut last_publish = Instant::now();
        while let Some((hostname, fingerprint)) = probes.next().await {
            processed += 1;
            self.store
                .update_record(job.id, &hostname, |record| {
                    apply_fingerprint(record, &fingerprint)
                })
                .await?;

            let percentage =
                TAKEOVER_PHASE_END + (100.0 - TAKEOVER_PHASE_END) * processed as f32 / total as f32;
            self.store
                .set_progress(job.id, percentage.min(99.9), Some("fingerprint"))
                .await?;
            self.publish_throttled(job.id, &mut last_publish).await?;

            if cancel.is_cancelled() {
                return Ok(());
            }
        }

        Ok(())
    }

    async fn publish_throttled(&self, id: JobId, last_publish: &mut Instant) -> Result<()> {
        if last_publish.elapsed() >= Duration::from_millis(PUBLISH_INTERVAL_MS) {
            self.store.publish(id).await?;
            *last_publish = Instant::now();
        }
        Ok(())
    }
}

/// Most recent probe wins. A takeover flag is graded up when the answer is
/// the unclaimed page of the matched service.
fn apply_fingerprint(record: &mut SubdomainRecord, fingerprint: &Fingerprint) {
    if fingerprint.http_status.is_some() {
        record.http_status = fingerprint.http_status;
    }
    if let Some(technology) = fingerprint.technology() {
        record.technology = Some(technology);
    }

    if record.takeover_vulnerable {
        let confirmed = record
            .cname
            .as_deref()
            .and_then(takeover::matching_signature)
            .and_then(|signature| {
                takeover::response_confidence(signature, fingerprint.http_status, &fingerprint.body)
            });
        if confirmed > record.takeover_confidence {
            record.takeover_confidence = confirmed;
        }
    }
}

// endregion:     --- Job pipeline

// region:        --- Producers

#[instrument(name = "source", level = "info", skip_all, fields(source = %source.id()))]
async fn run_source(
    source: Arc<dyn PassiveSource>,
    http_client: Client,
    domain: String,
    producers_tx: mpsc::Sender<ProducerMessage>,
    cancel: CancellationToken,
) {
    let name = source.id().to_string();
    let method = source.id().method();

    let queried = tokio::select! {
        _ = cancel.cancelled() => return,
        queried = source.query(&http_client, &domain) => queried,
    };

    let outcome = match queried {
        Ok(hostnames) => {
            let found = hostnames.len();
            for hostname in hostnames {
                let discovery = Discovery::new(hostname, method);
                if producers_tx
                    .send(ProducerMessage::Found(discovery))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            ProducerOutcome::Succeeded { found }
        }
        Err(err) => {
            warn!("{}: {}", source.name(), err);
            ProducerOutcome::Failed {
                reason: err.to_string(),
            }
        }
    };

    let _ = producers_tx
        .send(ProducerMessage::Finished { name, outcome })
        .await;
}

async fn run_bruteforce(
    brute_forcer: BruteForcer,
    domain: String,
    words: Vec<String>,
    producers_tx: mpsc::Sender<ProducerMessage>,
    cancel: CancellationToken,
) {
    let (mut events, resolving) = brute_forcer.bruteforce(&domain, &words, cancel.clone());
    // a fallback run may report hostnames again
    let mut found = HashSet::new();

    while let Some(event) = events.next().await {
        let message = match event {
            BruteForceEvent::Found(discovery) => {
                found.insert(discovery.hostname.clone());
                ProducerMessage::Found(discovery)
            }
            BruteForceEvent::Progress { processed, total } => {
                ProducerMessage::BruteForceProgress { processed, total }
            }
        };
        if producers_tx.send(message).await.is_err() {
            return;
        }
    }

    // the stream also ends when resolving panicked, surface it to the join set
    if let Err(err) = resolving.await {
        if err.is_panic() {
            std::panic::resume_unwind(err.into_panic());
        }
    }

    if cancel.is_cancelled() {
        return;
    }
    let _ = producers_tx
        .send(ProducerMessage::Finished {
            name: BRUTEFORCE_PRODUCER.to_string(),
            outcome: ProducerOutcome::Succeeded { found: found.len() },
        })
        .await;
}

// endregion:     --- Producers
