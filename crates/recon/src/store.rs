use crate::config::ScanOptions;
use crate::domain::scoped_hostname;
use crate::model::{
    Discovery, EnumerationJob, JobId, JobStatus, Method, ProducerOutcome, ProducerReport,
    ProgressEvent, SubdomainRecord,
};
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    New,
    Merged,
    /// Off-target hostname or terminal job.
    Rejected,
}

struct JobEntry {
    job: EnumerationJob,
    progress_tx: watch::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl JobEntry {
    fn publish(&self) {
        self.progress_tx.send_replace(self.job.progress_event());
    }
}

/// Shared map of jobs. Every mutation of a job goes through one write lock,
/// so a merge is atomic with respect to concurrent readers.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        target_domain: String,
        methods: BTreeSet<Method>,
        options: ScanOptions,
    ) -> (JobId, CancellationToken) {
        let job = EnumerationJob::new(target_domain, methods, options);
        let id = job.id;
        let cancel = CancellationToken::new();
        let (progress_tx, _) = watch::channel(job.progress_event());

        info!("{:12} - {} ({})", "JOB CREATED", id, job.target_domain);
        self.jobs.write().await.insert(
            id,
            JobEntry {
                job,
                progress_tx,
                cancel: cancel.clone(),
            },
        );

        (id, cancel)
    }

    pub async fn get(&self, id: JobId) -> Result<EnumerationJob> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        Ok(entry.job.clone())
    }

    /// Records ordered by hostname.
    pub async fn results(&self, id: JobId) -> Result<Vec<SubdomainRecord>> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        Ok(entry.job.discovered.values().cloned().collect())
    }

    pub async fn cancellation_token(&self, id: JobId) -> Result<CancellationToken> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        Ok(entry.cancel.clone())
    }

    pub async fn subscribe(&self, id: JobId) -> Result<watch::Receiver<ProgressEvent>> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        Ok(entry.progress_tx.subscribe())
    }

    // region:        --- Status

    /// Applies `next` when the state machine allows it and publishes the new
    /// state. Returns whether the job changed.
    pub async fn transition(&self, id: JobId, next: JobStatus) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        Ok(apply_transition(entry, next))
    }

    pub async fn fail(&self, id: JobId, message: impl Into<String>) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if !entry.job.status.can_become(JobStatus::Failed) {
            return Ok(false);
        }

        let message = message.into();
        warn!("{:12} - {} ({})", "JOB FAILED", id, message);
        entry.job.error_message = Some(message);
        entry.cancel.cancel();
        Ok(apply_transition(entry, JobStatus::Failed))
    }

    /// Idempotent, cancelling a terminal job changes nothing.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if !apply_transition(entry, JobStatus::Cancelled) {
            debug!("{} already {:?}", id, entry.job.status);
            return Ok(false);
        }

        entry.cancel.cancel();
        Ok(true)
    }

    // endregion:     --- Status

    // region:        --- Discoveries

    /// Inserts or unions `discovery` into the job's records.
    pub async fn merge(&self, id: JobId, discovery: Discovery) -> Result<MergeOutcome> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if entry.job.status.is_terminal() {
            return Ok(MergeOutcome::Rejected);
        }

        let Some(hostname) = scoped_hostname(&discovery.hostname, &entry.job.target_domain) else {
            debug!("{:12} - {:?}", "OFF TARGET", discovery.hostname);
            return Ok(MergeOutcome::Rejected);
        };

        let outcome = match entry.job.discovered.get_mut(&hostname) {
            Some(record) => {
                record.absorb(discovery);
                MergeOutcome::Merged
            }
            None => {
                debug!("{:12} - {:?}", "NEW", hostname);
                let mut record = SubdomainRecord::new(hostname.clone());
                record.absorb(discovery);
                entry.job.discovered.insert(hostname, record);
                MergeOutcome::New
            }
        };

        Ok(outcome)
    }

    /// Runs `update` on an existing record of a non terminal job.
    pub async fn update_record<F>(&self, id: JobId, hostname: &str, update: F) -> Result<bool>
    where
        F: FnOnce(&mut SubdomainRecord),
    {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if entry.job.status.is_terminal() {
            return Ok(false);
        }

        match entry.job.discovered.get_mut(hostname) {
            Some(record) => {
                update(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // endregion:     --- Discoveries

    // region:        --- Progress

    /// Raises the progress, a lower value than the current one is ignored.
    /// Nothing is published, see [`JobStore::publish`].
    pub async fn set_progress(
        &self,
        id: JobId,
        percentage: f32,
        current_method: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if entry.job.status.is_terminal() {
            return Ok(());
        }

        let percentage = percentage.clamp(0.0, 100.0);
        if percentage > entry.job.progress_percentage {
            entry.job.progress_percentage = percentage;
        }
        if let Some(method) = current_method {
            entry.job.current_method = Some(method.to_string());
        }
        Ok(())
    }

    pub async fn publish(&self, id: JobId) -> Result<()> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
        entry.publish();
        Ok(())
    }

    pub async fn set_producers(&self, id: JobId, producers: Vec<ProducerReport>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        entry.job.producers = producers;
        Ok(())
    }

    pub async fn update_producer(
        &self,
        id: JobId,
        name: &str,
        outcome: ProducerOutcome,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if let Some(report) = entry
            .job
            .producers
            .iter_mut()
            .find(|report| report.name == name)
        {
            report.outcome = outcome;
        }
        Ok(())
    }

    // endregion:     --- Progress
}

fn apply_transition(entry: &mut JobEntry, next: JobStatus) -> bool {
    let job = &mut entry.job;
    if !job.status.can_become(next) {
        return false;
    }

    let now = OffsetDateTime::now_utc();
    job.status = next;
    match next {
        JobStatus::Running => job.started_at = Some(now),
        JobStatus::Completed => {
            job.progress_percentage = 100.0;
            job.completed_at = Some(now);
        }
        JobStatus::Failed | JobStatus::Cancelled => job.completed_at = Some(now),
        JobStatus::Queued => {}
    }

    info!("{:12} - {} {:?}", "JOB STATUS", job.id, next);
    entry.publish();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn running_job(store: &JobStore) -> JobId {
        let (id, _) = store
            .create(
                "example.com".to_string(),
                BTreeSet::from([Method::CertificateTransparency]),
                ScanOptions::default(),
            )
            .await;
        store.transition(id, JobStatus::Running).await.unwrap();
        id
    }

    #[tokio::test]
    async fn merge_deduplicates_case_insensitively() {
        let store = JobStore::new();
        let id = running_job(&store).await;

        let first = store
            .merge(id, Discovery::new("API.example.com", Method::CertificateTransparency))
            .await
            .unwrap();
        let second = store
            .merge(id, Discovery::new("api.example.com.", Method::WebArchive))
            .await
            .unwrap();

        assert_eq!(first, MergeOutcome::New);
        assert_eq!(second, MergeOutcome::Merged);
        let results = store.results(id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].discovery_methods.len(), 2);
    }

    #[tokio::test]
    async fn merge_rejects_off_target_hostnames() {
        let store = JobStore::new();
        let id = running_job(&store).await;

        for hostname in ["example.org", "notexample.com", "example.com.evil.net"] {
            let outcome = store
                .merge(id, Discovery::new(hostname, Method::DnsAggregators))
                .await
                .unwrap();
            assert_eq!(outcome, MergeOutcome::Rejected);
        }
        assert!(store.results(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let store = JobStore::new();
        let id = running_job(&store).await;

        store.set_progress(id, 40.0, Some("web_archive")).await.unwrap();
        store.set_progress(id, 20.0, None).await.unwrap();
        store.set_progress(id, 250.0, None).await.unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.progress_percentage, 100.0);
        assert_eq!(job.current_method.as_deref(), Some("web_archive"));
    }

    #[tokio::test]
    async fn cancellation_is_idempotent() {
        let store = JobStore::new();
        let id = running_job(&store).await;
        let cancel = store.cancellation_token(id).await.unwrap();

        assert!(store.cancel(id).await.unwrap());
        assert!(!store.cancel(id).await.unwrap());
        assert!(cancel.is_cancelled());

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());

        let outcome = store
            .merge(id, Discovery::new("late.example.com", Method::WebArchive))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Rejected);
    }

    #[tokio::test]
    async fn terminal_jobs_cannot_be_cancelled() {
        let store = JobStore::new();
        let id = running_job(&store).await;
        assert!(store.transition(id, JobStatus::Completed).await.unwrap());

        assert!(!store.cancel(id).await.unwrap());
        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percentage, 100.0);
    }

    #[tokio::test]
    async fn subscribers_see_status_changes() {
        let store = JobStore::new();
        let (id, _) = store
            .create(
                "example.com".to_string(),
                BTreeSet::from([Method::DnsBruteforce]),
                ScanOptions::default(),
            )
            .await;
        let mut progress_rx = store.subscribe(id).await.unwrap();
        assert_eq!(progress_rx.borrow_and_update().status, JobStatus::Queued);

        store.transition(id, JobStatus::Running).await.unwrap();
        progress_rx.changed().await.unwrap();
        assert_eq!(progress_rx.borrow().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = JobStore::new();
        let err = store.get(JobId::new()).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }
}
