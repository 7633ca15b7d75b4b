use crate::error::ScanError;
use crate::resource::ResourceRef;
use crate::result::{Report, ResourceError, ScanResult, ServiceFailure};
use crate::scanner::{ScannerProvider, ServiceScanner};
use std::sync::Arc;
use tagwarden_policy::{Policy, TagCriteria};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// List and apply exclusions, but fetch no tags.
    pub dry_run: bool,
    /// Record a service whose listing fails in `Report::failures` and keep
    /// scanning the others, instead of failing the run.
    pub continue_on_service_failure: bool,
}

enum Outcome {
    Scanned(ScanResult),
    Failed(ResourceError),
}

struct ServiceOutcome {
    resource_type: String,
    discovered: usize,
    excluded: usize,
    results: Vec<ScanResult>,
    errors: Vec<ResourceError>,
}

/// Runs every enabled service of a policy through its scanner.
pub struct Orchestrator {
    policy: Arc<Policy>,
    provider: Arc<dyn ScannerProvider>,
}

impl Orchestrator {
    pub fn new(policy: Arc<Policy>, provider: Arc<dyn ScannerProvider>) -> Self { Self { policy, provider } }

    pub fn policy(&self) -> &Policy { &self.policy }

    /// Scans all enabled services concurrently. Per-resource failures end up
    /// in `Report::errors`; only scanner setup and listing failures are
    /// returned as errors. On cancellation the partial report comes back with
    /// `cancelled` set.
    pub async fn scan(&self, options: ScanOptions, cancel: CancellationToken) -> Result<Report, ScanError> {
        let mut report = Report { dry_run: options.dry_run, ..Report::default() };
        if !self.policy.global.enabled {
            warn!("scanning is globally disabled by the policy");
            return Ok(report);
        }

        let mut scanners = Vec::new();
        for (key, _) in self.policy.enabled_services() {
            match self.provider.scanner(key).await {
                Ok(scanner) => scanners.push(scanner),
                Err(err) => record_failure(&mut report, err, options)?,
            }
        }
        info!(services = scanners.len(), dry_run = options.dry_run, "scan started");

        let mut services = JoinSet::new();
        for scanner in scanners {
            let span = info_span!("scan_service", resource_type = scanner.resource_type());
            services.spawn(scan_service(self.policy.clone(), scanner, options.dry_run, cancel.clone()).instrument(span));
        }
        while let Some(joined) = services.join_next().await {
            match joined? {
                Ok(outcome) => {
                    *report.discovered.entry(outcome.resource_type.clone()).or_default() += outcome.discovered;
                    *report.excluded.entry(outcome.resource_type).or_default() += outcome.excluded;
                    report.results.extend(outcome.results);
                    report.errors.extend(outcome.errors);
                }
                Err(err) => {
                    if let Err(err) = record_failure(&mut report, err, options) {
                        services.abort_all();
                        return Err(err);
                    }
                }
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.sort();
        info!(
            results = report.results.len(),
            errors = report.errors.len(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "scan finished"
        );
        Ok(report)
    }
}

fn record_failure(report: &mut Report, err: ScanError, options: ScanOptions) -> Result<(), ScanError> {
    error!(error = %err, "service scan failed");
    match err.service_failure() {
        Some((service, cause)) if options.continue_on_service_failure => {
            report.failures.push(ServiceFailure { service: service.to_string(), cause: cause.to_string() });
            Ok(())
        }
        _ => Err(err),
    }
}

async fn scan_service(
    policy: Arc<Policy>,
    scanner: Arc<dyn ServiceScanner>,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<ServiceOutcome, ScanError> {
    let key = scanner.service_key().to_string();
    let resource_type = scanner.resource_type().to_string();
    let mut outcome =
        ServiceOutcome { resource_type: resource_type.clone(), discovered: 0, excluded: 0, results: Vec::new(), errors: Vec::new() };

    let listed = tokio::select! {
        _ = cancel.cancelled() => return Ok(outcome),
        listed = scanner.list() => listed,
    };
    let listed = listed.map_err(|err| ScanError::Listing { service: key.clone(), cause: format!("{err:#}") })?;

    let mut candidates = Vec::with_capacity(listed.len());
    for candidate in listed {
        if let Some(ex) = policy.is_excluded(&key, &candidate.id) {
            debug!(resource_id = %candidate.id, reason = %ex.reason, pattern = ex.pattern.as_str(), "resource excluded");
            outcome.excluded += 1;
            continue;
        }
        candidates.push(candidate);
    }
    outcome.discovered = candidates.len();
    let batch_size = policy.batch_size(&key, scanner.default_batch_size());
    info!(candidates = candidates.len(), excluded = outcome.excluded, batch_size, "resources listed");
    if dry_run {
        return Ok(outcome);
    }

    let criteria = Arc::new(policy.effective_criteria(&key));
    let (tx, mut rx) = mpsc::channel::<Outcome>(1);
    let aggregator = tokio::spawn(async move {
        let (mut results, mut errors) = (Vec::new(), Vec::new());
        while let Some(next) = rx.recv().await {
            match next {
                Outcome::Scanned(r) => results.push(r),
                Outcome::Failed(e) => errors.push(e),
            }
        }
        (results, errors)
    });

    let slots = Arc::new(Semaphore::new(batch_size));
    let mut workers = JoinSet::new();
    for candidate in candidates {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = slots.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else { break };
        let worker = Worker {
            policy: policy.clone(),
            scanner: scanner.clone(),
            criteria: criteria.clone(),
            resource_type: resource_type.clone(),
            tx: tx.clone(),
            cancel: cancel.clone(),
        };
        workers.spawn(
            async move {
                worker.run(candidate).await;
                drop(permit);
            }
            .in_current_span(),
        );
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        joined?;
    }
    let (results, errors) = aggregator.await?;
    outcome.results = results;
    outcome.errors = errors;
    Ok(outcome)
}

struct Worker {
    policy: Arc<Policy>,
    scanner: Arc<dyn ServiceScanner>,
    criteria: Arc<TagCriteria>,
    resource_type: String,
    tx: mpsc::Sender<Outcome>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, candidate: ResourceRef) {
        if self.cancel.is_cancelled() {
            return;
        }
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return,
            fetched = self.scanner.fetch(&candidate) => fetched,
        };
        let outcome = match fetched {
            Ok(resource) => {
                let result = resource.scan(&self.criteria, &self.policy);
                debug!(resource_id = result.resource_id(), issues = result.issues().len(), "resource scanned");
                Outcome::Scanned(result)
            }
            Err(err) => {
                warn!(resource_id = %candidate.id, error = %format!("{err:#}"), "tag fetch failed");
                Outcome::Failed(ResourceError {
                    resource_type: self.resource_type.clone(),
                    resource_id: candidate.id.clone(),
                    cause: format!("{err:#}"),
                })
            }
        };
        // The aggregator only stops once every sender is gone.
        let _ = self.tx.send(outcome).await;
    }
}
