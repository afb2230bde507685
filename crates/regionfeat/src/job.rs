use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::{validate_config, DeviceSlot, JobConfig};
use crate::error::{JobError, RegionFeatError};
use crate::extract::{ExtractionWorker, WorkerReport};
use crate::manifest::{Manifest, ManifestBuilder};
use crate::model::ModelProvider;
use crate::partition::{partition, Shard};
use crate::progress::{LogProgress, ProgressCounter, ProgressMonitor, ProgressReporter};
use crate::storage::OutputWriter;

/// Outcome of a finished (or interrupted) job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub total: usize,
    pub written: usize,
    pub resumed: usize,
    pub skipped: usize,
    pub interrupted: bool,
    pub faulted_workers: usize,
    /// Listed images with no published output after the run.
    pub missing: usize,
    pub workers: Vec<WorkerReport>,
}

impl JobReport {
    fn from_workers(manifest: &Manifest, workers: Vec<WorkerReport>) -> Self {
        Self {
            total: manifest.len(),
            written: workers.iter().map(|w| w.written).sum(),
            resumed: workers.iter().map(|w| w.resumed).sum(),
            skipped: workers.iter().map(|w| w.skipped).sum(),
            interrupted: workers.iter().any(|w| w.interrupted),
            faulted_workers: workers.iter().filter(|w| w.fault.is_some()).count(),
            missing: manifest.missing_outputs(),
            workers,
        }
    }

    /// Every worker ran its shard to the end.
    pub fn is_success(&self) -> bool {
        self.faulted_workers == 0 && !self.interrupted
    }
}

/// One extraction run: builds the manifest, fans the images out over one
/// worker thread per device slot and waits for all of them.
pub struct ExtractionJob {
    config: Arc<JobConfig>,
    provider: Arc<dyn ModelProvider>,
    reporter: Arc<dyn ProgressReporter>,
    shutdown: Arc<AtomicBool>,
    writer: OutputWriter,
}

impl ExtractionJob {
    pub fn new(config: JobConfig, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            reporter: Arc::new(LogProgress),
            shutdown: Arc::new(AtomicBool::new(false)),
            writer: OutputWriter::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Workers stop before their next image once `flag` is set.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn run(&self) -> Result<JobReport, RegionFeatError> {
        validate_config(&self.config)?;

        let slots = self.config.device_slots();
        if slots.is_empty() {
            return Err(JobError::NoDevices.into());
        }

        let manifest = ManifestBuilder::new(&self.config).build()?;
        manifest.persist(&self.writer)?;

        let shards = partition(&manifest.records, slots.len())?;
        let counter = ProgressCounter::new(manifest.len());

        info!(
            "Extracting {} images ({}) on {} device(s)",
            manifest.len(),
            self.config.extract_mode,
            slots.len()
        );

        let (report_tx, report_rx) = unbounded::<WorkerReport>();
        let mut handles = Vec::with_capacity(shards.len());
        let mut assigned = Vec::with_capacity(shards.len());

        for (shard, slot) in shards.into_iter().zip(slots) {
            assigned.push((shard.index, slot.clone(), shard.len()));
            match self.spawn_worker(shard, slot, counter.clone(), report_tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.shutdown.store(true, Ordering::Relaxed);
                    drop(report_tx);
                    join_all(handles);
                    return Err(e.into());
                }
            }
        }
        drop(report_tx);

        let monitor = ProgressMonitor::new(
            counter,
            Duration::from_millis(self.config.poll_interval_ms),
        );
        let mut received = monitor.run(&report_rx, handles.len(), self.reporter.as_ref());

        join_all(handles);

        // A worker that panicked never reported
        for (index, slot, len) in assigned {
            if !received.iter().any(|r| r.index == index) {
                received.push(WorkerReport::faulted(
                    index,
                    &slot,
                    len,
                    "worker panicked".to_string(),
                ));
            }
        }
        received.sort_by_key(|r| r.index);

        let report = JobReport::from_workers(&manifest, received);
        if report.is_success() {
            info!(
                "Job complete: {} written, {} resumed, {} skipped, {} missing",
                report.written, report.resumed, report.skipped, report.missing
            );
        } else {
            warn!(
                "Job incomplete: {} worker(s) faulted, interrupted: {}, {} missing",
                report.faulted_workers, report.interrupted, report.missing
            );
        }

        Ok(report)
    }

    fn spawn_worker(
        &self,
        shard: Shard,
        slot: DeviceSlot,
        counter: ProgressCounter,
        report_tx: Sender<WorkerReport>,
    ) -> Result<JoinHandle<()>, JobError> {
        let config = Arc::clone(&self.config);
        let provider = Arc::clone(&self.provider);
        let shutdown = Arc::clone(&self.shutdown);

        thread::Builder::new()
            .name(format!("extract-{}", shard.index))
            .spawn(move || {
                let report = run_shard(shard, slot, provider.as_ref(), config, counter, shutdown);
                if report_tx.send(report).is_err() {
                    debug!("Report receiver dropped");
                }
            })
            .map_err(|e| JobError::SpawnFailed(e.to_string()))
    }
}

fn run_shard(
    shard: Shard,
    slot: DeviceSlot,
    provider: &dyn ModelProvider,
    config: Arc<JobConfig>,
    counter: ProgressCounter,
    shutdown: Arc<AtomicBool>,
) -> WorkerReport {
    if shard.is_empty() {
        debug!("Worker {} has no images", shard.index);
        return WorkerReport::new(shard.index, &slot, 0);
    }

    let model = match provider.load(&slot) {
        Ok(model) => model,
        Err(e) => {
            error!(
                "Worker {} failed to load model on device {}: {}",
                shard.index, slot.id, e
            );
            return WorkerReport::faulted(shard.index, &slot, shard.len(), e.to_string());
        }
    };

    ExtractionWorker::new(shard, slot, model, config, counter)
        .with_shutdown(shutdown)
        .run()
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if let Err(e) = handle.join() {
            error!("Thread {} panicked: {:?}", name, e);
        } else {
            debug!("Thread {} finished", name);
        }
    }
}
