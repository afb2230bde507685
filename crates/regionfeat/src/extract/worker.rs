use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tracing::info_span;

use crate::blob::ImageBlob;
use crate::config::{DeviceSlot, JobConfig};
use crate::error::{ImageError, StorageError};
use crate::extract::boxes::{box_file_path, BoxFile};
use crate::extract::result::ExtractionResult;
use crate::manifest::ImageRecord;
use crate::model::{DetectionModel, InferenceInput};
use crate::partition::Shard;
use crate::progress::ProgressCounter;
use crate::storage::{is_published, OutputWriter};

/// What happened to one image.
#[derive(Debug)]
pub enum ImageOutcome {
    Written,
    /// Output already existed, inference skipped.
    Resumed,
    Skipped(ImageError),
}

/// Summary a worker sends when its shard is done.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub index: usize,
    pub device: String,
    pub assigned: usize,
    pub written: usize,
    pub resumed: usize,
    pub skipped: usize,
    /// Stopped early because shutdown was requested.
    pub interrupted: bool,
    /// Set when the shard was terminated by an unexpected fault.
    pub fault: Option<String>,
}

impl WorkerReport {
    pub fn new(index: usize, device: &DeviceSlot, assigned: usize) -> Self {
        Self {
            index,
            device: device.id.clone(),
            assigned,
            ..Default::default()
        }
    }

    pub fn faulted(index: usize, device: &DeviceSlot, assigned: usize, fault: String) -> Self {
        Self {
            fault: Some(fault),
            ..Self::new(index, device, assigned)
        }
    }

    /// Images counted towards progress.
    pub fn completed(&self) -> usize {
        self.written + self.resumed + self.skipped
    }
}

/// Processes one shard sequentially with a model it owns.
pub struct ExtractionWorker {
    shard: Shard,
    device: DeviceSlot,
    model: Box<dyn DetectionModel>,
    config: Arc<JobConfig>,
    progress: ProgressCounter,
    writer: OutputWriter,
    shutdown: Arc<AtomicBool>,
}

impl ExtractionWorker {
    pub fn new(
        shard: Shard,
        device: DeviceSlot,
        model: Box<dyn DetectionModel>,
        config: Arc<JobConfig>,
        progress: ProgressCounter,
    ) -> Self {
        Self {
            shard,
            device,
            model,
            config,
            progress,
            writer: OutputWriter::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::new(self.shard.index, &self.device, self.shard.len());
        info!(
            "Worker {} (device {}): {} images",
            self.shard.index,
            self.device.id,
            self.shard.len()
        );

        let records = std::mem::take(&mut self.shard.records);
        for record in &records {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.shard.index);
                report.interrupted = true;
                break;
            }

            match self.process(record) {
                Ok(ImageOutcome::Written) => report.written += 1,
                Ok(ImageOutcome::Resumed) => report.resumed += 1,
                Ok(ImageOutcome::Skipped(reason)) => {
                    warn!("Skipping {}: {}", record.source_path.display(), reason);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(
                        "Worker {} stopped at {}: {}",
                        self.shard.index, record.id, e
                    );
                    report.fault = Some(e.to_string());
                    break;
                }
            }
        }

        debug!(
            "Worker {} finished: {} written, {} resumed, {} skipped",
            report.index, report.written, report.resumed, report.skipped
        );
        report
    }

    /// Handles one record. Only storage failures are returned as errors;
    /// everything else about a bad image becomes [`ImageOutcome::Skipped`].
    pub fn process(&mut self, record: &ImageRecord) -> Result<ImageOutcome, StorageError> {
        let _span = info_span!("extract_image", worker = self.shard.index, image = %record.id)
            .entered();

        let outcome = if is_published(&record.output_path) {
            debug!("Output exists for {}, skipping", record.id);
            ImageOutcome::Resumed
        } else {
            match self.extract(record) {
                Ok(result) => {
                    self.writer.publish(&record.output_path, &result)?;
                    ImageOutcome::Written
                }
                Err(reason) => ImageOutcome::Skipped(reason),
            }
        };

        self.progress.increment();
        Ok(outcome)
    }

    fn extract(&mut self, record: &ImageRecord) -> Result<ExtractionResult, ImageError> {
        let mode = self.config.extract_mode;

        let given = if mode.uses_given_boxes() {
            let path = box_file_path(&self.config.bbox_dir, &record.id);
            Some(BoxFile::load(&path)?)
        } else {
            None
        };

        let blob = ImageBlob::load(&record.source_path, &self.config.input)?;
        let proposals = given.as_ref().map(|f| f.scaled(blob.scale));

        let input = InferenceInput {
            record,
            blob: &blob,
            mode,
            proposals: proposals.as_deref(),
            attribute_on: self.config.attribute_on,
        };
        let output = self.model.infer(&input)?;

        ExtractionResult::from_model_output(
            mode,
            output,
            &blob,
            given.as_ref().map(|f| f.bbox.as_slice()),
            &self.config.extractor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::extract::ExtractMode;
    use crate::model::ModelOutput;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct FixedModel {
        calls: Arc<AtomicUsize>,
    }

    impl DetectionModel for FixedModel {
        fn infer(&mut self, input: &InferenceInput<'_>) -> Result<ModelOutput, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let regions = input.proposals.map(|p| p.len()).unwrap_or(2);
            Ok(ModelOutput {
                boxes: vec![[0.0, 0.0, 4.0, 4.0]; regions],
                scores: vec![vec![0.1, 0.9]; regions],
                features: Some(vec![vec![0.5; 4]; regions]),
                attr_scores: None,
                objectness: Some(vec![0.7; regions]),
            })
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        config: JobConfig,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new(mode: ExtractMode) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let mut config = JobConfig::new(
                temp_dir.path().join("images"),
                temp_dir.path().join("list.txt"),
                temp_dir.path().join("out/train"),
            );
            config.bbox_dir = temp_dir.path().join("bbox");
            config.extract_mode = mode;
            config.extractor.min_boxes = 1;
            std::fs::create_dir_all(&config.image_dir).unwrap();
            Self {
                temp_dir,
                config,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn image(&self, id: &str) -> ImageRecord {
            let source_path = self.config.image_dir.join(id);
            image::RgbImage::new(8, 6).save(&source_path).unwrap();
            self.record(id, source_path)
        }

        fn corrupt_image(&self, id: &str) -> ImageRecord {
            let source_path = self.config.image_dir.join(id);
            std::fs::write(&source_path, b"garbage").unwrap();
            self.record(id, source_path)
        }

        fn record(&self, id: &str, source_path: PathBuf) -> ImageRecord {
            ImageRecord {
                id: id.to_string(),
                source_path,
                output_path: self.config.output_dir.join(ImageRecord::relative_output(id)),
            }
        }

        fn worker(&self, records: Vec<ImageRecord>, progress: &ProgressCounter) -> ExtractionWorker {
            let device = DeviceSlot {
                index: 0,
                id: "0".to_string(),
            };
            let model = Box::new(FixedModel {
                calls: Arc::clone(&self.calls),
            });
            ExtractionWorker::new(
                Shard { index: 0, records },
                device,
                model,
                Arc::new(self.config.clone()),
                progress.clone(),
            )
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn path(&self) -> &Path {
            self.temp_dir.path()
        }
    }

    #[test]
    fn test_writes_records_and_counts_progress() {
        let fixture = Fixture::new(ExtractMode::RoiFeats);
        let records = vec![fixture.image("a.png"), fixture.image("b.png")];
        let progress = ProgressCounter::new(2);

        let report = fixture.worker(records.clone(), &progress).run();

        assert_eq!(report.written, 2);
        assert_eq!(report.completed(), 2);
        assert!(report.fault.is_none());
        assert_eq!(progress.snapshot().done, 2);
        assert_eq!(fixture.calls(), 2);

        let raw = std::fs::read(&records[0].output_path).unwrap();
        let result: ExtractionResult = serde_json::from_slice(&raw).unwrap();
        assert_eq!(result.mode(), ExtractMode::RoiFeats);
    }

    #[test]
    fn test_existing_output_is_resumed() {
        let fixture = Fixture::new(ExtractMode::Bboxes);
        let records = vec![fixture.image("a.png"), fixture.image("b.png")];
        std::fs::create_dir_all(&fixture.config.output_dir).unwrap();
        std::fs::write(&records[0].output_path, b"{}").unwrap();
        let progress = ProgressCounter::new(2);

        let report = fixture.worker(records.clone(), &progress).run();

        assert_eq!(report.resumed, 1);
        assert_eq!(report.written, 1);
        assert_eq!(fixture.calls(), 1);
        assert_eq!(progress.snapshot().done, 2);
        // Resumed output untouched
        assert_eq!(std::fs::read(&records[0].output_path).unwrap(), b"{}");
    }

    #[test]
    fn test_corrupt_image_is_skipped() {
        let fixture = Fixture::new(ExtractMode::RoiFeats);
        let records = vec![
            fixture.image("a.png"),
            fixture.corrupt_image("b.jpg"),
            fixture.image("c.png"),
        ];
        let progress = ProgressCounter::new(3);

        let report = fixture.worker(records.clone(), &progress).run();

        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(progress.snapshot().done, 3);
        assert!(records[0].output_path.exists());
        assert!(!records[1].output_path.exists());
        assert!(records[2].output_path.exists());
    }

    #[test]
    fn test_missing_box_file_is_skipped() {
        let fixture = Fixture::new(ExtractMode::BboxFeats);
        let records = vec![fixture.image("a.png"), fixture.image("b.png")];
        let bbox_dir = &fixture.config.bbox_dir;
        std::fs::create_dir_all(bbox_dir).unwrap();
        std::fs::write(
            bbox_dir.join("a.json"),
            r#"{"bbox": [[0, 0, 2, 2], [1, 1, 3, 3], [2, 2, 4, 4]]}"#,
        )
        .unwrap();
        let progress = ProgressCounter::new(2);

        let report = fixture.worker(records.clone(), &progress).run();

        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(fixture.calls(), 1);
        assert_eq!(progress.snapshot().done, 2);

        let raw = std::fs::read(&records[0].output_path).unwrap();
        match serde_json::from_slice::<ExtractionResult>(&raw).unwrap() {
            ExtractionResult::BboxFeats(r) => {
                assert_eq!(r.num_bbox, 3);
                assert_eq!(r.boxes[1], [1.0, 1.0, 3.0, 3.0]);
            }
            other => panic!("Expected BboxFeats, got {:?}", other),
        }
    }

    #[test]
    fn test_storage_failure_faults_the_shard() {
        let fixture = Fixture::new(ExtractMode::RoiFeats);
        let records = vec![fixture.image("a.png"), fixture.image("b.png")];
        // A regular file where the output directory should be
        std::fs::create_dir_all(fixture.path().join("out")).unwrap();
        std::fs::write(&fixture.config.output_dir, b"in the way").unwrap();
        let progress = ProgressCounter::new(2);

        let report = fixture.worker(records, &progress).run();

        assert!(report.fault.is_some());
        assert_eq!(report.completed(), 0);
        assert_eq!(progress.snapshot().done, 0);
    }

    #[test]
    fn test_shutdown_stops_before_next_image() {
        let fixture = Fixture::new(ExtractMode::RoiFeats);
        let records = vec![fixture.image("a.png")];
        let progress = ProgressCounter::new(1);

        let report = fixture
            .worker(records, &progress)
            .with_shutdown(Arc::new(AtomicBool::new(true)))
            .run();

        assert!(report.interrupted);
        assert_eq!(report.completed(), 0);
        assert_eq!(fixture.calls(), 0);
    }
}
