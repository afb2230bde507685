//! Isolated job environment backed by a temp directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use regionfeat::{ExtractMode, ExtractionResult, ImageRecord, JobConfig};

pub struct TestHarness {
    temp_dir: TempDir,
    pub image_dir: PathBuf,
    pub bbox_dir: PathBuf,
    pub file_list: PathBuf,
    /// `<temp>/features/train`, so the manifest is `<temp>/features/train.txt`.
    pub output_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let image_dir = base.join("images");
        let bbox_dir = base.join("bbox");
        std::fs::create_dir_all(&image_dir).expect("Failed to create image dir");
        std::fs::create_dir_all(&bbox_dir).expect("Failed to create bbox dir");

        Self {
            file_list: base.join("train.lst"),
            output_dir: base.join("features").join("train"),
            temp_dir,
            image_dir,
            bbox_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A job config pointing at this harness, polling fast enough for tests.
    pub fn config(&self, mode: ExtractMode, devices: &[&str]) -> JobConfig {
        let mut config = JobConfig::new(&self.image_dir, &self.file_list, &self.output_dir);
        config.bbox_dir = self.bbox_dir.clone();
        config.extract_mode = mode;
        config.devices = devices.iter().map(|d| d.to_string()).collect();
        config.poll_interval_ms = 10;
        config.input.test_scale = 32;
        config.input.max_size = 64;
        config
    }

    /// Writes a solid-colour PNG to the image directory.
    pub fn write_image(&self, id: &str, width: u32, height: u32) -> PathBuf {
        let path = self.image_dir.join(id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create image subdir");
        }
        image::RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]))
            .save_with_format(&path, image::ImageFormat::Png)
            .expect("Failed to write image");
        path
    }

    /// Writes bytes that no decoder accepts under an image name.
    pub fn write_corrupt_image(&self, id: &str) -> PathBuf {
        let path = self.image_dir.join(id);
        std::fs::write(&path, b"\x00\x01 definitely not an image").expect("Failed to write");
        path
    }

    pub fn write_list(&self, ids: &[&str]) {
        let mut content = ids.join("\n");
        content.push('\n');
        std::fs::write(&self.file_list, content).expect("Failed to write image list");
    }

    /// Writes images for every id and the image list naming them.
    pub fn write_images(&self, ids: &[&str]) {
        for id in ids {
            self.write_image(id, 48, 32);
        }
        self.write_list(ids);
    }

    pub fn write_box_file(&self, id: &str, boxes: &[[f32; 4]]) -> PathBuf {
        let path = regionfeat::extract::box_file_path(&self.bbox_dir, id);
        let json = serde_json::json!({ "bbox": boxes });
        std::fs::write(&path, json.to_string()).expect("Failed to write box file");
        path
    }

    pub fn write_vocab(&self, name: &str, lines: &[&str]) -> PathBuf {
        let path = self.temp_path().join(name);
        std::fs::write(&path, lines.join("\n")).expect("Failed to write vocab");
        path
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.with_extension("txt")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.temp_path().join("features").join("train_info.json")
    }

    pub fn manifest_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.manifest_path())
            .expect("Failed to read manifest")
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn output_path(&self, id: &str) -> PathBuf {
        self.output_dir.join(ImageRecord::relative_output(id))
    }

    pub fn read_record(&self, id: &str) -> ExtractionResult {
        let raw = std::fs::read(self.output_path(id)).expect("Failed to read record");
        serde_json::from_slice(&raw).expect("Failed to parse record")
    }

    /// Output records currently in the output directory, temp files included.
    pub fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
