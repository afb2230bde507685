//! In-process detection backend for tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use regionfeat::{
    DetectionModel, DeviceSlot, InferenceInput, ModelError, ModelOutput, ModelProvider,
};

/// Regions returned per image when no proposals are given.
pub const REGIONS: usize = 12;
pub const FEATURE_DIM: usize = 8;

#[derive(Default)]
struct Counters {
    calls: AtomicUsize,
    loads: AtomicUsize,
    devices: Mutex<Vec<String>>,
    seen: Mutex<Vec<String>>,
}

/// Returns deterministic outputs and records every call.
#[derive(Clone, Default)]
pub struct MockProvider {
    counters: Arc<Counters>,
    /// Image ids for which inference fails.
    failing: Arc<HashSet<String>>,
    /// Device ids whose model fails to load.
    broken_devices: Arc<HashSet<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(ids: &[&str]) -> Self {
        Self {
            failing: Arc::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn broken_device(device: &str) -> Self {
        Self {
            broken_devices: Arc::new(std::iter::once(device.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub fn loaded_devices(&self) -> Vec<String> {
        let mut devices = self.counters.devices.lock().unwrap().clone();
        devices.sort();
        devices
    }

    /// Image ids passed to the model, sorted.
    pub fn seen(&self) -> Vec<String> {
        let mut seen = self.counters.seen.lock().unwrap().clone();
        seen.sort();
        seen
    }
}

impl ModelProvider for MockProvider {
    fn load(&self, device: &DeviceSlot) -> Result<Box<dyn DetectionModel>, ModelError> {
        if self.broken_devices.contains(&device.id) {
            return Err(ModelError::Load {
                device: device.id.clone(),
                reason: "mock device is broken".to_string(),
            });
        }
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.counters.devices.lock().unwrap().push(device.id.clone());
        Ok(Box::new(MockModel {
            counters: Arc::clone(&self.counters),
            failing: Arc::clone(&self.failing),
        }))
    }
}

struct MockModel {
    counters: Arc<Counters>,
    failing: Arc<HashSet<String>>,
}

impl DetectionModel for MockModel {
    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<ModelOutput, ModelError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        self.counters
            .seen
            .lock()
            .unwrap()
            .push(input.record.id.clone());

        if self.failing.contains(&input.record.id) {
            return Err(ModelError::Protocol("mock inference failure".to_string()));
        }

        let regions = input.proposals.map(|p| p.len()).unwrap_or(REGIONS);
        let w = input.blob.width as f32;
        let h = input.blob.height as f32;

        let boxes = match input.proposals {
            Some(proposals) => proposals.to_vec(),
            None => (0..regions)
                .map(|i| {
                    let f = (i + 1) as f32 / (regions + 1) as f32;
                    [0.0, 0.0, w * f, h * f]
                })
                .collect(),
        };
        // Region i scores (i + 1) / regions on class (i % 3) + 1
        let scores = (0..regions)
            .map(|i| {
                let mut row = vec![0.0; 4];
                row[0] = 0.05;
                row[i % 3 + 1] = (i + 1) as f32 / regions as f32;
                row
            })
            .collect();
        let features = (0..regions)
            .map(|i| vec![i as f32; FEATURE_DIM])
            .collect();

        Ok(ModelOutput {
            boxes,
            scores,
            features: input.mode.produces_features().then_some(features),
            attr_scores: None,
            objectness: Some(vec![0.5; regions]),
        })
    }
}
