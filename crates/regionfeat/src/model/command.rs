use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use serde::Serialize;
use tracing::debug;

use crate::config::{DeviceSlot, JobConfig};
use crate::error::ModelError;
use crate::extract::ExtractMode;
use crate::model::{BBox, DetectionModel, InferenceInput, ModelOutput, ModelProvider};

/// Runs an external inference program once per image.
///
/// The program receives `--device <slot id>` after the configured arguments,
/// a JSON request on stdin, and must print a [`ModelOutput`] as JSON on stdout.
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    options: BTreeMap<String, serde_json::Value>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            options: BTreeMap::new(),
        }
    }

    /// Builds a provider from `config.model`, forwarding `config.options`.
    pub fn from_config(config: &JobConfig) -> Option<Self> {
        let program = config.model.program.clone()?;
        Some(Self {
            program,
            args: config.model.args.clone(),
            options: config.options.clone(),
        })
    }
}

impl ModelProvider for CommandProvider {
    fn load(&self, device: &DeviceSlot) -> Result<Box<dyn DetectionModel>, ModelError> {
        if self.program.trim().is_empty() {
            return Err(ModelError::Load {
                device: device.id.clone(),
                reason: "no model program configured".to_string(),
            });
        }

        Ok(Box::new(CommandModel {
            program: self.program.clone(),
            args: self.args.clone(),
            options: self.options.clone(),
            device: device.clone(),
        }))
    }
}

pub struct CommandModel {
    program: String,
    args: Vec<String>,
    options: BTreeMap<String, serde_json::Value>,
    device: DeviceSlot,
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    image: &'a Path,
    image_h: u32,
    image_w: u32,
    height: u32,
    width: u32,
    scale: f32,
    mode: ExtractMode,
    attribute_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    proposals: Option<&'a [BBox]>,
    options: &'a BTreeMap<String, serde_json::Value>,
}

impl DetectionModel for CommandModel {
    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<ModelOutput, ModelError> {
        let request = CommandRequest {
            image: &input.record.source_path,
            image_h: input.blob.image_h,
            image_w: input.blob.image_w,
            height: input.blob.height,
            width: input.blob.width,
            scale: input.blob.scale,
            mode: input.mode,
            attribute_on: input.attribute_on,
            proposals: input.proposals,
            options: &self.options,
        };
        let payload =
            serde_json::to_vec(&request).map_err(|e| ModelError::Protocol(e.to_string()))?;

        debug!(
            program = %self.program,
            device = %self.device.id,
            image = %input.record.id,
            "Invoking model process"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--device")
            .arg(&self.device.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ModelError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let stdin = child.stdin.take();
        // stdin is fed while stdout and stderr drain, so neither side can
        // fill its pipe and stall the other.
        let output = thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                let payload = &payload;
                scope.spawn(move || {
                    // A program that exits without reading its input surfaces
                    // through the exit status.
                    let _ = stdin.write_all(payload);
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| ModelError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelError::ExitStatus {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(2000).collect(),
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ModelError::Protocol(format!("failed to parse model output: {}", e)))
    }
}
