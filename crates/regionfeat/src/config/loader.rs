use std::path::Path;

use log::warn;

use crate::config::schema::JobConfig;
use crate::error::ConfigError;

/// Reads a job configuration, as YAML for `.yaml`/`.yml` files and JSON
/// otherwise. Only the shape is checked here: callers apply command-line
/// settings and then run [`validate_config`] on the merged result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<JobConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        load_config_from_yaml(&content)
    } else {
        load_config_from_str(&content)
    }
}

pub fn load_config_from_str(content: &str) -> Result<JobConfig, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

pub fn load_config_from_yaml(content: &str) -> Result<JobConfig, ConfigError> {
    Ok(serde_yaml::from_str(content)?)
}

pub fn validate_config(config: &JobConfig) -> Result<(), ConfigError> {
    if config.devices.is_empty() {
        return Err(ConfigError::Validation {
            message: "At least one device must be declared".to_string(),
        });
    }

    if config.devices.iter().any(|d| d.trim().is_empty()) {
        return Err(ConfigError::Validation {
            message: "Device identifiers must not be empty".to_string(),
        });
    }

    let extractor = &config.extractor;
    if extractor.min_boxes > extractor.max_boxes {
        return Err(ConfigError::Validation {
            message: format!(
                "min_boxes ({}) must not exceed max_boxes ({})",
                extractor.min_boxes, extractor.max_boxes
            ),
        });
    }

    if !(0.0..=1.0).contains(&extractor.conf_thresh) {
        return Err(ConfigError::Validation {
            message: format!("conf_thresh must be in [0, 1], got {}", extractor.conf_thresh),
        });
    }

    if config.input.test_scale == 0 || config.input.max_size == 0 {
        return Err(ConfigError::Validation {
            message: "test_scale and max_size must be positive".to_string(),
        });
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_ms must be positive".to_string(),
        });
    }

    Ok(())
}

/// Parses a device list such as `0,1,3`. Surrounding quotes are tolerated.
pub fn parse_devices(list: &str) -> Vec<String> {
    list.trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .split(',')
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Applies a `min,max` box bound. `min_max_default` and unparsable values
/// leave the config untouched.
pub fn apply_min_max_boxes(config: &mut JobConfig, bounds: &str) {
    let bounds = bounds.trim().trim_matches(|c| c == '\'' || c == '"');
    if bounds == "min_max_default" {
        return;
    }

    let parsed = bounds.split_once(',').and_then(|(min, max)| {
        let min = min.trim().parse::<usize>().ok()?;
        let max = max.trim().parse::<usize>().ok()?;
        Some((min, max))
    });

    match parsed {
        Some((min, max)) => {
            config.extractor.min_boxes = min;
            config.extractor.max_boxes = max;
        }
        None => {
            warn!(
                "Illegal min-max boxes setting '{}', using config default",
                bounds
            );
        }
    }
}

/// Merges `KEY VALUE` pairs into the model options. Values are parsed as
/// YAML scalars so numbers and booleans keep their type.
pub fn apply_overrides(config: &mut JobConfig, pairs: &[String]) -> Result<(), ConfigError> {
    if pairs.len() % 2 != 0 {
        return Err(ConfigError::InvalidOverride(format!(
            "expected KEY VALUE pairs, got {} item(s)",
            pairs.len()
        )));
    }

    for pair in pairs.chunks(2) {
        let key = pair[0].trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidOverride("empty key".to_string()));
        }

        let value: serde_json::Value = serde_yaml::from_str(&pair[1])
            .unwrap_or_else(|_| serde_json::Value::String(pair[1].clone()));
        config.options.insert(key.to_string(), value);
    }

    Ok(())
}
