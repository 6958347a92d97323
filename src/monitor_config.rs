use log::{debug, error, info, warn};
use std::{fs, io};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{homography::RansacSettings, tracking::TicketValue};

/// Which event binds a ticket to a track
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BindingTrigger {
    /// First time the track's centroid is seen inside a check-in polygon
    #[default]
    CheckInEntry,
    /// First time the track is seen inside a slot after having been in a
    /// check-in polygon
    SlotAfterCheckIn,
}

/// What a new track gets once the ticket queue is empty
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExhaustedQueuePolicy {
    /// The track stays unbound and is reported as unticketed
    #[default]
    Unticketed,
    /// The track is bound to this value
    Fallback(TicketValue),
}

/// The coordinate space zone tests run in
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ZoneSpace {
    /// Stored polygons are camera-frame coordinates; centroids are tested raw
    #[default]
    Camera,
    /// Stored polygons are map coordinates; they are projected into the
    /// camera frame through the inverse homography before testing
    Map,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Detections below this confidence are dropped before any zone test
    pub confidence_threshold: f32,

    // -------- HOMOGRAPHY ESTIMATION SETTINGS
    /// Max reprojection error (pixels) for a correspondence to count as an inlier
    pub ransac_reprojection_threshold: f64,
    pub ransac_max_iterations: usize,
    /// Target probability that at least one sample is outlier-free
    pub ransac_confidence: f64,
    /// Fixed seed for sample selection, so identical input gives identical output
    pub ransac_seed: u64,

    // -------- TICKETING SETTINGS
    /// Ticket values issued in order at session start
    pub ticket_seed: Vec<TicketValue>,
    /// The ticket value that marks a violation when its track sits in a slot
    pub invalid_ticket: TicketValue,
    pub binding_trigger: BindingTrigger,
    pub exhausted_queue_policy: ExhaustedQueuePolicy,

    pub zone_space: ZoneSpace,

    /// Frames narrower or shorter than this (pixels) are skipped
    pub min_frame_dimension: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            confidence_threshold: 0.75,
            ransac_reprojection_threshold: 5.0,
            ransac_max_iterations: 2000,
            ransac_confidence: 0.995,
            ransac_seed: 42,
            ticket_seed: vec![1, 0],
            invalid_ticket: 1,
            binding_trigger: BindingTrigger::default(),
            exhausted_queue_policy: ExhaustedQueuePolicy::default(),
            zone_space: ZoneSpace::default(),
            min_frame_dimension: 1,
        }
    }
}

impl MonitorConfig {
    pub fn ransac_settings(&self) -> RansacSettings {
        RansacSettings {
            reprojection_threshold: self.ransac_reprojection_threshold,
            max_iterations: self.ransac_max_iterations,
            confidence: self.ransac_confidence,
            seed: self.ransac_seed,
        }
    }

    pub fn write_config_to_file(&self, config_file_path: &str) -> Result<()> {
        debug!("Current state of config: {:?}", self);
        let text = serde_json::to_string_pretty(self)?;
        match fs::write(config_file_path, text) {
            Ok(()) => {
                info!("Wrote config to file: {:?}", config_file_path);
                Ok(())
            }
            Err(e) => {
                error!("Error writing config to file: {:?}", e);
                Err(anyhow!("Failed to write config to {}: {}", config_file_path, e))
            }
        }
    }
}

/// Missing file means defaults; any other read or parse failure is an error
pub fn load_config_from_file(config_file_path: &str) -> Result<MonitorConfig> {
    match fs::read_to_string(config_file_path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(
                "Monitor config file not found at {}, using defaults",
                &config_file_path
            );
            Ok(MonitorConfig::default())
        }
        Err(e) => Err(anyhow!(
            "Failed to load monitor config from disk; error: {:?}",
            e
        )),
        Ok(s) => {
            info!("Loaded monitor config OK from \"{}\"", config_file_path);
            match serde_json::from_str::<MonitorConfig>(&s) {
                Ok(loaded_config) => {
                    debug!("Config parsed data from file: {:?}", &loaded_config);
                    Ok(loaded_config)
                }
                Err(e) => Err(anyhow!("Failed to parse config data: {}", e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = load_config_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        fs::write(
            &path,
            r#"{ "confidenceThreshold": 0.5, "exhaustedQueuePolicy": { "fallback": 1 }, "zoneSpace": "map" }"#,
        )
        .unwrap();
        let config = load_config_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.exhausted_queue_policy, ExhaustedQueuePolicy::Fallback(1));
        assert_eq!(config.zone_space, ZoneSpace::Map);
        assert_eq!(config.ticket_seed, vec![1, 0]);
        assert_eq!(config.binding_trigger, BindingTrigger::CheckInEntry);
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        let path = path.to_str().unwrap();
        let config = MonitorConfig {
            ticket_seed: vec![0, 0, 1],
            binding_trigger: BindingTrigger::SlotAfterCheckIn,
            ..Default::default()
        };
        config.write_config_to_file(path).unwrap();
        assert_eq!(load_config_from_file(path).unwrap(), config);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_config_from_file(path.to_str().unwrap()).is_err());
    }
}
