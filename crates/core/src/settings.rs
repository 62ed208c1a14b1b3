use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::color::ColorTarget;
use crate::error::ConfigError;
use crate::logger;
use crate::similarity::DEFAULT_THRESHOLD_PERCENT;
use crate::types::{Capture, ClickRole, Point, Rect, Rgb, StageId};

pub const CHANNEL_POINTS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickPositions {
    pub login: Option<Point>,
    pub character: Option<Point>,
    /// Ordered channel-switch points; exactly four must be bound for stage F.
    pub channel: Vec<Option<Point>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detection_area: Option<Rect>,
    pub channel_area: Option<Rect>,
    pub target_color: Rgb,
    /// Manhattan distance cutoff, 0-255.
    pub color_tolerance: u16,
    /// Matching pixels needed to declare the event present.
    pub color_threshold: u64,
    /// Seconds without the event in stage E before switching channel.
    pub boss_wait_time: u64,
    pub stage_similarity_threshold: u8,
    pub stage_thresholds: BTreeMap<StageId, u8>,
    pub click_positions: ClickPositions,
    pub stage_timeout_seconds: u64,
    pub stage_timeout_enabled: bool,
    pub auto_channel_switch_after_boss: bool,
    #[serde(deserialize_with = "chat_id_from_json")]
    pub telegram_chat_id: Option<i64>,
    pub telegram_bot_token: String,
    pub send_welcome_message: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_area: None,
            channel_area: None,
            target_color: Rgb(255, 0, 0),
            color_tolerance: 50,
            color_threshold: 100,
            boss_wait_time: 30,
            stage_similarity_threshold: DEFAULT_THRESHOLD_PERCENT,
            stage_thresholds: BTreeMap::new(),
            click_positions: ClickPositions::default(),
            stage_timeout_seconds: 300,
            stage_timeout_enabled: true,
            auto_channel_switch_after_boss: true,
            telegram_chat_id: None,
            telegram_bot_token: String::new(),
            send_welcome_message: true,
        }
    }
}

/// Chat ids arrive as numbers or as (possibly empty) strings.
fn chat_id_from_json<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(i64),
        Text(String),
    }

    match Option::<Repr>::deserialize(d)? {
        None => Ok(None),
        Some(Repr::Num(n)) => Ok(Some(n)),
        Some(Repr::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Repr::Text(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
    }
}

impl Settings {
    /// Parse `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let unreadable = |message: String| ConfigError::Unreadable { path: path.to_path_buf(), message };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| unreadable(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn color_target(&self) -> ColorTarget {
        ColorTarget {
            rgb: self.target_color,
            tolerance: self.color_tolerance,
            min_pixels: self.color_threshold,
        }
    }

    pub fn threshold_for(&self, stage: StageId) -> u8 {
        self.stage_thresholds
            .get(&stage)
            .copied()
            .unwrap_or(self.stage_similarity_threshold)
    }

    pub fn click_point(&self, role: ClickRole) -> Option<Point> {
        match role {
            ClickRole::Login => self.click_positions.login,
            ClickRole::Character => self.click_positions.character,
            ClickRole::Channel(i) => self.click_positions.channel.get(i).copied().flatten(),
        }
    }

    /// The four channel-switch points in click order.
    pub fn channel_points(&self) -> Result<[Point; CHANNEL_POINTS], ConfigError> {
        let bound: Vec<Point> = (0..CHANNEL_POINTS)
            .filter_map(|i| self.click_point(ClickRole::Channel(i)))
            .collect();
        bound
            .try_into()
            .map_err(|b: Vec<Point>| ConfigError::IncompleteChannelPoints { bound: b.len() })
    }

    /// Checks needed before a run may start.
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        match self.detection_area {
            None => return Err(ConfigError::MissingDetectionRegion),
            Some(r) if r.is_empty() => return Err(ConfigError::MissingDetectionRegion),
            Some(_) => {}
        }
        if self.click_positions.login.is_none() {
            return Err(ConfigError::MissingClickPoint(ClickRole::Login));
        }
        Ok(())
    }

    pub fn remote_enabled(&self) -> bool {
        !self.telegram_bot_token.trim().is_empty() && self.telegram_chat_id.is_some()
    }
}

/// Reference frames fingerprinting each stage. A missing entry means
/// "skip matching" for that stage.
#[derive(Debug, Clone, Default)]
pub struct StageReferences(HashMap<StageId, Capture>);

impl StageReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `stage_{A,C,D,E,F}.png` from `dir`. Unreadable files are skipped.
    pub fn load_dir(dir: &Path) -> Self {
        let mut refs = Self::new();
        for stage in StageId::ALL {
            let path = dir.join(format!("stage_{}.png", stage));
            if !path.is_file() {
                continue;
            }
            match image::open(&path) {
                Ok(img) => {
                    refs.insert(stage, Capture::from_rgba(img.to_rgba8()));
                    logger::info(&format!("loaded reference for stage {}", stage));
                }
                Err(e) => logger::warn(&format!("failed to load {}: {}", path.display(), e)),
            }
        }
        refs
    }

    pub fn insert(&mut self, stage: StageId, frame: Capture) {
        self.0.insert(stage, frame);
    }

    pub fn get(&self, stage: StageId) -> Option<&Capture> {
        self.0.get(&stage)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
