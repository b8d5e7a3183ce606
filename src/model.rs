//! Domain models parsed from Core JSON bodies.
//!
//! These are value objects: they have no lifecycle beyond the event
//! that produced them and are re-parsed on every relevant frame.
//! Unknown JSON fields are ignored throughout.

use serde::Deserialize;
use serde_json::Value;

/// Playback state of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Loading,
    Stopped,
}

/// Loop mode of a zone. `Next` asks the Core to advance to the next
/// mode in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSetting {
    Disabled,
    Loop,
    LoopOne,
    Next,
}

impl LoopSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopSetting::Disabled => "disabled",
            LoopSetting::Loop => "loop",
            LoopSetting::LoopOne => "loop_one",
            LoopSetting::Next => "next",
        }
    }
}

/// Per-zone playback settings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ZoneSettings {
    #[serde(rename = "loop")]
    pub loop_setting: Option<LoopSetting>,
    pub shuffle: Option<bool>,
    pub auto_radio: Option<bool>,
}

/// One, two, and three line display forms of a piece of content.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Line {
    #[serde(default)]
    pub line1: String,
    pub line2: Option<String>,
    pub line3: Option<String>,
}

/// What a zone is currently playing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NowPlaying {
    pub seek_position: Option<i64>,
    pub length: Option<i64>,
    pub image_key: Option<String>,
    pub one_line: Option<Line>,
    pub two_line: Option<Line>,
    pub three_line: Option<Line>,
}

/// A logical playback target: one or more outputs playing the same
/// content.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    #[serde(default)]
    pub display_name: String,
    pub state: Option<PlaybackState>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub now_playing: Option<NowPlaying>,
    pub settings: Option<ZoneSettings>,
    pub seek_position: Option<i64>,
    pub queue_items_remaining: Option<i64>,
    pub queue_time_remaining: Option<i64>,
    pub is_play_allowed: Option<bool>,
    pub is_pause_allowed: Option<bool>,
    pub is_seek_allowed: Option<bool>,
    pub is_next_allowed: Option<bool>,
    pub is_previous_allowed: Option<bool>,
}

/// Volume state of an output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Volume {
    #[serde(rename = "type")]
    pub volume_type: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub value: Option<f64>,
    pub step: Option<f64>,
    pub is_muted: Option<bool>,
}

/// A source control exposed by an output (standby, convenience switch).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceControl {
    pub control_key: String,
    #[serde(default)]
    pub display_name: String,
    pub supports_standby: Option<bool>,
    pub status: Option<String>,
}

/// A physical audio device addressable independently.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Output {
    pub output_id: String,
    #[serde(default)]
    pub display_name: String,
    pub zone_id: Option<String>,
    #[serde(default)]
    pub can_group_with_output_ids: Vec<String>,
    pub volume: Option<Volume>,
    #[serde(default)]
    pub source_controls: Vec<SourceControl>,
}

/// Seek progress for a zone, pushed between full zone updates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneSeek {
    pub zone_id: String,
    pub seek_position: Option<i64>,
    pub queue_time_remaining: Option<i64>,
}

/// One entry of a zone's play queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueItem {
    pub queue_item_id: i64,
    pub length: Option<i64>,
    pub image_key: Option<String>,
    pub one_line: Option<Line>,
    pub two_line: Option<Line>,
    pub three_line: Option<Line>,
}

/// An entry in a browse list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowseItem {
    #[serde(default)]
    pub title: String,
    pub subtitle: Option<String>,
    pub image_key: Option<String>,
    pub item_key: Option<String>,
    pub hint: Option<String>,
    pub input_prompt: Option<Value>,
}

/// Metadata for the currently browsed list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowseList {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub count: u64,
    pub subtitle: Option<String>,
    pub image_key: Option<String>,
    #[serde(default)]
    pub level: u32,
    pub display_offset: Option<u64>,
    pub hint: Option<String>,
}

/// Outcome of a `browse` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowseResult {
    #[serde(default)]
    pub action: String,
    pub list: Option<BrowseList>,
    pub item: Option<BrowseItem>,
    pub message: Option<String>,
    pub is_error: Option<bool>,
}

/// Outcome of a `load` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadResult {
    #[serde(default)]
    pub items: Vec<BrowseItem>,
    pub list: Option<BrowseList>,
    #[serde(default)]
    pub offset: u64,
}

/// Parse an array field element-wise, skipping entries that do not
/// deserialize so one malformed element cannot suppress a whole event.
pub(crate) fn parse_vec<T: for<'de> Deserialize<'de>>(body: &Value, key: &str) -> Vec<T> {
    let Some(items) = body.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("skipping malformed {key} entry: {e}");
                None
            }
        })
        .collect()
}

/// Parse an array of plain strings (id lists).
pub(crate) fn parse_string_vec(body: &Value, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
