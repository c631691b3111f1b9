//! Reduction of raw upstream change records to distinct change events.

use std::collections::HashMap;

use chrono::NaiveDate;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SourcesConfig;
use crate::subscriptions::Registry;

/// A raw record as delivered by an upstream change source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChangeRecord {
    /// Object-store write notification
    #[serde(rename_all = "camelCase")]
    Object {
        path: String,
        #[serde(default)]
        version_marker: String,
    },
    /// Database change-feed record for the games table
    #[serde(rename_all = "camelCase")]
    Row {
        event_name: String,
        #[serde(default)]
        new_image: Option<RowImage>,
    },
    /// Anything else. Kept so one bad record cannot fail the whole batch.
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RowImage {
    #[serde(default)]
    pub date: Option<AttributeValue>,
}

/// A change-feed attribute, either plain or in typed `{"S": "..."}` form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Plain(String),
    Typed {
        #[serde(rename = "S")]
        s: String,
    },
}

impl AttributeValue {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(s) | Self::Typed { s } => s,
        }
    }
}

/// Whether an event concerns one game or one schedule date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Game,
    Date,
}

impl EventKind {
    pub fn registry(&self) -> Registry {
        match self {
            Self::Game => Registry::Game,
            Self::Date => Registry::Date,
        }
    }
}

/// Normalized change notice for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub entity_key: String,
    /// Content identity of the object, quotes stripped. Empty for row records.
    pub version_token: String,
    /// Decoded object key the event came from, if any
    pub source_key: Option<String>,
}

/// Matches change records against the configured key layouts.
#[derive(Debug, Clone)]
pub struct ChangeEventExtractor {
    game_patterns: Vec<Regex>,
    schedule_prefix: String,
}

impl ChangeEventExtractor {
    pub fn new(sources: &SourcesConfig) -> Result<Self, regex::Error> {
        let game_patterns = sources
            .game_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            game_patterns,
            schedule_prefix: sources.schedule_prefix.clone(),
        })
    }

    /// Reduce a batch to one event per entity. Later records overwrite the
    /// version of earlier ones; order follows first appearance.
    pub fn extract(&self, records: &[ChangeRecord]) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = Vec::new();
        let mut positions: HashMap<(EventKind, String), usize> = HashMap::new();

        for record in records {
            let Some(event) = self.parse_record(record) else {
                tracing::debug!(?record, "Ignoring change record");
                continue;
            };

            match positions.get(&(event.kind, event.entity_key.clone())) {
                Some(&pos) => events[pos] = event,
                None => {
                    positions.insert((event.kind, event.entity_key.clone()), events.len());
                    events.push(event);
                }
            }
        }

        events
    }

    fn parse_record(&self, record: &ChangeRecord) -> Option<ChangeEvent> {
        match record {
            ChangeRecord::Object {
                path,
                version_marker,
            } => self.parse_object(path, version_marker),
            ChangeRecord::Row {
                event_name,
                new_image,
            } => {
                if event_name != "INSERT" && event_name != "MODIFY" {
                    return None;
                }
                let date = new_image.as_ref()?.date.as_ref()?.as_str();
                if !is_schedule_date(date) {
                    return None;
                }
                Some(ChangeEvent {
                    kind: EventKind::Date,
                    entity_key: date.to_string(),
                    version_token: String::new(),
                    source_key: None,
                })
            }
            ChangeRecord::Unrecognized(_) => None,
        }
    }

    fn parse_object(&self, path: &str, version_marker: &str) -> Option<ChangeEvent> {
        let key = decode_object_key(path);
        let version_token = version_marker.replace('"', "");

        for pattern in &self.game_patterns {
            if let Some(game_id) = pattern.captures(&key).and_then(|c| c.get(1)) {
                return Some(ChangeEvent {
                    kind: EventKind::Game,
                    entity_key: game_id.as_str().to_string(),
                    version_token,
                    source_key: Some(key.clone()),
                });
            }
        }

        let date = self.schedule_date(&key)?;
        Some(ChangeEvent {
            kind: EventKind::Date,
            entity_key: date,
            version_token,
            source_key: Some(key),
        })
    }

    /// `schedule/2024/2024-01-15.json.gz` -> `2024-01-15`
    fn schedule_date(&self, key: &str) -> Option<String> {
        let filename = key.strip_prefix(self.schedule_prefix.as_str())?;
        let stem = [".json.gz", ".json"]
            .iter()
            .find_map(|suffix| filename.strip_suffix(suffix))?;
        let date = stem.rsplit('/').next().unwrap_or(stem);
        is_schedule_date(date).then(|| date.to_string())
    }
}

/// Object keys arrive form-encoded: `+` is a space, the rest is percent-encoded.
pub fn decode_object_key(key: &str) -> String {
    let spaced = key.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Strict `YYYY-MM-DD` that is also a real calendar date.
pub fn is_schedule_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    shape_ok && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}
