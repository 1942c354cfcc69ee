// SPDX-License-Identifier: MIT

//! Checkpoint records, field parsing, and the persisted arena.
//!
//! A checkpoint is a line in an Apex source file that should dump state when
//! execution crosses it. Records live in a flat arena owned by the store
//! worker (see [`service`]); everything here is plain data plus pure
//! parsing.

pub mod line_info;
pub mod service;

use std::path::Path;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ceiling on simultaneously enabled checkpoints, imposed by the org.
pub const MAX_CHECKPOINTS: usize = 5;
pub const OVERLAY_ACTION_SOBJECT: &str = "ApexExecutionOverlayAction";
pub const FIELD_INTEGRITY_EXCEPTION: &str = "FIELD_INTEGRITY_EXCEPTION";
/// Shown when the org rejects a checkpoint line that no longer matches the
/// deployed source.
pub const SOURCE_OUT_OF_SYNC: &str =
    "local source is out of sync with the org; deploy your changes and upload again";

static WHOLE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+$").expect("WHOLE_NUMBER: invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActionScriptType {
    #[default]
    None,
    Apex,
    #[serde(rename = "SOQL")]
    Soql,
}

/// One checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: Uuid,
    /// Source file the checkpoint lives in.
    pub source_path: String,
    /// 1-based editor line.
    pub line: u32,
    pub enabled: bool,
    #[serde(default)]
    pub action_script: String,
    #[serde(default)]
    pub action_script_type: ActionScriptType,
    /// Which crossing of the line triggers the dump, 1..=255.
    pub iteration: u32,
    /// Resolved during upload; not user-visible state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_object_id: Option<String>,
}

impl CheckpointEntry {
    /// Build an entry from raw editor breakpoint fields. Invalid hit
    /// conditions are rejected here, before the entry ever reaches the
    /// arena.
    pub fn from_breakpoint(
        source_path: impl Into<String>,
        line: u32,
        hit_condition: Option<&str>,
        log_message: Option<&str>,
    ) -> Result<Self> {
        let iteration = parse_iteration(hit_condition)?;
        let (action_script, action_script_type) = parse_action_script(log_message);
        Ok(Self {
            id: Uuid::new_v4(),
            source_path: source_path.into(),
            line,
            enabled: true,
            action_script,
            action_script_type,
            iteration,
            type_ref: None,
            action_object_id: None,
        })
    }

    pub fn overlay_action(&self, type_ref: &str) -> OverlayAction {
        OverlayAction {
            action_script: self.action_script.clone(),
            action_script_type: self.action_script_type,
            executable_entity_name: type_ref.to_string(),
            is_dumping_heap: true,
            iteration: self.iteration,
            line: self.line,
        }
    }
}

/// Wire record created remotely per checkpoint. Field names are the
/// sobject's exact column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayAction {
    #[serde(rename = "ActionScript")]
    pub action_script: String,
    #[serde(rename = "ActionScriptType")]
    pub action_script_type: ActionScriptType,
    #[serde(rename = "ExecutableEntityName")]
    pub executable_entity_name: String,
    #[serde(rename = "IsDumpingHeap")]
    pub is_dumping_heap: bool,
    #[serde(rename = "Iteration")]
    pub iteration: u32,
    #[serde(rename = "Line")]
    pub line: u32,
}

/// Iteration from an editor hit-condition string: absent or blank means 1,
/// otherwise digits only within 1..=255.
pub fn parse_iteration(hit_condition: Option<&str>) -> Result<u32> {
    let Some(raw) = hit_condition.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(1);
    };
    if !WHOLE_NUMBER.is_match(raw) {
        bail!("hit condition '{raw}' must be a whole number");
    }
    let iteration: u32 = raw
        .parse()
        .with_context(|| format!("hit condition '{raw}' is out of range"))?;
    if !(1..=255).contains(&iteration) {
        bail!("hit condition '{raw}' must be between 1 and 255");
    }
    Ok(iteration)
}

/// Action script from an editor log-message string: empty means no script, a
/// leading `select` (any case) means SOQL, anything else is Apex.
pub fn parse_action_script(log_message: Option<&str>) -> (String, ActionScriptType) {
    match log_message.map(str::trim).filter(|s| !s.is_empty()) {
        None => (String::new(), ActionScriptType::None),
        Some(script) if script.to_lowercase().starts_with("select") => {
            (script.to_string(), ActionScriptType::Soql)
        }
        Some(script) => (script.to_string(), ActionScriptType::Apex),
    }
}

// ─── Arena ───────────────────────────────────────────────────────────────────

/// Flat checkpoint arena. Owned by the store worker task; callers only ever
/// see snapshots.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CheckpointArena {
    pub entries: Vec<CheckpointEntry>,
}

impl CheckpointArena {
    /// Load from disk; a missing file is an empty arena.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("failed to encode checkpoints")?;
        std::fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Insert or replace the record at `(source_path, line)`.
    pub fn upsert(&mut self, entry: CheckpointEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.source_path == entry.source_path && e.line == entry.line)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, source_path: &str, line: u32) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.source_path == source_path && e.line == line));
        self.entries.len() != before
    }

    /// Flip `enabled`, preserving every parsed field. `None` when no record
    /// matches.
    pub fn toggle(&mut self, source_path: &str, line: u32) -> Option<bool> {
        self.entries
            .iter_mut()
            .find(|e| e.source_path == source_path && e.line == line)
            .map(|e| {
                e.enabled = !e.enabled;
                e.enabled
            })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn enabled(&self) -> Vec<CheckpointEntry> {
        self.entries.iter().filter(|e| e.enabled).cloned().collect()
    }
}
