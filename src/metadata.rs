//! Run metadata: one record per rendered video, kept in a JSON array file.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RenderResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub subreddit: String,
    pub filename: String,
    pub title: String,
    pub thread_id: String,
    pub background_credit: String,
    pub created_at: DateTime<Utc>,
}

pub fn load_records(path: &Path) -> RenderResult<Vec<VideoRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&data)?)
}

/// Append `record` unless a record for the same thread already exists.
/// Returns whether the file was changed.
pub fn save_record(path: &Path, record: VideoRecord) -> RenderResult<bool> {
    let mut records = load_records(path)?;
    if records.iter().any(|r| r.thread_id == record.thread_id) {
        info!("Metadata for thread {} already recorded", record.thread_id);
        return Ok(false);
    }
    records.push(record);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&records)?)?;
    Ok(true)
}
