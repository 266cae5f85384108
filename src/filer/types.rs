//! Filer entries and the JSON shapes they are decoded from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::base_name;

/// Directory flag in the filer's `Mode` field.
pub const MODE_DIR: u32 = 1 << 31;

/// One listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub full_path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mime: String,
    pub mtime: Option<DateTime<Utc>>,
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<Entry>,
    /// Name of the last entry; pass back to continue. Empty means "from the start".
    pub cursor: String,
    pub has_more: bool,
}

/// Entry metadata from `?metadata=true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mime: String,
    pub md5: Option<String>,
    pub mtime: Option<DateTime<Utc>>,
    pub crtime: Option<DateTime<Utc>>,
    pub mode: u32,
    pub replication: String,
    pub collection: String,
    pub ttl_sec: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct RawListing {
    pub entries: Option<Vec<RawEntry>>,
    pub last_file_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct RawEntry {
    pub full_path: String,
    pub mtime: String,
    pub file_size: u64,
    pub mime: String,
    pub mode: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct RawStat {
    pub full_path: String,
    pub mtime: String,
    pub crtime: String,
    pub mode: u32,
    pub mime: String,
    pub replication: String,
    pub collection: String,
    pub ttl_sec: i32,
    pub md5: Option<String>,
    pub file_size: u64,
}

/// RFC 3339 timestamp; anything unparseable becomes `None`.
pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl From<RawEntry> for Entry {
    fn from(raw: RawEntry) -> Self {
        Self {
            name: base_name(&raw.full_path).to_string(),
            is_dir: raw.mode & MODE_DIR != 0,
            size: raw.file_size,
            mtime: parse_time(&raw.mtime),
            mime: raw.mime,
            full_path: raw.full_path,
        }
    }
}

impl From<RawStat> for Stat {
    fn from(raw: RawStat) -> Self {
        Self {
            name: base_name(&raw.full_path).to_string(),
            is_dir: raw.mode & MODE_DIR != 0,
            size: raw.file_size,
            md5: raw.md5.filter(|m| !m.is_empty()),
            mtime: parse_time(&raw.mtime),
            crtime: parse_time(&raw.crtime),
            mode: raw.mode,
            mime: raw.mime,
            replication: raw.replication,
            collection: raw.collection,
            ttl_sec: raw.ttl_sec,
            path: raw.full_path,
        }
    }
}
