//! Typed request options for writes, listings and deletes.
//!
//! Known filer parameters get named fields; anything else goes through `extra`
//! and is passed to the filer verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
    #[default]
    Put,
    Post,
}

impl WriteMethod {
    pub(crate) fn as_method(self) -> reqwest::Method {
        match self {
            WriteMethod::Put => reqwest::Method::PUT,
            WriteMethod::Post => reqwest::Method::POST,
        }
    }
}

/// Options applied to every request of an upload.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub method: WriteMethod,
    /// Filer TTL, e.g. `3m`, `4h`, `5d`
    pub ttl: Option<String>,
    pub collection: Option<String>,
    pub replication: Option<String>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
}

impl WriteOptions {
    pub fn with_method(mut self, method: WriteMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_replication(mut self, replication: impl Into<String>) -> Self {
        self.replication = Some(replication.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub(crate) fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(ttl) = &self.ttl {
            pairs.push(("ttl".to_string(), ttl.clone()));
        }
        if let Some(collection) = &self.collection {
            pairs.push(("collection".to_string(), collection.clone()));
        }
        if let Some(replication) = &self.replication {
            pairs.push(("replication".to_string(), replication.clone()));
        }
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

/// Server-side filters for directory listings.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Glob matched against entry names, e.g. `*.log`
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            include: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }

    pub(crate) fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(p) = self.include.as_deref().filter(|p| !p.is_empty()) {
            pairs.push(("namePattern".to_string(), p.to_string()));
        }
        if let Some(p) = self.exclude.as_deref().filter(|p| !p.is_empty()) {
            pairs.push(("namePatternExclude".to_string(), p.to_string()));
        }
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Delete non-empty directories
    pub recursive: bool,
    pub ignore_recursive_error: bool,
    /// Remove the entry but leave its chunks on the volume servers
    pub skip_chunk_deletion: bool,
    pub extra: BTreeMap<String, String>,
}

impl DeleteOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub(crate) fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if self.recursive {
            pairs.push(("recursive".to_string(), "true".to_string()));
        }
        if self.ignore_recursive_error {
            pairs.push(("ignoreRecursiveError".to_string(), "true".to_string()));
        }
        if self.skip_chunk_deletion {
            pairs.push(("skipChunkDeletion".to_string(), "true".to_string()));
        }
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}
