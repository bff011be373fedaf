//! Snapshots of the in-memory link store.
//!
//! Lets a host without a database persist entity links between runs. Links are
//! written in a fixed order so the same store always produces the same JSON.

use crate::{
    error::Result,
    identity::{EntityLink, LinkStore, MemoryLinkStore},
    Error, MappedTypeId, RecordId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every entity link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// CRM id -> content id, grouped by mapped type
    pub links: BTreeMap<MappedTypeId, BTreeMap<RecordId, RecordId>>,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            links: BTreeMap::new(),
        }
    }
}

impl LinkSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the contents of a link store.
    pub fn capture(store: &MemoryLinkStore) -> Self {
        let mut snapshot = Self::new();
        for link in store.all_links() {
            snapshot.add(link);
        }
        snapshot
    }

    pub fn add(&mut self, link: EntityLink) {
        self.links
            .entry(link.mapped_type)
            .or_default()
            .insert(link.crm_id, link.content_id);
    }

    pub fn link_count(&self) -> usize {
        self.links.values().map(BTreeMap::len).sum()
    }

    /// Rebuild a link store, re-checking uniqueness on the way in.
    pub fn restore(&self) -> Result<MemoryLinkStore> {
        let mut store = MemoryLinkStore::new();
        for (mapped_type, links) in &self.links {
            for (crm_id, content_id) in links {
                store
                    .insert(EntityLink::new(mapped_type.clone(), *crm_id, *content_id))
                    .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
            }
        }
        Ok(store)
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
