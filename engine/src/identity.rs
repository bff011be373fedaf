//! Entity identity map.
//!
//! An [`EntityLink`] ties one Store A record to one Store B record under a
//! mapped type. Links are strictly 1:1 per mapped type: a second link for
//! either id is a configuration error, never an overwrite.

use crate::{error::Result, Error, MappedTypeId, RecordId, Side};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A persisted 1:1 link between a CRM record and a content record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityLink {
    pub mapped_type: MappedTypeId,
    pub crm_id: RecordId,
    pub content_id: RecordId,
}

impl EntityLink {
    pub fn new(mapped_type: impl Into<MappedTypeId>, crm_id: RecordId, content_id: RecordId) -> Self {
        Self {
            mapped_type: mapped_type.into(),
            crm_id,
            content_id,
        }
    }

    /// Id of the linked record on `side`.
    pub fn id_on(&self, side: Side) -> RecordId {
        match side {
            Side::Crm => self.crm_id,
            Side::Content => self.content_id,
        }
    }
}

/// Persistence for entity links.
pub trait LinkStore {
    /// Find the link holding `id` on `side`.
    fn find(&self, mapped_type: &str, side: Side, id: RecordId) -> Result<Option<EntityLink>>;

    /// Persist a new link. Implementations must reject duplicates on either id.
    fn insert(&mut self, link: EntityLink) -> Result<()>;

    /// Remove the link holding `id` on `side`.
    fn remove(&mut self, mapped_type: &str, side: Side, id: RecordId) -> Result<Option<EntityLink>>;

    /// All links of a mapped type, ordered by CRM id.
    fn links(&self, mapped_type: &str) -> Result<Vec<EntityLink>>;
}

/// In-memory link store with both directions indexed.
#[derive(Debug, Clone, Default)]
pub struct MemoryLinkStore {
    by_crm: BTreeMap<(MappedTypeId, RecordId), RecordId>,
    by_content: BTreeMap<(MappedTypeId, RecordId), RecordId>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_crm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_crm.is_empty()
    }

    /// Every link in the store, ordered by mapped type then CRM id.
    pub fn all_links(&self) -> Vec<EntityLink> {
        self.by_crm
            .iter()
            .map(|((mapped, crm_id), content_id)| EntityLink::new(mapped.clone(), *crm_id, *content_id))
            .collect()
    }
}

impl LinkStore for MemoryLinkStore {
    fn find(&self, mapped_type: &str, side: Side, id: RecordId) -> Result<Option<EntityLink>> {
        let key = (mapped_type.to_string(), id);
        Ok(match side {
            Side::Crm => self
                .by_crm
                .get(&key)
                .map(|content_id| EntityLink::new(mapped_type, id, *content_id)),
            Side::Content => self
                .by_content
                .get(&key)
                .map(|crm_id| EntityLink::new(mapped_type, *crm_id, id)),
        })
    }

    fn insert(&mut self, link: EntityLink) -> Result<()> {
        let crm_key = (link.mapped_type.clone(), link.crm_id);
        let content_key = (link.mapped_type.clone(), link.content_id);

        if let Some(existing) = self.by_crm.get(&crm_key) {
            return Err(Error::LinkConflict {
                mapped_type: link.mapped_type,
                side: Side::Crm,
                id: link.crm_id,
                existing: *existing,
                requested: link.content_id,
            });
        }
        if let Some(existing) = self.by_content.get(&content_key) {
            return Err(Error::LinkConflict {
                mapped_type: link.mapped_type,
                side: Side::Content,
                id: link.content_id,
                existing: *existing,
                requested: link.crm_id,
            });
        }

        self.by_crm.insert(crm_key, link.content_id);
        self.by_content.insert(content_key, link.crm_id);
        Ok(())
    }

    fn remove(&mut self, mapped_type: &str, side: Side, id: RecordId) -> Result<Option<EntityLink>> {
        let Some(link) = self.find(mapped_type, side, id)? else {
            return Ok(None);
        };
        self.by_crm.remove(&(link.mapped_type.clone(), link.crm_id));
        self.by_content
            .remove(&(link.mapped_type.clone(), link.content_id));
        Ok(Some(link))
    }

    fn links(&self, mapped_type: &str) -> Result<Vec<EntityLink>> {
        Ok(self
            .by_crm
            .iter()
            .filter(|((mapped, _), _)| mapped == mapped_type)
            .map(|((mapped, crm_id), content_id)| EntityLink::new(mapped.clone(), *crm_id, *content_id))
            .collect())
    }
}

/// Per-request memo of link lookups, including misses.
#[derive(Debug, Default)]
pub struct IdentityMemo {
    entries: HashMap<(MappedTypeId, Side, RecordId), Option<RecordId>>,
    hits: usize,
}

impl IdentityMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lookups answered without touching the link store.
    pub fn hits(&self) -> usize {
        self.hits
    }

    fn forget(&mut self, mapped_type: &str, side: Side, id: RecordId) {
        self.entries.remove(&(mapped_type.to_string(), side, id));
    }
}

/// Lookup and maintenance of entity links over a [`LinkStore`].
#[derive(Debug)]
pub struct IdentityMap<L: LinkStore> {
    store: L,
}

impl<L: LinkStore> IdentityMap<L> {
    pub fn new(store: L) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut L {
        &mut self.store
    }

    pub fn into_inner(self) -> L {
        self.store
    }

    /// Counterpart of `id` on the other side, if linked.
    pub fn get(
        &self,
        memo: &mut IdentityMemo,
        mapped_type: &str,
        side: Side,
        id: RecordId,
    ) -> Result<Option<RecordId>> {
        let key = (mapped_type.to_string(), side, id);
        if let Some(cached) = memo.entries.get(&key) {
            memo.hits += 1;
            return Ok(*cached);
        }
        let counterpart = self
            .store
            .find(mapped_type, side, id)?
            .map(|link| link.id_on(side.opposite()));
        memo.entries.insert(key, counterpart);
        Ok(counterpart)
    }

    /// Link `crm_id` and `content_id`.
    ///
    /// Setting an existing identical link is a no-op; any other link already
    /// holding either id is a [`Error::LinkConflict`].
    pub fn set(
        &mut self,
        memo: &mut IdentityMemo,
        mapped_type: &str,
        crm_id: RecordId,
        content_id: RecordId,
    ) -> Result<()> {
        let by_crm = self.store.find(mapped_type, Side::Crm, crm_id)?;
        let by_content = self.store.find(mapped_type, Side::Content, content_id)?;

        match (by_crm, by_content) {
            (Some(link), _) if link.content_id == content_id => return Ok(()),
            (Some(link), _) => {
                return Err(Error::LinkConflict {
                    mapped_type: mapped_type.to_string(),
                    side: Side::Crm,
                    id: crm_id,
                    existing: link.content_id,
                    requested: content_id,
                })
            }
            (None, Some(link)) => {
                return Err(Error::LinkConflict {
                    mapped_type: mapped_type.to_string(),
                    side: Side::Content,
                    id: content_id,
                    existing: link.crm_id,
                    requested: crm_id,
                })
            }
            (None, None) => {}
        }

        self.store
            .insert(EntityLink::new(mapped_type, crm_id, content_id))?;
        memo.entries
            .insert((mapped_type.to_string(), Side::Crm, crm_id), Some(content_id));
        memo.entries
            .insert((mapped_type.to_string(), Side::Content, content_id), Some(crm_id));
        tracing::debug!(mapped_type, crm_id, content_id, "entity link stored");
        Ok(())
    }

    /// Remove the link holding `id` on `side`.
    pub fn remove(
        &mut self,
        memo: &mut IdentityMemo,
        mapped_type: &str,
        side: Side,
        id: RecordId,
    ) -> Result<Option<EntityLink>> {
        let removed = self.store.remove(mapped_type, side, id)?;
        memo.forget(mapped_type, side, id);
        if let Some(link) = &removed {
            memo.forget(mapped_type, Side::Crm, link.crm_id);
            memo.forget(mapped_type, Side::Content, link.content_id);
            tracing::debug!(mapped_type, crm_id = link.crm_id, content_id = link.content_id, "entity link removed");
        }
        Ok(removed)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        /// Whatever sequence of sets is attempted, no id is linked twice
        #[test]
        fn prop_links_stay_one_to_one(
            pairs in prop::collection::vec((0u64..20, 0u64..20), 0..60)
        ) {
            let mut map = IdentityMap::new(MemoryLinkStore::new());
            let mut memo = IdentityMemo::new();
            for (crm, content) in pairs {
                let _ = map.set(&mut memo, "people", crm, content);
            }

            let links = map.store().links("people").unwrap();
            let crm_ids: HashSet<_> = links.iter().map(|l| l.crm_id).collect();
            let content_ids: HashSet<_> = links.iter().map(|l| l.content_id).collect();
            prop_assert_eq!(crm_ids.len(), links.len());
            prop_assert_eq!(content_ids.len(), links.len());
        }
    }
}
