//! Per-resource busy tracking.
//!
//! The table records which client id, if any, exclusively owns each slot.
//! It never holds a client: ids are resolved through the arena kept next to
//! it, so a slot entry can outlive the connection it names without keeping
//! that connection alive.
//!
//! The table itself is not synchronized. The arbitrator keeps it behind its
//! global lock and only mutates it for the duration of a field update.

use camd_core::{ArbiterError, ArbiterResult, ClientId, ResourceId, ResourceInfo};
use tracing::debug;

/// State of one physical resource.
#[derive(Debug, Clone)]
pub struct ResourceSlot {
    info: ResourceInfo,
    owner: Option<ClientId>,
}

impl ResourceSlot {
    fn new(info: ResourceInfo) -> Self {
        Self { info, owner: None }
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    /// True iff an exclusive client owns the slot.
    pub fn is_busy(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }
}

/// Fixed-size table of resource slots, indexed by [`ResourceId`].
#[derive(Debug, Clone)]
pub struct ResourceTable {
    slots: Vec<ResourceSlot>,
}

impl ResourceTable {
    /// Creates a table with every slot free.
    pub fn new(infos: Vec<ResourceInfo>) -> Self {
        Self {
            slots: infos.into_iter().map(ResourceSlot::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the slot for `resource`.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::InvalidId` if the id is outside the table
    pub fn slot(&self, resource: ResourceId) -> ArbiterResult<&ResourceSlot> {
        self.slots
            .get(resource.index())
            .ok_or(ArbiterError::InvalidId {
                resource,
                count: self.slots.len(),
            })
    }

    fn slot_mut(&mut self, resource: ResourceId) -> ArbiterResult<&mut ResourceSlot> {
        let count = self.slots.len();
        self.slots
            .get_mut(resource.index())
            .ok_or(ArbiterError::InvalidId { resource, count })
    }

    pub fn info(&self, resource: ResourceId) -> ArbiterResult<&ResourceInfo> {
        self.slot(resource).map(ResourceSlot::info)
    }

    /// Descriptors of every slot, ordered by id.
    pub fn infos(&self) -> Vec<ResourceInfo> {
        self.slots.iter().map(|s| s.info.clone()).collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &ResourceSlot> {
        self.slots.iter()
    }

    /// Marks `resource` busy with `owner` if, and only if, it is free.
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// - `ArbiterError::InvalidId` if the id is outside the table
    /// - `ArbiterError::AlreadyBusy` if another client owns the slot
    pub fn try_acquire(&mut self, resource: ResourceId, owner: ClientId) -> ArbiterResult<()> {
        let slot = self.slot_mut(resource)?;
        if let Some(current) = slot.owner {
            debug!(
                resource = %resource,
                owner = %current,
                requested_by = %owner,
                "Resource already busy"
            );
            return Err(ArbiterError::AlreadyBusy { resource });
        }
        slot.owner = Some(owner);
        Ok(())
    }

    /// Frees `resource` if `owner` is the installed owner.
    ///
    /// Idempotent: releasing a free slot, an unknown id, or a slot that has
    /// since been taken by a different client is a no-op. Returns true if
    /// the slot was actually freed.
    pub fn release(&mut self, resource: ResourceId, owner: ClientId) -> bool {
        match self.slot_mut(resource) {
            Ok(slot) if slot.owner == Some(owner) => {
                slot.owner = None;
                true
            }
            _ => false,
        }
    }

    /// Current exclusive owner of `resource`, if any.
    pub fn lookup(&self, resource: ResourceId) -> Option<ClientId> {
        self.slot(resource).ok().and_then(ResourceSlot::owner)
    }

    pub fn is_busy(&self, resource: ResourceId) -> bool {
        self.lookup(resource).is_some()
    }

    /// Number of busy slots.
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_busy()).count()
    }
}
