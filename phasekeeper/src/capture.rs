//! Buffers of mutations which were requested but not yet applied.

use core::fmt;

use crate::cause::CauseObject;
use crate::entity::Entity;
use crate::math::Cube;
use crate::world::{BlockState, WorldAccess, WorldId};

/// A record of a mutation that knows how to put the world back the way it was.
pub trait Restore: fmt::Debug {
    /// Undoes the effects of this record on `worlds`, if it had any.
    fn restore(self, worlds: &mut dyn WorldAccess);
}

/// A proposed change of one block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockChange {
    #[allow(missing_docs)]
    pub world: WorldId,
    #[allow(missing_docs)]
    pub cube: Cube,
    /// State of the block before the change.
    pub original: BlockState,
    /// State the change would write.
    pub replacement: BlockState,
}

impl Restore for BlockChange {
    fn restore(self, worlds: &mut dyn WorldAccess) {
        // Only write if needed, so that restoring a change which never reached the world
        // does not load its chunk.
        if worlds.block_state(self.world, self.cube).as_ref() != Some(&self.original) {
            worlds.set_block_state(self.world, self.cube, self.original);
        }
    }
}

/// A proposed entity spawn.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedSpawn {
    /// The entity to be spawned, in the world given by its transform.
    pub entity: Entity,
    /// What the spawn should be attributed to, if the phase tracks owners.
    pub owner: Option<CauseObject>,
}

impl Restore for CapturedSpawn {
    fn restore(self, _: &mut dyn WorldAccess) {
        // The entity was never attached, so dropping it is sufficient.
        log::trace!("discarding captured spawn of {:?}", self.entity.id());
    }
}

/// A proposed item drop. Dropped items are entities of kind
/// [`EntityKind::ITEM`](crate::entity::EntityKind::ITEM).
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedDrop {
    #[allow(missing_docs)]
    pub item: Entity,
    /// What dropped the item, if known.
    pub owner: Option<CauseObject>,
}

impl Restore for CapturedDrop {
    fn restore(self, _: &mut dyn WorldAccess) {
        log::trace!("discarding captured drop of {:?}", self.item.id());
    }
}

// -------------------------------------------------------------------------------------------------

/// An ordered buffer of captured mutation records of one kind.
///
/// Nothing is written to the world when a record is captured. The buffer is consumed
/// either by [`Captures::take_all()`] (to commit the records) or by
/// [`Captures::restore_originals()`] (to discard them).
#[derive(Clone, PartialEq)]
pub struct Captures<R> {
    records: Vec<R>,
}

impl<R> Captures<R> {
    /// Constructs an empty buffer.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Appends a record.
    pub fn capture(&mut self, record: R)
    where
        R: fmt::Debug,
    {
        log::trace!("captured {record:?}");
        self.records.push(record);
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Iterates over the records in the order they were captured.
    pub fn iter(&self) -> core::slice::Iter<'_, R> {
        self.records.iter()
    }

    /// Removes and returns all records, in the order they were captured.
    pub fn take_all(&mut self) -> Vec<R> {
        core::mem::take(&mut self.records)
    }

    /// Removes records for which `predicate` returns false, preserving order.
    pub fn retain(&mut self, predicate: impl FnMut(&R) -> bool) {
        self.records.retain(predicate);
    }
}

impl<R: Restore> Captures<R> {
    /// Undoes every record, most recent first, and empties the buffer.
    ///
    /// Calling this again does nothing, since the buffer is now empty.
    /// Returns the number of records restored.
    pub fn restore_originals(&mut self, worlds: &mut dyn WorldAccess) -> usize {
        let records = self.take_all();
        let count = records.len();
        for record in records.into_iter().rev() {
            record.restore(worlds);
        }
        count
    }
}

impl Captures<BlockChange> {
    /// Returns the most recently captured replacement for the given cube, if any.
    pub fn latest_for(&self, world: WorldId, cube: Cube) -> Option<&BlockState> {
        self.records
            .iter()
            .rev()
            .find(|change| change.world == world && change.cube == cube)
            .map(|change| &change.replacement)
    }
}

impl<R> Default for Captures<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> From<Vec<R>> for Captures<R> {
    fn from(records: Vec<R>) -> Self {
        Self { records }
    }
}

impl<R: fmt::Debug> fmt::Debug for Captures<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.records).finish()
    }
}

impl<'a, R> IntoIterator for &'a Captures<R> {
    type Item = &'a R;
    type IntoIter = core::slice::Iter<'a, R>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
