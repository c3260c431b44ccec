//! Tombstone-aware replicated character sequence.
//!
//! The sequence keeps every character ever inserted, sorted by
//! [`Position`](crate::Position); deletion only flips a tombstone flag.
//! Local edits allocate fresh positions, remote edits merge through
//! [`ReplicatedSequence::apply_remote`], which is commutative and
//! idempotent — two replicas that have seen the same set of characters
//! render the same text no matter the arrival order.
//!
//! Index convention: every public index counts **visible** (non-deleted)
//! characters only. The mapping onto the tombstone-bearing backing array is
//! internal.

use serde::{Deserialize, Serialize};

use crate::position::{Position, PositionGenerator, SiteId};
use crate::snapshot::DocumentSnapshot;

/// One character of a replicated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub value: char,
    pub position: Position,
    pub deleted: bool,
}

/// Outcome of merging a remote character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// The character was new and has been inserted.
    Inserted,
    /// The character was known and its tombstone flag was set.
    Deleted,
    /// The character was already known in this state; nothing changed.
    Unchanged,
}

/// Ordered collection of tombstone-aware characters.
pub struct ReplicatedSequence {
    site: SiteId,
    chars: Vec<Character>,
    generator: PositionGenerator,
}

impl ReplicatedSequence {
    /// Create an empty sequence whose local edits are attributed to `site`.
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            chars: Vec::new(),
            generator: PositionGenerator::new(),
        }
    }

    /// The site local edits are attributed to by [`insert`](Self::insert).
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Insert `value` so it becomes the visible character at `index`,
    /// attributed to the local site. Indices past the end append.
    pub fn insert(&mut self, index: usize, value: char) -> Character {
        self.insert_as(self.site, index, value)
    }

    /// Insert on behalf of `site` (the router inserts for whichever
    /// participant sent the operation).
    ///
    /// The allocation bounds are the physically adjacent entries in the
    /// backing array — tombstones included — so the fresh position is
    /// strictly between every existing position at that slot.
    pub fn insert_as(&mut self, site: SiteId, index: usize, value: char) -> Character {
        let slot = self.slot_after_visible(index);
        let lo = slot.checked_sub(1).map(|i| &self.chars[i].position);
        let hi = self.chars.get(slot).map(|c| &c.position);
        let position = self.generator.next(site, lo, hi);
        let ch = Character {
            value,
            position,
            deleted: false,
        };
        self.chars.insert(slot, ch.clone());
        ch
    }

    /// Tombstone the visible character at `index`. Returns the tombstoned
    /// character for broadcast, or `None` when `index` is out of range.
    pub fn delete(&mut self, index: usize) -> Option<Character> {
        let slot = self.visible_slot(index)?;
        self.chars[slot].deleted = true;
        Some(self.chars[slot].clone())
    }

    /// Merge a character received from another replica.
    ///
    /// A character with a known position only ever ORs its tombstone flag in
    /// — a deletion is never undone. An unknown position is inserted at its
    /// total-order slot. Applying the same character twice, or a batch in
    /// any order, yields the same sequence.
    pub fn apply_remote(&mut self, ch: Character) -> RemoteApply {
        match self
            .chars
            .binary_search_by(|existing| existing.position.cmp(&ch.position))
        {
            Ok(slot) => {
                if ch.deleted && !self.chars[slot].deleted {
                    self.chars[slot].deleted = true;
                    RemoteApply::Deleted
                } else {
                    RemoteApply::Unchanged
                }
            }
            Err(slot) => {
                self.generator.observe(ch.position.site(), ch.position.seq);
                self.chars.insert(slot, ch);
                RemoteApply::Inserted
            }
        }
    }

    /// The visible text: non-deleted values in position order.
    pub fn get_text(&self) -> String {
        self.chars
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| c.value)
            .collect()
    }

    /// Number of visible characters.
    pub fn visible_len(&self) -> usize {
        self.chars.iter().filter(|c| !c.deleted).count()
    }

    /// Number of stored characters, tombstones included.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// All stored characters in order, tombstones included.
    pub fn characters(&self) -> &[Character] {
        &self.chars
    }

    /// Serialize the full state — tombstones included, since omitting them
    /// would break convergence for replicas that have not yet seen the
    /// corresponding deletes.
    pub fn to_snapshot(&self, version: u64) -> DocumentSnapshot {
        DocumentSnapshot {
            text: self.get_text(),
            characters: self.chars.clone(),
            version,
        }
    }

    /// Rebuild a sequence from a snapshot.
    ///
    /// Characters are re-sorted by position (stored snapshots are already
    /// ordered, but the invariant is cheap to restore) and every site's
    /// counter is fast-forwarded past the highest sequence number seen, so
    /// counters stay monotonic across restarts.
    pub fn from_snapshot(snapshot: &DocumentSnapshot, site: SiteId) -> Self {
        let mut chars = snapshot.characters.clone();
        chars.sort_by(|a, b| a.position.cmp(&b.position));
        chars.dedup_by(|a, b| a.position == b.position);

        let mut generator = PositionGenerator::new();
        for ch in &chars {
            generator.observe(ch.position.site(), ch.position.seq);
        }

        Self {
            site,
            chars,
            generator,
        }
    }

    /// Backing-array slot immediately after the visible character at
    /// `index - 1` (0 for `index == 0`); new characters land here so
    /// trailing tombstones stay behind the insertion point.
    fn slot_after_visible(&self, index: usize) -> usize {
        if index == 0 {
            return 0;
        }
        let mut remaining = index;
        for (slot, ch) in self.chars.iter().enumerate() {
            if !ch.deleted {
                remaining -= 1;
                if remaining == 0 {
                    return slot + 1;
                }
            }
        }
        self.chars.len()
    }

    /// Backing-array slot of the visible character at `index`.
    fn visible_slot(&self, index: usize) -> Option<usize> {
        let mut seen = 0usize;
        for (slot, ch) in self.chars.iter().enumerate() {
            if !ch.deleted {
                if seen == index {
                    return Some(slot);
                }
                seen += 1;
            }
        }
        None
    }
}
