//! Circular store of completed response snapshots.
//!
//! The receive path commits one snapshot per completed command at the cursor
//! and advances it; the issuer takes that snapshot exactly once. The ring
//! depth lets a response that arrives after its waiter gave up land in a slot
//! no other waiter is reading.

use bytes::Bytes;

#[derive(Debug, Default, Clone)]
struct Slot {
    data: Option<Bytes>,
    consumed: bool,
}

/// Fixed-depth ring of response slots.
#[derive(Debug)]
pub struct ResponseRing {
    slots: Vec<Slot>,
    cursor: usize,
    last_committed: Option<usize>,
}

impl ResponseRing {
    /// Create a ring with `depth` empty slots. A depth of zero is treated as one.
    pub fn new(depth: usize) -> Self {
        ResponseRing {
            slots: vec![Slot::default(); depth.max(1)],
            cursor: 0,
            last_committed: None,
        }
    }

    /// Index of the slot the next completed response is written to.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Empty the slot at `idx`.
    pub fn clear_slot(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = Slot::default();
        }
    }

    /// Store `data` at the cursor and advance it. Returns the slot written.
    pub fn commit(&mut self, data: Bytes) -> usize {
        let idx = self.cursor;
        self.slots[idx] = Slot {
            data: Some(data),
            consumed: false,
        };
        self.last_committed = Some(idx);
        self.cursor = (self.cursor + 1) % self.slots.len();
        idx
    }

    /// Take the snapshot at `idx` if it has not been taken yet.
    pub fn take(&mut self, idx: usize) -> Option<Bytes> {
        let slot = self.slots.get_mut(idx)?;
        if slot.consumed {
            return None;
        }
        let data = slot.data.clone()?;
        slot.consumed = true;
        Some(data)
    }

    /// The most recently committed snapshot, taken or not.
    pub fn last(&self) -> Option<Bytes> {
        self.last_committed.and_then(|idx| self.slots[idx].data.clone())
    }

    /// Empty every slot and rewind the cursor.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::default());
        self.cursor = 0;
        self.last_committed = None;
    }
}
