// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Record Tracker: the in-RAM index of valid records, plus
//! the at-most-one in-flight INCOMING/OUTGOING pointers.
//!
//! Entries are addressed by arena index rather than raw pointer or
//! reference, so the `incoming`/`outgoing` pointers survive `deallocate`'s
//! compaction of the entry vector.

use erst_api::{ErstError, RECORD_ID_FIRST, RECORD_ID_INVALID};

/// One currently-tracked on-flash record: a valid or OUTGOING copy, or the
/// sole in-flight INCOMING/OUTGOING entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CperInfo {
    pub record_id: u64,
    pub record_length: u32,
    pub record_offset: u32,
}

/// Arena index into [`RecordTracker`]'s entry vector.
pub type RecordRef = u32;

pub struct RecordTracker {
    entries: Vec<CperInfo>,
    capacity: usize,
    incoming: Option<RecordRef>,
    outgoing: Option<RecordRef>,
}

impl RecordTracker {
    pub fn new(capacity: usize) -> Self {
        RecordTracker {
            entries: Vec::new(),
            capacity,
            incoming: None,
            outgoing: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, r: RecordRef) -> &CperInfo {
        &self.entries[r as usize]
    }

    pub fn incoming(&self) -> Option<RecordRef> {
        self.incoming
    }

    pub fn outgoing(&self) -> Option<RecordRef> {
        self.outgoing
    }

    pub fn set_incoming(&mut self, r: Option<RecordRef>) {
        self.incoming = r;
    }

    pub fn set_outgoing(&mut self, r: Option<RecordRef>) {
        self.outgoing = r;
    }

    /// Linear scan for a VALID record by id, explicitly skipping the
    /// INCOMING/OUTGOING slots: they are still in the entry vector but must
    /// not be found by id.
    pub fn find(&self, record_id: u64) -> Option<RecordRef> {
        if record_id == RECORD_ID_FIRST || record_id == RECORD_ID_INVALID {
            return None;
        }
        self.entries.iter().enumerate().find_map(|(i, e)| {
            let r = i as u32;
            if Some(r) == self.incoming || Some(r) == self.outgoing {
                return None;
            }
            (e.record_id == record_id).then_some(r)
        })
    }

    pub fn allocate_new(&mut self, info: CperInfo) -> Result<RecordRef, ErstError> {
        if self.entries.len() >= self.capacity {
            return Err(ErstError::OutOfResources);
        }
        self.entries.push(info);
        Ok((self.entries.len() - 1) as u32)
    }

    /// Removes the entry at `r`, preserving the relative order of
    /// surviving entries (callers rely on stable iteration order for
    /// `GetNext`/`GetStatus`) and adjusting `incoming`/`outgoing` if they
    /// lay at or after the removed index.
    pub fn deallocate(&mut self, r: RecordRef) {
        let idx = r as usize;
        self.entries.remove(idx);
        let fix = |p: Option<RecordRef>| -> Option<RecordRef> {
            p.and_then(|p| {
                use core::cmp::Ordering;
                match p.cmp(&r) {
                    Ordering::Less => Some(p),
                    Ordering::Equal => None,
                    Ordering::Greater => Some(p - 1),
                }
            })
        };
        self.incoming = fix(self.incoming);
        self.outgoing = fix(self.outgoing);
    }

    /// Overwrites the entry at `r` in place (used when a replace write
    /// reclaims the old record's slot for the new one) without disturbing
    /// ordering.
    pub fn replace_entry(&mut self, r: RecordRef, info: CperInfo) {
        self.entries[r as usize] = info;
    }

    /// Returns the id of the entry after the one with `current_id`,
    /// wrapping to index 0; `RECORD_ID_INVALID` when empty.
    /// Like `find`, the INCOMING/OUTGOING slots are invisible to this
    /// cursor.
    pub fn next_record_id(&self, current_id: u64) -> u64 {
        let visible: Vec<RecordRef> = (0..self.entries.len() as u32)
            .filter(|r| Some(*r) != self.incoming && Some(*r) != self.outgoing)
            .collect();
        if visible.is_empty() {
            return RECORD_ID_INVALID;
        }
        if current_id == RECORD_ID_FIRST {
            return self.entries[visible[0] as usize].record_id;
        }
        let pos = visible
            .iter()
            .position(|&r| self.entries[r as usize].record_id == current_id);
        match pos {
            Some(i) => {
                let next = (i + 1) % visible.len();
                self.entries[visible[next] as usize].record_id
            }
            None => RECORD_ID_INVALID,
        }
    }

    pub fn first_id(&self) -> u64 {
        self.next_record_id(RECORD_ID_FIRST)
    }

    pub fn iter_visible(&self) -> impl Iterator<Item = (RecordRef, &CperInfo)> {
        self.entries.iter().enumerate().filter_map(move |(i, e)| {
            let r = i as u32;
            if Some(r) == self.incoming || Some(r) == self.outgoing {
                None
            } else {
                Some((r, e))
            }
        })
    }

    pub fn all(&self) -> &[CperInfo] {
        &self.entries
    }
}
