// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use crate::processor::ProcId;

/// Processors sharing a chain position, running in parallel.
pub type Slot = Vec<ProcId>;

/// An ordered list of slots, running in series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotList {
    slots: Vec<Slot>,
}

impl SlotList {
    pub fn new() -> SlotList {
        SlotList::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn last(&self) -> Option<&Slot> {
        self.slots.last()
    }

    /// All processors in slot order.
    pub fn processors(&self) -> impl Iterator<Item = ProcId> + '_ {
        self.slots.iter().flatten().copied()
    }

    pub fn processor_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.len()).sum()
    }

    /// Returns the slot index and position within the slot of a processor.
    pub fn find(&self, id: ProcId) -> Option<(usize, usize)> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.iter()
                .position(|proc_id| *proc_id == id)
                .map(|position| (index, position))
        })
    }

    /// Inserts a new slot. The index is clamped to the end of the list.
    pub fn insert_slot(&mut self, index: usize, slot: Slot) -> usize {
        let index = index.min(self.slots.len());
        self.slots.insert(index, slot);
        index
    }

    /// Adds a processor in parallel to the existing slot at `index`.
    pub fn push_parallel(&mut self, index: usize, id: ProcId) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.push(id);
        }
    }

    /// Removes a processor. Returns its slot index and whether the slot was dropped
    /// because it became empty.
    pub fn remove(&mut self, id: ProcId) -> Option<(usize, bool)> {
        let (index, position) = self.find(id)?;
        self.slots[index].remove(position);
        if self.slots[index].is_empty() {
            self.slots.remove(index);
            Some((index, true))
        } else {
            Some((index, false))
        }
    }

    /// Removes a whole slot.
    pub fn remove_slot(&mut self, index: usize) -> Option<Slot> {
        if index < self.slots.len() {
            Some(self.slots.remove(index))
        } else {
            None
        }
    }

    /// Swaps the processors at two positions.
    pub fn swap(&mut self, a: (usize, usize), b: (usize, usize)) {
        let first = self.slots[a.0][a.1];
        self.slots[a.0][a.1] = self.slots[b.0][b.1];
        self.slots[b.0][b.1] = first;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl From<Vec<Slot>> for SlotList {
    fn from(slots: Vec<Slot>) -> Self {
        SlotList {
            slots: slots.into_iter().filter(|slot| !slot.is_empty()).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_remove_drops_empty_slot() {
        let mut slots = SlotList::from(vec![vec![1, 2], vec![3]]);
        assert_eq!(slots.remove(2), Some((0, false)));
        assert_eq!(slots.remove(3), Some((1, true)));
        assert_eq!(slots.slots(), &[vec![1]]);
        assert_eq!(slots.remove(9), None);
    }

    #[test]
    fn test_find_and_swap() {
        let mut slots = SlotList::from(vec![vec![1], vec![2, 3]]);
        assert_eq!(slots.find(3), Some((1, 1)));
        slots.swap((0, 0), (1, 1));
        assert_eq!(slots.slots(), &[vec![3], vec![2, 1]]);
        assert_eq!(slots.processors().collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(slots.processor_count(), 3);
    }

    #[test]
    fn test_insert_slot_clamps() {
        let mut slots = SlotList::new();
        assert_eq!(slots.insert_slot(5, vec![1]), 0);
        assert_eq!(slots.insert_slot(0, vec![2]), 0);
        assert_eq!(slots.slots(), &[vec![2], vec![1]]);
    }
}
