//! Request slots: correlation between work units and backend events
//!
//! A slot's event tag encodes `(generation << 32) | index`, so a completion
//! routes straight back to its slot and a completion from an earlier use of
//! the same slot is recognised as stale.

use std::collections::TryReserveError;

use crate::backend::Event;

use super::work_unit::WorkUnit;

#[derive(Debug)]
pub(crate) struct RequestSlot {
    pub unit: Option<WorkUnit>,
    pub event: Option<Event>,
    /// Set once per submission, when its completion has been processed
    pub complete: bool,
    generation: u32,
    index: u32,
}

impl RequestSlot {
    pub fn tag(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

/// Fixed pool of `queue_depth` slots
#[derive(Debug)]
pub(crate) struct SlotPool {
    slots: Vec<RequestSlot>,
    free: Vec<usize>,
}

impl SlotPool {
    pub fn with_depth(depth: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(depth)?;
        let mut free = Vec::new();
        free.try_reserve_exact(depth)?;

        for index in 0..depth {
            slots.push(RequestSlot {
                unit: None,
                event: None,
                complete: true,
                generation: 0,
                index: index as u32,
            });
        }
        free.extend((0..depth).rev());
        Ok(Self { slots, free })
    }

    /// Take a free slot for a new submission
    pub fn claim(&mut self) -> Option<usize> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.complete = false;
        Some(index)
    }

    pub fn recycle(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.unit = None;
        slot.event = None;
        slot.complete = true;
        self.free.push(index);
    }

    pub fn get_mut(&mut self, index: usize) -> &mut RequestSlot {
        &mut self.slots[index]
    }

    /// Resolve an event tag to the slot index it was issued for
    pub fn resolve(&self, tag: u64) -> Option<usize> {
        let index = (tag & 0xFFFF_FFFF) as usize;
        let slot = self.slots.get(index)?;
        (slot.generation == (tag >> 32) as u32).then_some(index)
    }

    pub fn is_complete(&self, index: usize) -> bool {
        self.slots[index].complete
    }

    /// Slots currently holding a submission
    pub fn outstanding(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Drop every unit still parked in a slot
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        for index in 0..self.slots.len() {
            if self.slots[index].unit.is_some() {
                dropped += 1;
            }
            if !self.free.contains(&index) {
                self.recycle(index);
            }
        }
        dropped
    }
}
