//! One live gateway or worker per process.
//!
//! Builders claim a [`ProcessSlot`] before handing out their instance, and the
//! instance holds the [`SlotClaim`] for as long as it lives. The instance is
//! still passed around explicitly; the slot only records that one exists.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{InvMeshError, Result};

/// Process-wide marker for one kind of instance
#[derive(Debug)]
pub struct ProcessSlot {
    kind: &'static str,
    taken: AtomicBool,
}

impl ProcessSlot {
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            taken: AtomicBool::new(false),
        }
    }

    /// Take the slot, failing while another instance of this kind is alive
    pub fn claim(&'static self) -> Result<SlotClaim> {
        self.taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                InvMeshError::config_error(format!("a {} is already running in this process", self.kind))
            })?;
        Ok(SlotClaim { slot: self })
    }

    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::Acquire)
    }
}

/// Held by a built instance; frees the slot on drop
#[derive(Debug)]
pub struct SlotClaim {
    slot: &'static ProcessSlot,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.slot.taken.store(false, Ordering::Release);
    }
}
