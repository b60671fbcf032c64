//! Persistent fault log.
//!
//! Fatal faults are written to a small ring buffer in persistent storage
//! before the supervisor performs the hard reset, so the failure reason
//! survives the restart. Best-effort: every write error here is swallowed,
//! a failing fault log must never mask the fault being logged.

use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;

const FAULT_RING_SLOTS: usize = 4;
const FAULT_NAMESPACE: &str = "fault";
const INDEX_KEY: &str = "idx";

/// One logged fatal fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEntry {
    /// Wall-clock seconds at the time of the fault (0 if never synced).
    pub ts: u64,
    pub reason: heapless::String<96>,
}

impl FaultEntry {
    pub fn new(ts: u64, reason: &str) -> Self {
        let mut end = reason.len().min(95);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut r = heapless::String::new();
        let _ = r.push_str(&reason[..end]);
        Self { ts, reason: r }
    }
}

/// Storage-backed ring buffer of [`FaultEntry`]s.
#[derive(Default)]
pub struct FaultLog {
    write_index: usize,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the write index from storage, or start at 0.
    pub fn init(&mut self, storage: &dyn StoragePort) {
        let mut buf = [0u8; 4];
        if let Ok(4) = storage.read(FAULT_NAMESPACE, INDEX_KEY, &mut buf) {
            self.write_index = u32::from_le_bytes(buf) as usize % FAULT_RING_SLOTS;
        }
    }

    /// Append an entry to the next ring slot and advance the index.
    pub fn record(&mut self, storage: &mut dyn StoragePort, entry: &FaultEntry) {
        let slot_key = Self::slot_key(self.write_index);
        if let Ok(bytes) = postcard::to_allocvec(entry) {
            let _ = storage.write(FAULT_NAMESPACE, &slot_key, &bytes);
        }

        self.write_index = (self.write_index + 1) % FAULT_RING_SLOTS;
        let idx_bytes = (self.write_index as u32).to_le_bytes();
        let _ = storage.write(FAULT_NAMESPACE, INDEX_KEY, &idx_bytes);
    }

    /// Read every stored entry (up to the ring size).
    pub fn read_all(&self, storage: &dyn StoragePort) -> heapless::Vec<FaultEntry, FAULT_RING_SLOTS> {
        let mut entries = heapless::Vec::new();
        for i in 0..FAULT_RING_SLOTS {
            let slot_key = Self::slot_key(i);
            let mut buf = [0u8; 160];
            if let Ok(len) = storage.read(FAULT_NAMESPACE, &slot_key, &mut buf) {
                if let Ok(entry) = postcard::from_bytes::<FaultEntry>(&buf[..len]) {
                    let _ = entries.push(entry);
                }
            }
        }
        entries
    }

    /// Erase all entries and reset the index.
    pub fn clear(&mut self, storage: &mut dyn StoragePort) {
        for i in 0..FAULT_RING_SLOTS {
            let _ = storage.delete(FAULT_NAMESPACE, &Self::slot_key(i));
        }
        let _ = storage.delete(FAULT_NAMESPACE, INDEX_KEY);
        self.write_index = 0;
    }

    fn slot_key(index: usize) -> heapless::String<16> {
        let mut s = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("e{}", index));
        s
    }
}
