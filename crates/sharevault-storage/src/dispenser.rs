//! Lexicographic container name dispenser.

use std::sync::Mutex;

use sharevault_proto::{ContainerName, CONTAINER_NAME_SIZE};

use crate::error::{StorageError, StorageResult};

/// Dispenses globally unique 16-letter container names in lexicographic
/// order: 'aaaa…a', 'baaa…a', 'caaa…a', …, carrying left to right.
pub struct NameDispenser {
    next: Mutex<[u8; CONTAINER_NAME_SIZE]>,
}

impl Default for NameDispenser {
    fn default() -> Self {
        Self::new()
    }
}

impl NameDispenser {
    /// Start at 'aaaa…a'.
    pub fn new() -> Self {
        NameDispenser {
            next: Mutex::new([b'a'; CONTAINER_NAME_SIZE]),
        }
    }

    /// Return the current name and advance. Advancing increments the
    /// leftmost non-'z' position and resets everything to its left to 'a'.
    /// An all-'z' state means the name space is exhausted, which is fatal.
    pub fn get(&self) -> StorageResult<ContainerName> {
        let mut next = self.next.lock().map_err(|_| StorageError::Poisoned {
            what: "name dispenser",
        })?;
        let current = ContainerName(*next);
        match next.iter().position(|&c| c != b'z') {
            Some(pos) => {
                next[pos] += 1;
                next[..pos].fill(b'a');
            }
            None => return Err(StorageError::NamesExhausted),
        }
        Ok(current)
    }
}
