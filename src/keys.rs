//! Round-robin API key rotation.
//!
//! Processors configured with several API keys spread requests across them
//! instead of always using the first. The rotation index is tracked per
//! processor id and advances on every request for a key, whatever the
//! outcome of the call that uses it.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-processor round-robin key selector.
///
/// One instance is shared by every processor that rotates keys; rotation
/// state for different processor ids is independent.
#[derive(Debug, Default)]
pub struct KeyRotator {
    last_used: Mutex<HashMap<String, usize>>,
}

impl KeyRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key for `processor_id`, or `None` when `keys` is empty.
    ///
    /// The first call returns `keys[0]`; each following call moves one
    /// position forward and wraps at `keys.len()`.
    pub fn next_key<'k>(&self, processor_id: &str, keys: &'k [String]) -> Option<&'k str> {
        if keys.is_empty() {
            return None;
        }
        let mut last_used = self.last_used.lock();
        let index = match last_used.get(processor_id) {
            Some(&last) => (last + 1) % keys.len(),
            None => 0,
        };
        last_used.insert(processor_id.to_string(), index);
        Some(keys[index].as_str())
    }
}
