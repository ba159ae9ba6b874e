use std::collections::HashMap;

use crate::AttributeId;

use super::PollValue;

/// Scratch space shared by the stages of one attribute's chain
///
/// Keys are namespaced per attribute. Everything stored for an attribute
/// is dropped by [`PollerBuffer::finalize`] once its cycle is done.
#[derive(Debug, Default)]
pub struct PollerBuffer {
    entries: HashMap<AttributeId, HashMap<String, PollValue>>,
}

impl PollerBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, attribute_id: AttributeId, key: impl Into<String>, value: PollValue) {
        self.entries
            .entry(attribute_id)
            .or_default()
            .insert(key.into(), value);
    }

    pub fn get(&self, attribute_id: AttributeId, key: &str) -> Option<&PollValue> {
        self.entries.get(&attribute_id)?.get(key)
    }

    pub fn finalize(&mut self, attribute_id: AttributeId) {
        self.entries.remove(&attribute_id);
    }

    /// Number of attributes holding data
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
