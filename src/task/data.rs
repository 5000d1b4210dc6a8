use serde::{Deserialize, Serialize};

use super::name::TaskName;

/// One message between two tasks. The tag multiplexes several logical
/// channels between the same pair of tasks, e.g. one per face or one per
/// iteration. The payload is opaque to the runtime.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    source: TaskName,
    recipient: TaskName,
    tag: i32,
    buffer: Vec<u8>,
}

impl Data {
    pub fn new(source: TaskName, recipient: TaskName, tag: i32, buffer: Vec<u8>) -> Self {
        Self {
            source,
            recipient,
            tag,
            buffer,
        }
    }

    pub fn source(&self) -> TaskName {
        self.source
    }

    pub fn recipient(&self) -> TaskName {
        self.recipient
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: i32) {
        self.tag = tag
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
