//! Reindex scope flags.

use crate::error::{IndexingError, Result};

const METADATA: u8 = 0b0001;
const TEXT: u8 = 0b0010;
const PATH: u8 = 0b0100;
const SECURITY_GROUP: u8 = 0b1000;

/// Which index dimensions a reindex touches.
///
/// Four dimension bits travel on the wire as a 4-character binary string in
/// fixed order: metadata, full text, path, security group (`"1010"` selects
/// metadata and path). The force bit never travels with them; it is carried
/// separately because forced reindexing bypasses up-to-date checks rather
/// than selecting a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexFlags {
    bits: u8,
    /// Reindex even entries the engine believes are current.
    pub force: bool,
}

impl ReindexFlags {
    /// No dimensions selected.
    pub fn none() -> Self {
        Self {
            bits: 0,
            force: false,
        }
    }

    /// All four dimensions selected.
    pub fn all() -> Self {
        Self {
            bits: METADATA | TEXT | PATH | SECURITY_GROUP,
            force: false,
        }
    }

    pub fn metadata(&self) -> bool {
        self.bits & METADATA != 0
    }

    pub fn text(&self) -> bool {
        self.bits & TEXT != 0
    }

    pub fn path(&self) -> bool {
        self.bits & PATH != 0
    }

    pub fn security_group(&self) -> bool {
        self.bits & SECURITY_GROUP != 0
    }

    pub fn with_metadata(mut self, on: bool) -> Self {
        self.set(METADATA, on);
        self
    }

    pub fn with_text(mut self, on: bool) -> Self {
        self.set(TEXT, on);
        self
    }

    pub fn with_path(mut self, on: bool) -> Self {
        self.set(PATH, on);
        self
    }

    pub fn with_security_group(mut self, on: bool) -> Self {
        self.set(SECURITY_GROUP, on);
        self
    }

    pub fn with_force(mut self, on: bool) -> Self {
        self.force = on;
        self
    }

    fn set(&mut self, mask: u8, on: bool) {
        if on {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
    }

    /// Encodes the dimension bits as the 4-character wire string.
    pub fn to_wire(&self) -> String {
        [METADATA, TEXT, PATH, SECURITY_GROUP]
            .iter()
            .map(|mask| if self.bits & mask != 0 { '1' } else { '0' })
            .collect()
    }

    /// Decodes the 4-character wire string.
    pub fn from_wire(wire: &str) -> Result<Self> {
        if wire.len() != 4 {
            return Err(IndexingError::bad_attribute("flags", wire));
        }
        let mut flags = Self::none();
        for (c, mask) in wire.chars().zip([METADATA, TEXT, PATH, SECURITY_GROUP]) {
            match c {
                '1' => flags.bits |= mask,
                '0' => {}
                _ => return Err(IndexingError::bad_attribute("flags", wire)),
            }
        }
        Ok(flags)
    }
}

impl Default for ReindexFlags {
    fn default() -> Self {
        Self::all()
    }
}
