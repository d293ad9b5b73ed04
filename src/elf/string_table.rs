//! ELF string table builder.

use std::collections::HashMap;

/// Builder for `.strtab`/`.shstrtab`-style string tables: null-terminated
/// entries, leading null byte so offset 0 is the empty string, repeated
/// insertions deduplicated.
pub struct StringTable {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self { data: vec![0], offsets: HashMap::new() }
    }

    /// Add a string and return its table offset. Empty strings map to 0.
    pub fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&off) = self.offsets.get(s) {
            return off;
        }
        let off = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.offsets.insert(s.to_string(), off);
        off
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}
