use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Xref {
    /// Entries for indirect objects.
    pub entries: BTreeMap<u32, XrefEntry>,

    /// Total number of entries (including free entries), equal to the highest object number plus 1.
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XrefEntry {
    Free,
    Normal { offset: u32, generation: u16 },
    Compressed { container: u32, index: u16 },
}

impl Xref {
    pub fn new(size: u32) -> Xref {
        Xref {
            entries: BTreeMap::new(),
            size,
        }
    }

    pub fn get(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    /// Add entries of an older section, never replacing newer ones.
    pub fn merge(&mut self, xref: Xref) {
        for (id, entry) in xref.entries {
            self.entries.entry(id).or_insert(entry);
        }
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_sections_win() {
        let mut newer = Xref::new(3);
        newer.insert(1, XrefEntry::Normal { offset: 900, generation: 0 });
        let mut older = Xref::new(3);
        older.insert(1, XrefEntry::Normal { offset: 15, generation: 0 });
        older.insert(2, XrefEntry::Normal { offset: 60, generation: 0 });

        newer.merge(older);
        assert_eq!(newer.get(1), Some(&XrefEntry::Normal { offset: 900, generation: 0 }));
        assert_eq!(newer.max_id(), 2);
    }
}
