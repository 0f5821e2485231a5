use std::collections::HashMap;

use super::process::{ProcessEntry, ProcessIdentity};

/// The full process table at one instant, plus the parent -> children adjacency.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub processes: HashMap<u32, ProcessEntry>,
    pub children: HashMap<u32, Vec<u32>>,
    /// Identities in enumeration order.
    pub listing: Vec<ProcessIdentity>,
}

impl Snapshot {
    pub fn from_entries(entries: Vec<ProcessEntry>) -> Self {
        let mut processes = HashMap::with_capacity(entries.len());
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut listing = Vec::with_capacity(entries.len());

        for entry in entries {
            // Child order follows enumeration order.
            children.entry(entry.ppid()).or_default().push(entry.pid());
            listing.push(entry.identity.clone());
            processes.insert(entry.pid(), entry);
        }

        Snapshot {
            processes,
            children,
            listing,
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.processes.get(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn children_of(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::process::entry;

    #[test]
    fn adjacency_keeps_enumeration_order() {
        let snapshot = Snapshot::from_entries(vec![
            entry(1, 0, "root"),
            entry(30, 1, "late"),
            entry(20, 1, "early"),
            entry(40, 30, "grandchild"),
        ]);

        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.children_of(1), &[30, 20]);
        assert_eq!(snapshot.children_of(30), &[40]);
        assert!(snapshot.children_of(40).is_empty());
        assert_eq!(snapshot.listing[1].name, "late");
    }

    #[test]
    fn orphans_are_kept() {
        let snapshot = Snapshot::from_entries(vec![entry(5, 9999, "orphan")]);
        assert!(snapshot.contains(5));
        assert_eq!(snapshot.children_of(9999), &[5]);
    }
}
