use std::collections::{HashSet, VecDeque};

use super::snapshot::Snapshot;

/// Breadth-first walk from `root_pid` over the snapshot's parent -> children
/// adjacency. `self_pid` is marked visited up front, so neither it nor anything
/// reachable only through it is ever returned.
///
/// Returns the matched pids in BFS level order. An absent root yields an empty
/// result; pids that vanished between discovery and processing are skipped.
pub fn resolve(snapshot: &Snapshot, root_pid: u32, self_pid: u32) -> Vec<u32> {
    let mut matched = Vec::new();
    if !snapshot.contains(root_pid) {
        return matched;
    }

    let mut visited = HashSet::new();
    visited.insert(self_pid);

    let mut queue = VecDeque::new();
    queue.push_back(root_pid);

    while let Some(pid) = queue.pop_front() {
        if !visited.insert(pid) {
            continue;
        }
        for &child in snapshot.children_of(pid) {
            if !visited.contains(&child) {
                queue.push_back(child);
            }
        }
        if snapshot.contains(pid) {
            matched.push(pid);
        }
    }

    matched
}
