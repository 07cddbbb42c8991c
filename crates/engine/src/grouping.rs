//! Partition a pre-ordered stage sequence into parent/descendant blocks.
//!
//! The grouper trusts input order. Each stage is visited once, either as a
//! parent or as a member of exactly one descendant block, so a full walk is
//! linear in the number of stages.

use crate::stage::{StageAddress, is_descendant};

/// Length of the contiguous run at the start of `following` that descends
/// from `parent`.
pub fn descendant_count<S: StageAddress>(parent: &str, following: &[S]) -> usize {
    following
        .iter()
        .take_while(|stage| is_descendant(parent, stage.stage_id()))
        .count()
}

/// Iterator over `(parent, descendant block)` pairs.
#[derive(Debug, Clone)]
pub struct ParentGroups<'a, S> {
    stages: &'a [S],
    cursor: usize,
}

impl<'a, S: StageAddress> ParentGroups<'a, S> {
    pub fn new(stages: &'a [S]) -> Self {
        Self { stages, cursor: 0 }
    }
}

impl<'a, S: StageAddress> Iterator for ParentGroups<'a, S> {
    type Item = (&'a S, &'a [S]);

    fn next(&mut self) -> Option<Self::Item> {
        let parent = self.stages.get(self.cursor)?;
        let start = self.cursor + 1;
        let block = descendant_count(parent.stage_id(), &self.stages[start..]);
        self.cursor = start + block;
        Some((parent, &self.stages[start..start + block]))
    }
}

/// Invoke `callback` with every top-level parent and its descendant block.
pub fn iter_parent_stages<S, F>(stages: &[S], mut callback: F)
where
    S: StageAddress,
    F: FnMut(&S, &[S]),
{
    for (parent, block) in ParentGroups::new(stages) {
        callback(parent, block);
    }
}

/// Members of `block` whose nearest ancestor within the block is `parent`.
pub fn direct_children<'a, S: StageAddress>(parent: &str, block: &'a [S]) -> Vec<&'a S> {
    let mut children = Vec::new();
    let mut index = 0;
    while index < block.len() {
        let child = &block[index];
        if is_descendant(parent, child.stage_id()) {
            children.push(child);
        }
        index += 1 + descendant_count(child.stage_id(), &block[index + 1..]);
    }
    children
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(ids: &[&str]) -> Vec<(String, Vec<String>)> {
        let mut seen = Vec::new();
        iter_parent_stages(ids, |parent, block| {
            seen.push((parent.to_string(), block.iter().map(|id| id.to_string()).collect()));
        });
        seen
    }

    #[test]
    fn groups_nested_and_top_level_stages() {
        let seen = groups(&["a", "a.b", "a.c", "d"]);
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), vec!["a.b".to_string(), "a.c".to_string()]),
                ("d".to_string(), Vec::new()),
            ]
        );
    }

    #[test]
    fn flat_sequence_yields_empty_blocks() {
        let seen = groups(&["x", "y", "z"]);
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, block)| block.is_empty()));
    }

    #[test]
    fn transitive_descendants_stay_in_one_block() {
        let seen = groups(&["a", "a.b", "a.b.c", "a.d", "ab", "e/f"]);
        assert_eq!(seen[0].1, vec!["a.b", "a.b.c", "a.d"]);
        assert_eq!(seen[1], ("ab".to_string(), Vec::new()));
        assert_eq!(seen[2], ("e/f".to_string(), Vec::new()));
    }

    #[test]
    fn every_stage_is_visited_exactly_once() {
        let ids = ["q", "q.a", "q.a.x", "q.b", "r", "r.a", "s"];
        let mut visited = Vec::new();
        for (parent, block) in ParentGroups::new(&ids) {
            visited.push(*parent);
            visited.extend(block.iter().copied());
        }
        assert_eq!(visited, ids);
    }

    #[test]
    fn empty_sequence_yields_nothing() {
        let ids: [&str; 0] = [];
        assert_eq!(ParentGroups::new(&ids).count(), 0);
    }

    #[test]
    fn direct_children_skip_grandchildren() {
        let block = ["a.b", "a.b.c", "a.b.c.d", "a.e"];
        let children: Vec<&str> = direct_children("a", &block).into_iter().copied().collect();
        assert_eq!(children, vec!["a.b", "a.e"]);
    }
}
