//! Hierarchical stage addressing.
//!
//! Stage ids are paths whose segments are separated by `.` or `/`. Prefix
//! tests are segment-aware, so `a.b` descends from `a` while `ab` does not.

/// Segment separators accepted in stage ids.
pub const SEPARATORS: [char; 2] = ['.', '/'];

/// Anything addressable by a stage id.
pub trait StageAddress {
    fn stage_id(&self) -> &str;
}

impl StageAddress for str {
    fn stage_id(&self) -> &str {
        self
    }
}

impl StageAddress for String {
    fn stage_id(&self) -> &str {
        self
    }
}

impl<T: StageAddress + ?Sized> StageAddress for &T {
    fn stage_id(&self) -> &str {
        (**self).stage_id()
    }
}

/// Whether `candidate` lies strictly below `parent` in the result tree.
pub fn is_descendant(parent: &str, candidate: &str) -> bool {
    candidate.len() > parent.len()
        && candidate.starts_with(parent)
        && candidate[parent.len()..].starts_with(SEPARATORS)
}

/// The id one segment up, or `None` for a top-level id.
pub fn parent_id(id: &str) -> Option<&str> {
    id.rfind(SEPARATORS).map(|index| &id[..index])
}

/// The last segment of `id`, used as the result field name.
pub fn field_name(id: &str) -> &str {
    match id.rfind(SEPARATORS) {
        Some(index) => &id[index + 1..],
        None => id,
    }
}

/// Every proper ancestor of `id`, nearest first.
pub fn ancestors(id: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent_id(id), |current| parent_id(*current))
}

/// Number of segments in `id`.
pub fn depth(id: &str) -> usize {
    id.split(SEPARATORS).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descendant_test_respects_segments() {
        assert!(is_descendant("a", "a.b"));
        assert!(is_descendant("a", "a.b.c"));
        assert!(is_descendant("a", "a/b"));
        assert!(!is_descendant("a", "ab"));
        assert!(!is_descendant("a", "a"));
        assert!(!is_descendant("a.b", "a"));
    }

    #[test]
    fn splits_parent_and_field() {
        assert_eq!(parent_id("user/posts.title"), Some("user/posts"));
        assert_eq!(parent_id("user"), None);
        assert_eq!(field_name("user/posts.title"), "title");
        assert_eq!(field_name("user"), "user");
        assert_eq!(depth("user/posts.title"), 3);
    }

    #[test]
    fn ancestors_walk_towards_root() {
        let chain: Vec<&str> = ancestors("a.b.c").collect();
        assert_eq!(chain, vec!["a.b", "a"]);
        assert_eq!(ancestors("a").count(), 0);
    }
}
