//! Fork forest over registry entries
//!
//! Built in a single pass over `(id, parent)` pairs, never by following
//! parent links, so a malformed parent cycle cannot loop.

use std::collections::{HashMap, HashSet};

/// Parent/child view of the background sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkForest {
    /// Entries without a parent, or whose parent is not in the registry
    pub roots: Vec<String>,
    /// Children of each parent, in registry order
    pub children: HashMap<String, Vec<String>>,
}

impl ForkForest {
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Depth-first walk from the roots as `(depth, id)` pairs.
    ///
    /// Each id is yielded at most once. Entries only reachable through a
    /// parent cycle have no root and are not yielded.
    pub fn walk(&self) -> Vec<(usize, &str)> {
        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(usize, &str)> =
            self.roots.iter().rev().map(|id| (0, id.as_str())).collect();

        while let Some((depth, id)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            out.push((depth, id));
            for child in self.children_of(id).iter().rev() {
                stack.push((depth + 1, child.as_str()));
            }
        }
        out
    }
}

/// Build the forest from `(id, parent_id)` pairs in registry order
pub fn build_forest<'a, I>(entries: I) -> ForkForest
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let entries: Vec<(&str, Option<&str>)> = entries.into_iter().collect();
    let ids: HashSet<&str> = entries.iter().map(|(id, _)| *id).collect();

    let mut forest = ForkForest::default();
    for (id, parent) in entries {
        match parent {
            Some(parent) if parent != id && ids.contains(parent) => {
                forest
                    .children
                    .entry(parent.to_string())
                    .or_default()
                    .push(id.to_string());
            }
            _ => forest.roots.push(id.to_string()),
        }
    }
    forest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_child() {
        let forest = build_forest([("a", None), ("b", Some("a")), ("c", Some("a"))]);
        assert_eq!(forest.roots, vec!["a"]);
        assert_eq!(forest.children_of("a"), ["b", "c"]);
        assert_eq!(forest.walk(), vec![(0, "a"), (1, "b"), (1, "c")]);
    }

    #[test]
    fn test_missing_parent_becomes_root() {
        let forest = build_forest([("b", Some("gone")), ("c", Some("b"))]);
        assert_eq!(forest.roots, vec!["b"]);
        assert_eq!(forest.walk(), vec![(0, "b"), (1, "c")]);
    }

    #[test]
    fn test_self_parent_is_root() {
        let forest = build_forest([("a", Some("a"))]);
        assert_eq!(forest.roots, vec!["a"]);
        assert!(forest.children.is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let forest = build_forest([("a", Some("b")), ("b", Some("a")), ("c", None)]);
        assert_eq!(forest.roots, vec!["c"]);
        assert_eq!(forest.children_of("a"), ["b"]);
        assert_eq!(forest.children_of("b"), ["a"]);
        assert_eq!(forest.walk(), vec![(0, "c")]);
    }
}
