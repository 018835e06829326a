//! Group membership lookup, consumed by the ACL resolver for
//! `group:<url>` entries.

use std::collections::{HashMap, HashSet};

/// Answers whether a subject belongs to a named group.
pub trait GroupLookup: Send + Sync {
    /// `group_url` is the full pattern from the ACL entry, including the
    /// `group:` prefix.
    fn is_member(&self, group_url: &str, subject: &str) -> bool;
}

/// Lookup that knows no groups. The default when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGroups;

impl GroupLookup for NoGroups {
    fn is_member(&self, _group_url: &str, _subject: &str) -> bool {
        false
    }
}

/// In-memory group table, keyed by the full `group:<url>` string.
#[derive(Debug, Default)]
pub struct MapGroups {
    groups: HashMap<String, HashSet<String>>,
}

impl MapGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `subject` to `group_url`, creating the group if needed.
    pub fn add(&mut self, group_url: &str, subject: &str) {
        self.groups
            .entry(group_url.to_string())
            .or_default()
            .insert(subject.to_string());
    }
}

impl GroupLookup for MapGroups {
    fn is_member(&self, group_url: &str, subject: &str) -> bool {
        self.groups
            .get(group_url)
            .is_some_and(|members| members.contains(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_groups_denies_everything() {
        assert!(!NoGroups.is_member("group:http://x/admins", "unix:alice"));
    }

    #[test]
    fn test_map_groups_membership() {
        let mut g = MapGroups::new();
        g.add("group:http://x/admins", "unix:alice");
        assert!(g.is_member("group:http://x/admins", "unix:alice"));
        assert!(!g.is_member("group:http://x/admins", "unix:bob"));
        assert!(!g.is_member("group:http://x/others", "unix:alice"));
    }
}
