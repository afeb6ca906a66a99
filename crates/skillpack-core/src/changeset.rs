//! Change detection between the current documents and a stored manifest.

use std::collections::BTreeMap;

use crate::models::{ChangeSet, ContentDigest, Manifest};

/// Classify every path seen in `current` or `previous`.
///
/// The keys of `current` are the current document paths and each digest's
/// `hash` is its current content hash. Pure: nothing is read or mutated.
/// Output lists are sorted, because both inputs are ordered maps.
pub fn detect(current: &BTreeMap<String, ContentDigest>, previous: &Manifest) -> ChangeSet {
    let mut set = ChangeSet::default();

    for (path, digest) in current {
        match previous.digests.get(path) {
            None => set.added.push(path.clone()),
            Some(old) if old.hash != digest.hash => set.modified.push(path.clone()),
            Some(old) => {
                if old.metadata_hash != digest.metadata_hash {
                    set.retagged.push(path.clone());
                }
                set.unchanged.push(path.clone());
            }
        }
    }

    set.deleted = previous
        .digests
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();

    tracing::debug!(
        added = set.added.len(),
        modified = set.modified.len(),
        deleted = set.deleted.len(),
        unchanged = set.unchanged.len(),
        retagged = set.retagged.len(),
        "detected changes"
    );
    set
}

impl ChangeSet {
    /// Paths whose content was added, modified or deleted.
    pub fn touched_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Size of the union of current and previous paths.
    pub fn total_paths(&self) -> usize {
        self.touched_count() + self.unchanged.len()
    }

    /// Nothing to ship: no content changes and no metadata touches.
    pub fn is_noop(&self) -> bool {
        self.touched_count() == 0 && self.retagged.is_empty()
    }

    /// Every path is new, i.e. there was no previous state at all.
    pub fn is_first_build(&self) -> bool {
        !self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.unchanged.is_empty()
    }

    /// Paths whose content must be shipped (`added ∪ modified`), sorted.
    pub fn content_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .added
            .iter()
            .chain(self.modified.iter())
            .map(String::as_str)
            .collect();
        paths.sort_unstable();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SemVer;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn digest(path: &str, hash: &str) -> ContentDigest {
        ContentDigest {
            path: path.to_string(),
            hash: hash.to_string(),
            size: hash.len() as u64,
            last_modified: Utc::now(),
            metadata_hash: None,
        }
    }

    fn current(entries: &[(&str, &str)]) -> BTreeMap<String, ContentDigest> {
        entries
            .iter()
            .map(|(p, h)| (p.to_string(), digest(p, h)))
            .collect()
    }

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        Manifest {
            version: SemVer::new(1, 0, 0),
            generated_at: Utc::now(),
            digests: current(entries),
            normalization: None,
        }
    }

    #[test]
    fn test_first_run_everything_added() {
        let set = detect(
            &current(&[("c.md", "3"), ("a.md", "1"), ("b.md", "2")]),
            &Manifest::empty(),
        );
        assert_eq!(set.added, vec!["a.md", "b.md", "c.md"]);
        assert!(set.modified.is_empty() && set.deleted.is_empty() && set.unchanged.is_empty());
        assert!(set.is_first_build());
    }

    #[test]
    fn test_modified_and_unchanged() {
        let prev = manifest(&[("a.md", "1"), ("b.md", "2"), ("c.md", "3")]);
        let set = detect(&current(&[("a.md", "1"), ("b.md", "2x"), ("c.md", "3")]), &prev);
        assert_eq!(set.modified, vec!["b.md"]);
        assert_eq!(set.unchanged, vec!["a.md", "c.md"]);
        assert!(set.added.is_empty() && set.deleted.is_empty());
        assert!(!set.is_first_build());
    }

    #[test]
    fn test_deleted() {
        let prev = manifest(&[("a.md", "1"), ("b.md", "2"), ("c.md", "3")]);
        let set = detect(&current(&[("a.md", "1"), ("b.md", "2")]), &prev);
        assert_eq!(set.deleted, vec!["c.md"]);
        assert_eq!(set.unchanged, vec!["a.md", "b.md"]);
        assert_eq!(set.total_paths(), 3);
    }

    #[test]
    fn test_identical_is_noop() {
        let prev = manifest(&[("a.md", "1"), ("b.md", "2")]);
        let set = detect(&current(&[("a.md", "1"), ("b.md", "2")]), &prev);
        assert!(set.is_noop());
        assert_eq!(set.unchanged, vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_metadata_only_is_retagged() {
        let prev = manifest(&[("a.md", "1")]);
        let mut cur = current(&[("a.md", "1")]);
        cur.get_mut("a.md").unwrap().metadata_hash = Some("m".into());
        let set = detect(&cur, &prev);
        assert_eq!(set.unchanged, vec!["a.md"]);
        assert_eq!(set.retagged, vec!["a.md"]);
        assert!(!set.is_noop());
        assert_eq!(set.touched_count(), 0);
    }

    #[test]
    fn test_sets_are_disjoint_and_cover_all_paths() {
        let prev = manifest(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        let cases = [
            current(&[]),
            current(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]),
            current(&[("a", "1"), ("b", "x"), ("f", "6"), ("g", "7")]),
            current(&[("z", "9")]),
        ];
        for cur in &cases {
            let set = detect(cur, &prev);
            let groups = [&set.added, &set.modified, &set.deleted, &set.unchanged];
            let mut seen = BTreeSet::new();
            for group in groups {
                for path in group {
                    assert!(seen.insert(path.clone()), "{} appears twice", path);
                }
            }
            let expected: BTreeSet<String> = cur
                .keys()
                .chain(prev.digests.keys())
                .cloned()
                .collect();
            assert_eq!(seen, expected);
            assert_eq!(set.total_paths(), expected.len());
        }
    }

    #[test]
    fn test_detect_does_not_mutate_inputs() {
        let prev = manifest(&[("a.md", "1")]);
        let cur = current(&[("b.md", "2")]);
        let (prev_before, cur_before) = (prev.clone(), cur.clone());
        let _ = detect(&cur, &prev);
        assert_eq!(prev, prev_before);
        assert_eq!(cur, cur_before);
    }
}
