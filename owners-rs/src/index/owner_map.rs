use std::collections::{BTreeMap, BTreeSet};

/// Scope to owners, and owner to scopes. Both directions are only ever
/// written together through [`OwnerMap::insert`], so they always agree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerMap {
    path_to_owners: BTreeMap<String, BTreeSet<String>>,
    owner_to_paths: BTreeMap<String, BTreeSet<String>>,
}

impl OwnerMap {
    /// Record `owner` for `scope`. Returns false if it was already there.
    pub(crate) fn insert(&mut self, scope: &str, owner: &str) -> bool {
        let added = self
            .path_to_owners
            .entry(scope.to_owned())
            .or_default()
            .insert(owner.to_owned());
        self.owner_to_paths
            .entry(owner.to_owned())
            .or_default()
            .insert(scope.to_owned());
        added
    }

    pub fn owners(&self, scope: &str) -> Option<&BTreeSet<String>> {
        self.path_to_owners.get(scope)
    }

    pub fn scopes(&self, owner: &str) -> Option<&BTreeSet<String>> {
        self.owner_to_paths.get(owner)
    }

    pub fn path_to_owners(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.path_to_owners
    }

    pub fn owner_to_paths(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.owner_to_paths
    }

    pub fn is_empty(&self) -> bool {
        self.path_to_owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions_agree() {
        let mut map = OwnerMap::default();
        assert!(map.insert("./", "x@x"));
        assert!(map.insert("./d1/", "a@a"));
        assert!(map.insert("./d1/*.c", "a@a"));
        assert!(!map.insert("./d1/", "a@a"));

        assert_eq!(map.owners("./d1/"), Some(&BTreeSet::from(["a@a".to_owned()])));
        assert_eq!(
            map.scopes("a@a"),
            Some(&BTreeSet::from(["./d1/".to_owned(), "./d1/*.c".to_owned()]))
        );
        assert_eq!(map.owners("./d2/"), None);

        for (scope, owners) in map.path_to_owners() {
            assert!(!owners.is_empty());
            for owner in owners {
                assert!(map.owner_to_paths()[owner].contains(scope));
            }
        }
        for (owner, scopes) in map.owner_to_paths() {
            for scope in scopes {
                assert!(map.path_to_owners()[scope].contains(owner));
            }
        }
    }
}
