use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use tracing::debug;

use crate::{
    approval::{self, ChangeStatus, Verdict, Votes},
    cache::{CacheKey, OwnersCache},
    config::Config,
    identity::IdentityResolver,
    index::{IndexBuilder, OwnersIndex},
    repo::RepoReader,
    weights::RankedOwner,
};

/// A patchset of a change under review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: u64,
    pub patchset: u32,
    pub project: String,
    pub branch: String,
    pub status: ChangeStatus,
    /// Set when an administrator waived owner approval.
    pub bypass: bool,
}

impl Change {
    pub fn new(id: u64, patchset: u32, project: &str, branch: &str) -> Self {
        Self {
            id,
            patchset,
            project: project.to_owned(),
            branch: branch.to_owned(),
            status: ChangeStatus::New,
            bypass: false,
        }
    }

    pub fn with_status(mut self, status: ChangeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn is_exempt(&self) -> bool {
        self.bypass || self.status.is_closed()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.id, self.patchset, &self.branch)
    }
}

/// Resolves owners and checks approval for changes, caching one
/// [`OwnersIndex`] per patchset.
pub struct OwnersService<R, I> {
    reader: R,
    identities: I,
    config: Config,
    cache: OwnersCache,
}

impl<R: RepoReader, I: IdentityResolver> OwnersService<R, I> {
    pub fn new(reader: R, identities: I, config: Config) -> Self {
        let cache = OwnersCache::new(config.max_cache_size, config.max_cache_age);
        Self {
            reader,
            identities,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// The index for `change`, built from `files` on the first request for
    /// its patchset and served from the cache after that. A cached index that
    /// never loaded the directories of `files` is rebuilt for both file sets.
    pub fn index<F: AsRef<str>>(&self, change: &Change, files: &[F]) -> Arc<OwnersIndex> {
        let key = change.cache_key();
        let index = self
            .cache
            .get_or_insert_with(key.clone(), || self.build_index(change, files));
        if index.covers(files) {
            return index;
        }
        debug!(change = change.id, patchset = change.patchset, "extending owners index");
        let all = index
            .files()
            .iter()
            .map(String::as_str)
            .chain(files.iter().map(|f| f.as_ref()))
            .collect::<Vec<_>>();
        self.cache.insert(key, self.build_index(change, &all))
    }

    fn build_index<F: AsRef<str>>(&self, change: &Change, files: &[F]) -> OwnersIndex {
        debug!(change = change.id, patchset = change.patchset, "building owners index");
        IndexBuilder::new(&self.reader, &self.identities)
            .owners_file(&self.config.owners_file_name)
            .build(&change.project, &change.branch, files)
    }

    pub fn resolve_owners<F: AsRef<str>>(
        &self,
        change: &Change,
        files: &[F],
    ) -> BTreeMap<String, BTreeSet<String>> {
        self.index(change, files).owners_for(files)
    }

    pub fn ranked_owners<F: AsRef<str>>(&self, change: &Change, files: &[F]) -> Vec<RankedOwner> {
        self.index(change, files)
            .owners_and_weights_for(files)
            .ranked()
    }

    pub fn check_approval<F: AsRef<str>>(
        &self,
        change: &Change,
        files: &[F],
        votes: &Votes,
        min_vote: i32,
    ) -> Verdict {
        if change.is_exempt() {
            return Verdict::NotRequired;
        }
        let index = self.index(change, files);
        let verdict =
            approval::check_change(&index, files, votes, min_vote, change.status, change.bypass);
        debug!(change = change.id, patchset = change.patchset, %verdict, "checked owner approval");
        verdict
    }

    /// [`OwnersService::check_approval`] at the configured minimum vote.
    pub fn check_approval_default<F: AsRef<str>>(
        &self,
        change: &Change,
        files: &[F],
        votes: &Votes,
    ) -> Verdict {
        self.check_approval(change, files, votes, self.config.min_owner_vote_level)
    }

    pub fn configure_cache(&self, max_entries: usize, max_age: Duration) {
        self.cache.configure(max_entries, max_age);
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{identity::Verbatim, repo::MemoryReader};

    fn service(reader: MemoryReader) -> OwnersService<MemoryReader, Verbatim> {
        OwnersService::new(reader, Verbatim, Config::default())
    }

    fn reader() -> MemoryReader {
        MemoryReader::new()
            .with_file("p", "refs/heads/main", "OWNERS", "x@x\n")
            .with_file("p", "refs/heads/main", "d1/OWNERS", "a@a\nper-file *.c=c@c\n")
            .with_file("p", "refs/heads/main", "d2/OWNERS", "*\n")
    }

    #[test]
    fn test_resolve_owners_is_cached() {
        let service = service(reader());
        let change = Change::new(1, 1, "p", "refs/heads/main");
        let files = ["d1/t.c", "d1/t.h"];

        let first = service.resolve_owners(&change, &files);
        let reads = service.reader().reads();
        let again = service.resolve_owners(&change, &files);
        let short = service.resolve_owners(&Change::new(1, 1, "p", "main"), &files);

        assert_eq!(first, again);
        assert_eq!(first, short);
        assert_eq!(service.reader().reads(), reads);
        assert_eq!(service.cache_size(), 1);
        assert_eq!(
            first["./d1/t.c"],
            BTreeSet::from(["a@a".to_owned(), "c@c".to_owned(), "x@x".to_owned()])
        );
    }

    #[test]
    fn test_later_files_see_their_own_directories() {
        let reader = MemoryReader::new()
            .with_file("p", "refs/heads/main", "OWNERS", "x@x\n")
            .with_file("p", "refs/heads/main", "d3/OWNERS", "set noparent\nd@d\n");
        let service = service(reader);
        let change = Change::new(5, 1, "p", "refs/heads/main");
        let only_x = [("x@x".to_owned(), 1)].into_iter().collect::<Votes>();

        assert_eq!(
            service.resolve_owners(&change, &["t.c"])["./t.c"],
            BTreeSet::from(["x@x".to_owned()])
        );
        assert_eq!(
            service.resolve_owners(&change, &["d3/t.c"])["./d3/t.c"],
            BTreeSet::from(["d@d".to_owned()])
        );
        assert_eq!(
            service.check_approval_default(&change, &["d3/t.c"], &only_x),
            Verdict::Missing
        );
        assert_eq!(
            service.check_approval_default(&change, &["t.c"], &only_x),
            Verdict::Approved
        );

        // The extended index serves both file sets without further reads.
        let reads = service.reader().reads();
        service.resolve_owners(&change, &["t.c", "d3/u.c"]);
        assert_eq!(service.reader().reads(), reads);
        assert_eq!(service.cache_size(), 1);
    }

    #[test]
    fn test_new_patchset_rebuilds() {
        let service = service(reader());
        service.resolve_owners(&Change::new(1, 1, "p", "refs/heads/main"), &["t.c"]);
        service.resolve_owners(&Change::new(1, 2, "p", "refs/heads/main"), &["t.c"]);
        assert_eq!(service.cache_size(), 2);

        service.configure_cache(0, Duration::from_secs(30));
        assert_eq!(service.cache_size(), 0);
    }

    #[test]
    fn test_concurrent_requests_build_once() {
        let service = service(reader());
        let change = Change::new(1, 1, "p", "refs/heads/main");
        let files = ["d1/t.c", "d2/t.c"];

        let results = thread::scope(|s| {
            let (service, change, files) = (&service, &change, &files);
            let handles = (0..4)
                .map(|_| s.spawn(move || service.resolve_owners(change, files)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert!(results.iter().all(|r| r == &results[0]));
        // d1/OWNERS, OWNERS and d2/OWNERS, read by a single build.
        assert_eq!(service.reader().reads(), 3);
    }

    #[test]
    fn test_ranked_owners() {
        let service = service(reader());
        let change = Change::new(2, 1, "p", "refs/heads/main");
        let ranked = service.ranked_owners(&change, &["d1/t.c", "d1/t.h", "t.c"]);
        let order = ranked
            .iter()
            .map(|o| (o.identity.as_str(), o.levels))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            [
                ("a@a", [2, 0, 0]),
                ("x@x", [1, 2, 0]),
                ("c@c", [1, 0, 0]),
            ]
        );
    }

    #[test]
    fn test_check_approval() {
        let service = service(reader());
        let change = Change::new(3, 1, "p", "refs/heads/main");
        let files = ["d1/t.c", "d2/t.c"];
        let votes = |v: &[(&str, i32)]| v.iter().map(|(k, v)| (k.to_string(), *v)).collect::<Votes>();

        assert_eq!(
            service.check_approval_default(&change, &files, &votes(&[("a@a", 1)])),
            Verdict::Approved
        );
        assert_eq!(
            service.check_approval_default(&change, &files, &votes(&[("a@a", 1), ("c@c", -1)])),
            Verdict::Missing
        );
        assert_eq!(
            service.check_approval(&change, &files, &votes(&[("a@a", 1)]), 2),
            Verdict::Missing
        );
        assert_eq!(
            service.check_approval(&change, &["d2/t.c"], &votes(&[]), 2),
            Verdict::Approved
        );
        assert_eq!(
            service.check_approval(&change.clone().with_bypass(true), &files, &votes(&[]), 1),
            Verdict::NotRequired
        );
        assert_eq!(
            service.check_approval(
                &change.clone().with_status(ChangeStatus::Abandoned),
                &files,
                &votes(&[]),
                1
            ),
            Verdict::NotRequired
        );
    }

    #[test]
    fn test_unknown_branch_needs_no_approval() {
        let service = service(reader());
        let change = Change::new(4, 1, "p", "refs/heads/dev");
        assert_eq!(
            service.check_approval_default(&change, &["d1/t.c"], &Votes::new()),
            Verdict::NotRequired
        );
        assert_eq!(service.index(&change, &["d1/t.c"]).count_owners(), 0);
    }
}
