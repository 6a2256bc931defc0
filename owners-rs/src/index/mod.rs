//! The ownership index for one revision.
//!
//! [`IndexBuilder`] walks up from each changed file's directory, reading the
//! OWNERS file in every directory it passes until it reaches the root or a
//! `set noparent`. The resulting [`OwnersIndex`] is immutable and answers
//! "who owns this file, and how far away were they declared" queries.

mod loader;
mod owner_map;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

pub use self::owner_map::OwnerMap;
use self::loader::{FileRef, Loader};
use crate::{
    glob,
    identity::IdentityResolver,
    paths,
    repo::RepoReader,
    weights::{self, OwnerWeights, RankedOwner},
};

/// Default name of the declaration file looked up in each directory.
pub const OWNERS_FILE: &str = "OWNERS";

/// Builder for an [`OwnersIndex`]. Borrows its collaborators; calling
/// [`IndexBuilder::build`] reads everything it needs up front.
pub struct IndexBuilder<'a> {
    reader: &'a dyn RepoReader,
    identities: &'a dyn IdentityResolver,
    owners_file: String,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(reader: &'a dyn RepoReader, identities: &'a dyn IdentityResolver) -> Self {
        Self {
            reader,
            identities,
            owners_file: OWNERS_FILE.to_owned(),
        }
    }

    /// Use `name` instead of `OWNERS` as the declaration file name.
    pub fn owners_file(mut self, name: &str) -> Self {
        self.owners_file = name.to_owned();
        self
    }

    /// Build the index for `files` on `branch` of `project`. Failing to find
    /// the branch gives an empty index rather than an error.
    pub fn build<I>(&self, project: &str, branch: &str, files: I) -> OwnersIndex
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut files = files
            .into_iter()
            .map(|f| paths::file_key(f.as_ref()))
            .collect::<Vec<_>>();
        files.sort();
        files.dedup();

        let mut index = OwnersIndex::default();
        let revision = match self.reader.resolve_revision(project, branch) {
            Ok(Some(revision)) => revision,
            Ok(None) => {
                index.log(format!("cannot find branch {} in project {}", branch, project));
                index.files = files;
                return index;
            }
            Err(err) => {
                index.log(format!("cannot resolve {} in {}: {}", branch, project, err));
                index.files = files;
                return index;
            }
        };

        {
            let mut loader = Loader::new(self.reader, self.identities, project, branch, &revision);
            for file in &files {
                let (dir, _) = paths::split_file(file);
                let mut dir = dir.to_owned();
                while index.visited_dirs.insert(dir.clone()) {
                    let owners_file = FileRef {
                        project: project.to_owned(),
                        path: paths::repo_path(&dir, &self.owners_file),
                    };
                    loader.load(&mut index, &dir, owners_file, &mut Vec::new());
                    if index.stop_dirs.contains(&dir) {
                        break;
                    }
                    match paths::parent_dir(&dir) {
                        Some(parent) => dir = parent.to_owned(),
                        None => break,
                    }
                }
            }
        }

        debug!(
            project,
            branch,
            revision = %revision,
            files = files.len(),
            scopes = index.owners.path_to_owners().len(),
            errors = index.errors.len(),
            "built owners index"
        );
        index.revision = Some(revision);
        index.files = files;
        index
    }
}

/// Owners declared across one revision, for the directories the build
/// visited.
#[derive(Debug, Clone, Default)]
pub struct OwnersIndex {
    revision: Option<String>,
    files: Vec<String>,
    owners: OwnerMap,
    dir_globs: BTreeMap<String, BTreeSet<String>>,
    stop_dirs: BTreeSet<String>,
    no_parent_globs: BTreeSet<String>,
    visited_dirs: BTreeSet<String>,
    errors: Vec<String>,
    trace: Vec<String>,
}

/// Owners per file together with each owner's weights for the same files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnersQuery {
    pub owners: BTreeMap<String, BTreeSet<String>>,
    pub weights: BTreeMap<String, OwnerWeights>,
}

impl OwnersQuery {
    pub fn ranked(&self) -> Vec<RankedOwner> {
        weights::rank(&self.weights)
    }
}

impl OwnersIndex {
    /// The revision the index was built against, `None` if the branch could
    /// not be resolved.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// The normalised files the index was built for.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn owner_map(&self) -> &OwnerMap {
        &self.owners
    }

    pub fn dir_globs(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.dir_globs
    }

    pub fn stop_dirs(&self) -> &BTreeSet<String> {
        &self.stop_dirs
    }

    pub fn no_parent_globs(&self) -> &BTreeSet<String> {
        &self.no_parent_globs
    }

    pub fn visited_dirs(&self) -> &BTreeSet<String> {
        &self.visited_dirs
    }

    /// Syntax errors, include cycles and unresolved identities met while
    /// building.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Diagnostic lines describing what the build read and skipped.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Whether every directory `files` walk through was loaded by the build,
    /// so queries for them see the same owners a fresh build would. An index
    /// for a missing branch covers everything.
    pub fn covers<I>(&self, files: I) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.revision.is_none()
            || files.into_iter().all(|file| {
                let file = paths::file_key(file.as_ref());
                self.visited_dirs.contains(paths::split_file(&file).0)
            })
    }

    /// Owners of each file, unioned over every scope that owns it. Files
    /// without owners map to an empty set.
    pub fn owners_for<I>(&self, files: I) -> BTreeMap<String, BTreeSet<String>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut result = BTreeMap::new();
        for file in files {
            let file = paths::file_key(file.as_ref());
            let mut found = BTreeSet::new();
            self.walk(&file, |_, owners, _| found.extend(owners.iter().cloned()));
            result.insert(file, found);
        }
        result
    }

    /// Like [`OwnersIndex::owners_for`], also tallying each owner's weights
    /// at the nearest distance it was found for each file.
    pub fn owners_and_weights_for<I>(&self, files: I) -> OwnersQuery
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut query = OwnersQuery::default();
        for file in files {
            let file = paths::file_key(file.as_ref());
            let mut found = BTreeSet::new();
            self.walk(&file, |_, owners, distance| {
                for owner in owners {
                    found.insert(owner.clone());
                    query
                        .weights
                        .entry(owner.clone())
                        .or_default()
                        .add_file(&file, distance);
                }
            });
            query.owners.insert(file, found);
        }
        query
    }

    /// Number of distinct owners of the files the index was built for.
    pub fn count_owners(&self) -> usize {
        self.owners_for(&self.files)
            .into_values()
            .flatten()
            .collect::<BTreeSet<_>>()
            .len()
    }

    // Visit every owning scope of `file` (a normalised key), nearest first,
    // with its distance. Distance only grows past levels that owned the file.
    fn walk(&self, file: &str, mut visit: impl FnMut(&str, &BTreeSet<String>, u32)) {
        let (mut dir, base_name) = paths::split_file(file);
        let mut distance = 1;
        loop {
            let mut found = false;
            let mut per_file_stop = false;

            if let Some(globs) = self.dir_globs.get(dir) {
                for pattern in globs.iter().filter(|g| glob::matches(g, base_name)) {
                    let key = paths::glob_scope(dir, pattern);
                    if let Some(owners) = self.owners.owners(&key) {
                        visit(&key, owners, distance);
                        found = true;
                    }
                    per_file_stop |= self.no_parent_globs.contains(&key);
                }
            }
            if !per_file_stop {
                if let Some(owners) = self.owners.owners(dir) {
                    visit(dir, owners, distance);
                    found = true;
                }
            }

            if found {
                distance += 1;
            }
            if per_file_stop || self.stop_dirs.contains(dir) {
                break;
            }
            match paths::parent_dir(dir) {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    fn log(&mut self, line: String) {
        debug!("{}", line);
        self.trace.push(line);
    }

    fn error(&mut self, line: String) {
        debug!(error = %line, "owners index error");
        self.errors.push(line.clone());
        self.trace.push(line);
    }
}
