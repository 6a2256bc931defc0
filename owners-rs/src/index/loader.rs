use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use tracing::warn;

use super::OwnersIndex;
use crate::{
    identity::IdentityResolver,
    parser::{self, Directive, Owner, PerFileEntry, Spanned, ANYONE},
    paths,
    repo::RepoReader,
};

/// A declaration file in some project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FileRef {
    pub(crate) project: String,
    pub(crate) path: String,
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.path)
    }
}

/// Reads and applies declaration files for one index build.
///
/// File contents and resolved identities are remembered for the whole build.
/// The chain of files currently being included is passed into each
/// [`Loader::load`] call rather than stored here.
pub(crate) struct Loader<'a> {
    reader: &'a dyn RepoReader,
    identities: &'a dyn IdentityResolver,
    project: &'a str,
    branch: &'a str,
    revision: &'a str,
    contents: HashMap<FileRef, Option<Arc<str>>>,
    parsed: HashSet<(FileRef, String)>,
    resolved: HashMap<String, String>,
}

impl<'a> Loader<'a> {
    pub(crate) fn new(
        reader: &'a dyn RepoReader,
        identities: &'a dyn IdentityResolver,
        project: &'a str,
        branch: &'a str,
        revision: &'a str,
    ) -> Self {
        Self {
            reader,
            identities,
            project,
            branch,
            revision,
            contents: HashMap::new(),
            parsed: HashSet::new(),
            resolved: HashMap::new(),
        }
    }

    /// Parse `file` and apply its directives to `index` as if they were
    /// declared in the directory `scope`. Includes are followed recursively
    /// at the same scope; `stack` holds the files currently being included.
    pub(crate) fn load(
        &mut self,
        index: &mut OwnersIndex,
        scope: &str,
        file: FileRef,
        stack: &mut Vec<FileRef>,
    ) {
        if stack.contains(&file) {
            let chain = stack
                .iter()
                .chain(std::iter::once(&file))
                .map(|f| self.describe(f))
                .collect::<Vec<_>>();
            index.error(format!("include cycle: {}", chain.join(" -> ")));
            return;
        }
        if !self.parsed.insert((file.clone(), scope.to_owned())) {
            index.log(format!("{} already parsed for {}", self.describe(&file), scope));
            return;
        }
        let Some(content) = self.read(index, &file) else {
            return;
        };

        let result = parser::parse(&content);
        for err in &result.errors {
            index.error(format!("{}:{}", self.describe(&file), err));
        }

        stack.push(file.clone());
        for Spanned(directive, line) in result.directives {
            match directive {
                Directive::NoParent => {
                    index.stop_dirs.insert(scope.to_owned());
                }
                Directive::Owner(owner) => {
                    let identity = self.canonical(index, &owner);
                    index.owners.insert(scope, &identity);
                }
                Directive::PerFile { glob, entries } => {
                    let key = paths::glob_scope(scope, &glob);
                    index
                        .dir_globs
                        .entry(scope.to_owned())
                        .or_default()
                        .insert(glob);
                    for entry in entries {
                        match entry {
                            PerFileEntry::NoParent => {
                                index.no_parent_globs.insert(key.clone());
                            }
                            PerFileEntry::Owner(owner) => {
                                let identity = self.canonical(index, &owner);
                                index.owners.insert(&key, &identity);
                            }
                        }
                    }
                }
                Directive::Include(target) => {
                    let project = target.project.unwrap_or_else(|| file.project.clone());
                    match paths::resolve_include(&file.path, &target.path) {
                        Some(path) => self.load(index, scope, FileRef { project, path }, stack),
                        None => index.error(format!(
                            "{}:{}: invalid include path: {}",
                            self.describe(&file),
                            line,
                            target.path
                        )),
                    }
                }
            }
        }
        stack.pop();
    }

    // Contents are read at most once per build. Missing and unreadable files
    // both come back as `None`.
    fn read(&mut self, index: &mut OwnersIndex, file: &FileRef) -> Option<Arc<str>> {
        if let Some(cached) = self.contents.get(file) {
            return cached.clone();
        }

        // Other projects are read at the change's branch, not its revision.
        let revision = if file.project == self.project {
            self.revision
        } else {
            self.branch
        };
        let read = self.reader.read_file(&file.project, revision, &file.path);
        let content: Option<Arc<str>> = match read {
            Ok(Some(bytes)) => Some(Arc::from(String::from_utf8_lossy(&bytes))),
            Ok(None) => {
                index.log(format!("no file {}", self.describe(file)));
                None
            }
            Err(err) => {
                warn!(file = %file, error = %err, "treating unreadable owners file as empty");
                index.log(format!("cannot read {}: {}", self.describe(file), err));
                None
            }
        };
        self.contents.insert(file.clone(), content.clone());
        content
    }

    // Unresolvable tokens are kept as written so they still own their scopes.
    fn canonical(&mut self, index: &mut OwnersIndex, owner: &Owner) -> String {
        let raw = match owner {
            Owner::Anyone => return ANYONE.to_owned(),
            Owner::Email(raw) => raw,
        };
        if let Some(identity) = self.resolved.get(raw) {
            return identity.clone();
        }

        let identity = match self.identities.resolve(raw) {
            Some(identity) => identity,
            None => {
                warn!(owner = %raw, "cannot resolve owner identity");
                index.error(format!("cannot resolve owner: {}", raw));
                raw.clone()
            }
        };
        self.resolved.insert(raw.clone(), identity.clone());
        identity
    }

    fn describe(&self, file: &FileRef) -> String {
        if file.project == self.project {
            file.path.clone()
        } else {
            file.to_string()
        }
    }
}
