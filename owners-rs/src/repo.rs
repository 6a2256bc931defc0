//! Access to declaration files at a revision.

use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;

/// Revision id reported by [`FsReader`], which only ever sees the working tree.
pub const WORKTREE: &str = "worktree";

/// Reads file contents out of the host's repositories.
///
/// Both methods distinguish "not there" (`Ok(None)`) from "could not look"
/// (`Err`). The index builder degrades either to an empty file.
pub trait RepoReader {
    /// Resolve a branch name to a revision id.
    fn resolve_revision(&self, project: &str, branch: &str) -> Result<Option<String>, ReadError>;

    /// Read `path` (repository-relative, no leading `/`) at a revision id or
    /// branch name.
    fn read_file(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReadError>;
}

impl<T: RepoReader + ?Sized> RepoReader for &T {
    fn resolve_revision(&self, project: &str, branch: &str) -> Result<Option<String>, ReadError> {
        (**self).resolve_revision(project, branch)
    }

    fn read_file(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReadError> {
        (**self).read_file(project, revision, path)
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    /// The project doesn't exist or the caller can't see it.
    #[error("project not readable: {0}")]
    ProjectUnreadable(String),

    #[error("I/O error reading {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

/// Reads declaration files from checkouts on disk.
///
/// The primary project lives at `root`. Other projects, when a projects root
/// is set, are the directories of the same name beneath it.
#[derive(Debug, Clone)]
pub struct FsReader {
    root: PathBuf,
    project: String,
    projects_root: Option<PathBuf>,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            project: project.into(),
            projects_root: None,
        }
    }

    pub fn with_projects_root(mut self, projects_root: impl Into<PathBuf>) -> Self {
        self.projects_root = Some(projects_root.into());
        self
    }

    fn project_dir(&self, project: &str) -> Option<PathBuf> {
        if project == self.project {
            Some(self.root.clone())
        } else if is_project_name(project) {
            self.projects_root.as_ref().map(|dir| dir.join(project))
        } else {
            None
        }
    }
}

// Relative, with no empty, `.` or `..` segments, so the project stays inside
// the projects root.
fn is_project_name(project: &str) -> bool {
    !project.contains('\\')
        && project
            .split('/')
            .all(|segment| !matches!(segment, "" | "." | ".."))
}

impl RepoReader for FsReader {
    fn resolve_revision(&self, project: &str, _branch: &str) -> Result<Option<String>, ReadError> {
        Ok(self
            .project_dir(project)
            .filter(|dir| dir.is_dir())
            .map(|_| WORKTREE.to_owned()))
    }

    fn read_file(
        &self,
        project: &str,
        _revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReadError> {
        let dir = self
            .project_dir(project)
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| ReadError::ProjectUnreadable(project.to_owned()))?;
        read_optional(&dir.join(path))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ReadError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ReadError::Io {
            path: path.to_owned(),
            error,
        }),
    }
}

#[derive(Debug, Default)]
struct MemoryBranch {
    revision: String,
    files: HashMap<String, String>,
}

/// An in-memory set of projects and branches. Each branch has a single,
/// fixed revision id of the form `<project>@<branch>`.
#[derive(Debug, Default)]
pub struct MemoryReader {
    branches: HashMap<(String, String), MemoryBranch>,
    unreadable: HashSet<String>,
    reads: AtomicUsize,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating the project and branch on first use.
    pub fn with_file(mut self, project: &str, branch: &str, path: &str, content: &str) -> Self {
        self.add_file(project, branch, path, content);
        self
    }

    pub fn add_file(&mut self, project: &str, branch: &str, path: &str, content: &str) {
        self.branches
            .entry((project.to_owned(), branch.to_owned()))
            .or_insert_with(|| MemoryBranch {
                revision: format!("{}@{}", project, branch),
                files: HashMap::new(),
            })
            .files
            .insert(path.to_owned(), content.to_owned());
    }

    /// Make every read from `project` fail, as if the caller lacked access.
    pub fn with_unreadable_project(mut self, project: &str) -> Self {
        self.unreadable.insert(project.to_owned());
        self
    }

    /// Number of `read_file` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn branch(&self, project: &str, revision: &str) -> Option<&MemoryBranch> {
        self.branches
            .iter()
            .find(|(key, branch)| {
                key.0 == project && (key.1 == revision || branch.revision == revision)
            })
            .map(|(_, branch)| branch)
    }
}

impl RepoReader for MemoryReader {
    fn resolve_revision(&self, project: &str, branch: &str) -> Result<Option<String>, ReadError> {
        if self.unreadable.contains(project) {
            return Err(ReadError::ProjectUnreadable(project.to_owned()));
        }
        Ok(self
            .branches
            .get(&(project.to_owned(), branch.to_owned()))
            .map(|b| b.revision.clone()))
    }

    fn read_file(
        &self,
        project: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ReadError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.unreadable.contains(project) {
            return Err(ReadError::ProjectUnreadable(project.to_owned()));
        }
        Ok(self
            .branch(project, revision)
            .and_then(|b| b.files.get(path))
            .map(|content| content.as_bytes().to_vec()))
    }
}
