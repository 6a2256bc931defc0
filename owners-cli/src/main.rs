use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use owners_rs::{
    approval::is_exempt_message, parser::ParseError, validate::validate, Change, Config, FsReader,
    OwnersService, Verbatim, Verdict, Votes, OWNERS_FILE,
};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Find file owners from OWNERS files and check owner approval")]
struct Cli {
    #[command(flatten)]
    repo: RepoArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RepoArgs {
    /// Checkout of the project the files belong to.
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Directory holding checkouts of other projects, for cross-project includes.
    #[arg(long, global = true)]
    projects_root: Option<PathBuf>,

    #[arg(long, default_value = "main", global = true)]
    project: String,

    #[arg(long, default_value = "refs/heads/main", global = true)]
    branch: String,

    #[arg(short = 'f', long = "owners-file", default_value = OWNERS_FILE, global = true)]
    owners_file: String,
}

#[derive(Subcommand)]
enum Command {
    /// Print the owners of each file (every file under the root by default).
    Resolve { paths: Vec<String> },
    /// Print owners closest-first, with file counts at distance 1, 2 and 3+.
    Rank { paths: Vec<String> },
    /// Check whether the given votes approve the files.
    Check {
        paths: Vec<String>,

        /// An owner's vote, as EMAIL=VALUE. May be repeated.
        #[arg(long = "vote", value_parser = parse_vote)]
        votes: Vec<(String, i32)>,

        /// Minimum vote that counts as approval.
        #[arg(long)]
        min: Option<i32>,

        /// Skip the check as if an administrator waived it.
        #[arg(long)]
        bypass: bool,

        /// Commit message file; an exemption footer skips the check.
        #[arg(long)]
        message: Option<PathBuf>,
    },
    /// Report syntax errors in OWNERS files.
    Lint {
        paths: Vec<PathBuf>,

        /// Exit with an error if any file has syntax errors.
        #[arg(long)]
        strict: bool,
    },
}

impl RepoArgs {
    fn config(&self) -> Config {
        Config {
            owners_file_name: self.owners_file.clone(),
            ..Config::default()
        }
    }

    fn service(&self, config: Config) -> OwnersService<FsReader, Verbatim> {
        let mut reader = FsReader::new(&self.root, &self.project);
        if let Some(dir) = &self.projects_root {
            reader = reader.with_projects_root(dir);
        }
        OwnersService::new(reader, Verbatim, config)
    }

    fn change(&self) -> Change {
        Change::new(0, 1, &self.project, &self.branch)
    }

    fn files(&self, paths: Vec<String>) -> Vec<String> {
        if paths.is_empty() {
            walk_files(&self.root).collect()
        } else {
            paths
        }
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repo = &cli.repo;
    match cli.command {
        Command::Resolve { paths } => {
            let files = repo.files(paths);
            let owners = repo.service(repo.config()).resolve_owners(&repo.change(), &files);
            for (path, owners) in &owners {
                let path = path.strip_prefix("./").unwrap_or(path);
                if owners.is_empty() {
                    println!("{:<70}  (unowned)", path);
                } else {
                    let owners = owners.iter().map(String::as_str).collect::<Vec<_>>();
                    println!("{:<70}  {}", path, owners.join(" "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Rank { paths } => {
            let files = repo.files(paths);
            for owner in repo.service(repo.config()).ranked_owners(&repo.change(), &files) {
                let [near, middle, far] = owner.levels;
                println!("{:<50}  {:>5} {:>5} {:>5}", owner.identity, near, middle, far);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            paths,
            votes,
            min,
            bypass,
            message,
        } => {
            let exempt = match &message {
                Some(path) => is_exempt_message(
                    &fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => false,
            };
            let mut config = repo.config();
            if let Some(min) = min {
                config.min_owner_vote_level = min;
            }
            let files = repo.files(paths);
            let votes = votes.into_iter().collect::<Votes>();
            let service = repo.service(config);
            let change = repo.change().with_bypass(bypass || exempt);
            let verdict = service.check_approval_default(&change, &files, &votes);
            println!("{} ({})", verdict, verdict.value());
            if verdict == Verdict::Missing {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Lint { paths, strict } => {
            let config = Config {
                report_syntax_error: strict,
                ..repo.config()
            };
            let roots = if paths.is_empty() {
                vec![repo.root.clone()]
            } else {
                paths
            };
            let files = roots
                .iter()
                .flat_map(|root| owners_files(root, &config.owners_file_name))
                .collect::<Vec<_>>();
            debug!(files = files.len(), "linting owners files");

            let mut failed = false;
            for (path, result) in lint(&files, &config) {
                match result {
                    Ok(warnings) => {
                        for warning in warnings {
                            println!("warning: {}:{}", path.display(), warning);
                        }
                    }
                    Err(err) => {
                        println!("error: {:#}", err);
                        failed = true;
                    }
                }
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn parse_vote(arg: &str) -> Result<(String, i32), String> {
    let (email, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected EMAIL=VALUE, got `{}`", arg))?;
    let value = value
        .trim()
        .parse()
        .map_err(|err| format!("invalid vote `{}`: {}", value, err))?;
    Ok((email.trim().to_owned(), value))
}

#[cfg(feature = "rayon")]
fn lint(files: &[PathBuf], config: &Config) -> Vec<(PathBuf, Result<Vec<ParseError>>)> {
    files
        .par_iter()
        .map(|path| (path.clone(), lint_file(path, config)))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn lint(files: &[PathBuf], config: &Config) -> Vec<(PathBuf, Result<Vec<ParseError>>)> {
    files
        .iter()
        .map(|path| (path.clone(), lint_file(path, config)))
        .collect()
}

fn lint_file(path: &Path, config: &Config) -> Result<Vec<ParseError>> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(validate(&path.display().to_string(), &source, config)?)
}

// Declaration files under `root`, including variants like `OWNERS.common`
// that are only reached through includes.
fn owners_files(root: &Path, name: &str) -> Vec<PathBuf> {
    if !root.is_dir() {
        return vec![root.to_owned()];
    }
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(name))
        .filter(|entry| !entry.path().components().any(|c| c.as_os_str() == ".git"))
        .map(|entry| entry.into_path())
        .collect()
}

fn walk_files(root: &Path) -> impl Iterator<Item = String> + '_ {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(move |entry| {
            let path = entry.path().strip_prefix(root).ok()?;
            if path.starts_with(".git") {
                return None;
            }
            Some(path.to_string_lossy().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vote() {
        assert_eq!(parse_vote("a@a=1"), Ok(("a@a".to_owned(), 1)));
        assert_eq!(parse_vote(" b@b = -2 "), Ok(("b@b".to_owned(), -2)));
        assert!(parse_vote("a@a").is_err());
        assert!(parse_vote("a@a=yes").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "owners", "check", "d1/t.c", "--vote", "a@a=1", "--min", "2", "--root", "/repo",
        ])
        .unwrap();
        assert_eq!(cli.repo.root, PathBuf::from("/repo"));
        match cli.command {
            Command::Check {
                paths,
                votes,
                min,
                bypass,
                message,
            } => {
                assert_eq!(paths, ["d1/t.c"]);
                assert_eq!(votes, [("a@a".to_owned(), 1)]);
                assert_eq!(min, Some(2));
                assert!(!bypass);
                assert!(message.is_none());
            }
            _ => panic!("expected check command"),
        }
    }
}
