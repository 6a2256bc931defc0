//! Deciding whether a change has the owner approval it needs.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use crate::{index::OwnersIndex, parser::ANYONE};

/// Current votes by canonical identity. Positive values approve, negative
/// values veto.
pub type Votes = HashMap<String, i32>;

/// Footer that marks a change as exempt from owner approval.
pub const EXEMPT_FOOTER: &str = "Exempt-From-Owner-Approval:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Missing,
    NotRequired,
}

impl Verdict {
    /// `1`, `-1` or `0`.
    pub fn value(self) -> i32 {
        match self {
            Verdict::Approved => 1,
            Verdict::Missing => -1,
            Verdict::NotRequired => 0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Approved => "approved",
            Verdict::Missing => "missing owner approval",
            Verdict::NotRequired => "owner approval not required",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeStatus {
    #[default]
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn is_closed(self) -> bool {
        matches!(self, ChangeStatus::Merged | ChangeStatus::Abandoned)
    }
}

/// Check approval for a change: closed or bypassed changes never need it,
/// otherwise the owners of `files` are checked against `votes`.
pub fn check_change<I>(
    index: &OwnersIndex,
    files: I,
    votes: &Votes,
    min_vote: i32,
    status: ChangeStatus,
    bypass: bool,
) -> Verdict
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    if bypass || status.is_closed() {
        return Verdict::NotRequired;
    }
    check(&index.owners_for(files), votes, min_vote)
}

/// Check resolved owners against votes. Every file with owners must be
/// approved on its own; a single unapproved or vetoed file fails the lot.
pub fn check(owners: &BTreeMap<String, BTreeSet<String>>, votes: &Votes, min_vote: i32) -> Verdict {
    if owners.values().all(BTreeSet::is_empty) {
        return Verdict::NotRequired;
    }
    if owners
        .values()
        .all(|file_owners| file_approved(file_owners, votes, min_vote))
    {
        Verdict::Approved
    } else {
        Verdict::Missing
    }
}

// `*` approves unconditionally and can't be vetoed. Otherwise any negative
// vote from an owner blocks the file, whatever the others voted.
fn file_approved(owners: &BTreeSet<String>, votes: &Votes, min_vote: i32) -> bool {
    if owners.is_empty() || owners.contains(ANYONE) {
        return true;
    }
    let vote = |owner: &String| votes.get(owner).copied().unwrap_or(0);
    if owners.iter().any(|owner| vote(owner) < 0) {
        return false;
    }
    owners.iter().any(|owner| vote(owner) >= min_vote)
}

/// True if the footer block of `message` contains an
/// `Exempt-From-Owner-Approval:` line.
pub fn is_exempt_message(message: &str) -> bool {
    message
        .trim_end()
        .rsplit("\n\n")
        .next()
        .map_or(false, |footers| {
            footers
                .lines()
                .any(|line| line.trim_start().starts_with(EXEMPT_FOOTER))
        })
}
