//! Resolve who owns which files from OWNERS declarations, and decide whether
//! a change has the owner approval it needs.
//!
//! An [`OwnersIndex`] is built per revision by [`IndexBuilder`] from the
//! OWNERS files above each changed file. [`OwnersService`] adds caching and
//! ties the index to votes via the [`approval`] checker.

pub mod approval;
pub mod cache;
pub mod config;
pub mod glob;
pub mod identity;
pub mod index;
pub mod parser;
pub mod paths;
pub mod repo;
mod service;
pub mod validate;
pub mod weights;

pub use approval::{ChangeStatus, Verdict, Votes};
pub use cache::{CacheKey, OwnersCache, ResultCache};
pub use config::Config;
pub use identity::{IdentityMap, IdentityResolver, Verbatim};
pub use index::{IndexBuilder, OwnerMap, OwnersIndex, OwnersQuery, OWNERS_FILE};
pub use repo::{FsReader, MemoryReader, ReadError, RepoReader};
pub use service::{Change, OwnersService};
pub use weights::{rank, OwnerWeights, RankedOwner};
