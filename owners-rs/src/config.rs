use std::time::Duration;

use crate::index::OWNERS_FILE;

/// Settings for resolving owners and checking approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Declaration file name looked up in every directory.
    pub owners_file_name: String,
    /// Minimum vote that counts as approval from an owner.
    pub min_owner_vote_level: i32,
    /// How long a built index stays cached. Zero disables caching.
    pub max_cache_age: Duration,
    /// How many built indexes are cached. Zero disables caching.
    pub max_cache_size: usize,
    /// Whether syntax errors in declaration files fail validation.
    pub report_syntax_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owners_file_name: OWNERS_FILE.to_owned(),
            min_owner_vote_level: 1,
            max_cache_age: Duration::from_secs(30),
            max_cache_size: 1000,
            report_syntax_error: false,
        }
    }
}
