//! Shell-style glob matching restricted to a single path segment.
//!
//! `*` matches any run of characters and `?` matches exactly one, but
//! neither ever matches a `/`, so a glob can only match a base name.

/// Returns true if `candidate` matches the glob `pattern` in full.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    let mut pattern_idx = 0;
    let mut candidate_idx = 0;
    // Where to resume after a mismatch: the pattern position just past the
    // most recent `*`, and the candidate position that star has reached.
    let mut reset_indices: Option<(usize, usize)> = None;
    while pattern_idx < pattern.len() || candidate_idx < candidate.len() {
        if let Some(pattern_char) = char_at(pattern, pattern_idx) {
            match pattern_char {
                '*' => {
                    pattern_idx += 1;
                    reset_indices = Some((pattern_idx, candidate_idx));
                    continue;
                }
                '?' => {
                    if let Some(candidate_char) = char_at(candidate, candidate_idx) {
                        if candidate_char != '/' {
                            pattern_idx += 1;
                            candidate_idx += candidate_char.len_utf8();
                            continue;
                        }
                    }
                }
                _ => {
                    if let Some(candidate_char) = char_at(candidate, candidate_idx) {
                        if pattern_char == candidate_char {
                            pattern_idx += pattern_char.len_utf8();
                            candidate_idx += candidate_char.len_utf8();
                            continue;
                        }
                    }
                }
            }
        }

        // Let the last star swallow one more character and retry from there.
        if let Some((star_pattern_idx, star_candidate_idx)) = reset_indices {
            if let Some(swallowed) = char_at(candidate, star_candidate_idx) {
                if swallowed != '/' {
                    pattern_idx = star_pattern_idx;
                    candidate_idx = star_candidate_idx + swallowed.len_utf8();
                    reset_indices = Some((pattern_idx, candidate_idx));
                    continue;
                }
            }
        }

        return false;
    }

    true
}

/// Returns true if every character of `glob` is allowed in a per-file rule.
pub fn is_valid(glob: &str) -> bool {
    !glob.is_empty()
        && glob
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '*' | '?' | '.'))
}

fn char_at(s: &str, idx: usize) -> Option<char> {
    // Indices only ever advance by whole characters, so `idx` is always on a
    // character boundary.
    s[idx..].chars().next()
}
