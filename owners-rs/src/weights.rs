use std::collections::{BTreeMap, BTreeSet};

/// Per-owner tally for one query: which files the owner was found for, and
/// how many of them at distance 1, 2 and 3 or more.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerWeights {
    files: BTreeSet<String>,
    levels: [u32; 3],
}

impl OwnerWeights {
    /// Count `file` at `distance`. A file already counted is ignored, so the
    /// first (nearest) distance seen for it wins. Returns whether it counted.
    pub fn add_file(&mut self, file: &str, distance: u32) -> bool {
        if !self.files.insert(file.to_owned()) {
            return false;
        }
        let slot = distance.clamp(1, 3) as usize - 1;
        self.levels[slot] += 1;
        true
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    /// File counts at distance 1, 2, and 3 or more.
    pub fn levels(&self) -> [u32; 3] {
        self.levels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedOwner {
    pub identity: String,
    pub levels: [u32; 3],
}

/// Order owners closest-first: by descending distance-1 count, then
/// distance-2, then distance-3+, and finally by identity.
pub fn rank(weights: &BTreeMap<String, OwnerWeights>) -> Vec<RankedOwner> {
    let mut ranked = weights
        .iter()
        .map(|(identity, w)| RankedOwner {
            identity: identity.clone(),
            levels: w.levels(),
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        b.levels
            .cmp(&a.levels)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(levels: [u32; 3]) -> OwnerWeights {
        let mut w = OwnerWeights::default();
        let mut n = 0;
        for (slot, &count) in levels.iter().enumerate() {
            for _ in 0..count {
                w.add_file(&format!("./f{}", n), slot as u32 + 1);
                n += 1;
            }
        }
        w
    }

    #[test]
    fn test_add_file_is_idempotent() {
        let mut w = OwnerWeights::default();
        assert!(w.add_file("./a.c", 1));
        assert!(!w.add_file("./a.c", 2));
        assert!(w.add_file("./b.c", 2));
        assert!(w.add_file("./c.c", 7));
        assert_eq!(w.levels(), [1, 1, 1]);
        assert_eq!(w.files().len(), 3);
    }

    #[test]
    fn test_rank() {
        let all = BTreeMap::from([
            ("a@a".to_owned(), weights([2, 0, 0])),
            ("b@b".to_owned(), weights([2, 0, 1])),
            ("c@c".to_owned(), weights([1, 1, 1])),
        ]);
        let order = rank(&all)
            .into_iter()
            .map(|o| o.identity)
            .collect::<Vec<_>>();
        assert_eq!(order, ["b@b", "a@a", "c@c"]);
    }

    #[test]
    fn test_rank_ties_break_on_identity() {
        let all = BTreeMap::from([
            ("z@z".to_owned(), weights([1, 0, 0])),
            ("m@m".to_owned(), weights([1, 0, 0])),
            ("a@a".to_owned(), weights([0, 3, 0])),
        ]);
        assert_eq!(
            rank(&all),
            vec![
                RankedOwner { identity: "m@m".to_owned(), levels: [1, 0, 0] },
                RankedOwner { identity: "z@z".to_owned(), levels: [1, 0, 0] },
                RankedOwner { identity: "a@a".to_owned(), levels: [0, 3, 0] },
            ]
        );
    }
}
