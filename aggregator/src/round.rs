use std::{collections::HashMap, time::Instant};

/// One client's counted contribution to the open round.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub num_examples: u32,
    pub delta: Vec<f32>,
}

/// Per-round aggregation state.
///
/// Holds at most one contribution per client id and lives only until the
/// round closes, when it is replaced wholesale by a fresh state at the next
/// version.
#[derive(Debug)]
pub struct RoundState {
    round_version: u64,
    contributions: HashMap<String, Contribution>,
    opened_at: Instant,
}

impl RoundState {
    /// Opens a round collecting deltas against `round_version`.
    pub fn new(round_version: u64) -> Self {
        Self {
            round_version,
            contributions: HashMap::new(),
            opened_at: Instant::now(),
        }
    }

    /// The canonical version contributions must be computed against.
    pub fn round_version(&self) -> u64 {
        self.round_version
    }

    /// Distinct clients counted so far.
    pub fn contributors(&self) -> usize {
        self.contributions.len()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Records `contribution` for `client_id`, replacing any earlier one from
    /// the same client, and returns the distinct contributor count.
    ///
    /// A client resending within the same round therefore overwrites its own
    /// entry instead of inflating the count.
    pub fn upsert(&mut self, client_id: &str, contribution: Contribution) -> usize {
        self.contributions.insert(client_id.to_owned(), contribution);
        self.contributions.len()
    }

    /// Example-count-weighted elementwise average of every contribution:
    /// `merged = Σ(delta_i · n_i) / Σ n_i` over `params` elements.
    ///
    /// Every stored delta was validated against the canonical layout before
    /// entry, so all of them hold exactly `params` elements.
    pub fn merged(&self, params: usize) -> Vec<f32> {
        let mut merged = vec![0.0; params];

        // Summed in u64: many u32 counts can overflow their own width.
        let total: u64 = self
            .contributions
            .values()
            .map(|c| u64::from(c.num_examples))
            .sum();
        if total == 0 {
            return merged;
        }

        for contribution in self.contributions.values() {
            let weight = contribution.num_examples as f32;
            for (acc, d) in merged.iter_mut().zip(&contribution.delta) {
                *acc += weight * d;
            }
        }

        for acc in &mut merged {
            *acc /= total as f32;
        }
        merged
    }
}
