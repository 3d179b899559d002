use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub label: String,
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub label: String,
    pub votes: u32,
    pub percent: f64,
}

/// Each option's share of the votes cast, in input order.
pub fn tally(options: &[PollOption]) -> Vec<OptionTally> {
    let total: u64 = options.iter().map(|o| u64::from(o.votes)).sum();
    options
        .iter()
        .map(|o| OptionTally {
            label: o.label.clone(),
            votes: o.votes,
            percent: if total == 0 {
                0.0
            } else {
                f64::from(o.votes) * 100.0 / total as f64
            },
        })
        .collect()
}

/// Every option holding the top vote count. Empty when nobody has voted.
pub fn leaders(options: &[PollOption]) -> Vec<&PollOption> {
    let top = options.iter().map(|o| o.votes).max().unwrap_or(0);
    if top == 0 {
        return Vec::new();
    }
    options.iter().filter(|o| o.votes == top).collect()
}
