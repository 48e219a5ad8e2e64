use serde::{Deserialize, Serialize};

/// An election, as stored in the database.
///
/// Only the counts and vote option names are known when the election is
/// created; everything else is filled in by later phases and never unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    /// Unique election name.
    pub name: String,
    pub number_of_voters: u32,
    pub number_of_tellers: u32,
    pub threshold_tellers: u32,
    /// Group generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    /// Group modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// Subgroup order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_public_key: Option<String>,
    /// Vote options in ballot order.
    #[serde(default)]
    pub vote_options: Vec<VoteOption>,
    #[serde(default)]
    pub tracker_numbers: Vec<TrackerNumber>,
}

impl Election {
    /// A pending election, before any teller has produced parameters.
    pub fn pending(
        name: String,
        number_of_voters: u32,
        number_of_tellers: u32,
        threshold_tellers: u32,
        options: Vec<String>,
    ) -> Self {
        Self {
            name,
            number_of_voters,
            number_of_tellers,
            threshold_tellers,
            g: None,
            p: None,
            q: None,
            election_public_key: None,
            vote_options: options.into_iter().map(VoteOption::named).collect(),
            tracker_numbers: Vec::new(),
        }
    }

    /// Merge a phase's results into this election.
    pub fn apply(&mut self, update: ElectionUpdate) {
        let ElectionUpdate {
            g,
            p,
            q,
            election_public_key,
            vote_options,
            tracker_numbers,
        } = update;
        if g.is_some() {
            self.g = g;
        }
        if p.is_some() {
            self.p = p;
        }
        if q.is_some() {
            self.q = q;
        }
        if election_public_key.is_some() {
            self.election_public_key = election_public_key;
        }
        if let Some(vote_options) = vote_options.filter(|list| !list.is_empty()) {
            self.vote_options = vote_options;
        }
        if let Some(tracker_numbers) = tracker_numbers.filter(|list| !list.is_empty()) {
            self.tracker_numbers = tracker_numbers;
        }
    }

    /// Have the tellers finished generating the election parameters?
    pub fn has_parameters(&self) -> bool {
        self.g.is_some() && self.p.is_some() && self.q.is_some() && self.election_public_key.is_some()
    }
}

/// A single vote option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOption {
    pub option: String,
    /// The option encoded as a group element, once the tellers have mapped it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_number_in_group: Option<String>,
}

impl VoteOption {
    pub fn named(option: String) -> Self {
        Self {
            option,
            option_number_in_group: None,
        }
    }
}

/// A tracker number in all three of its published forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerNumber {
    pub tracker_number: String,
    pub tracker_number_in_group: String,
    pub encrypted_tracker_number_in_group: String,
}

/// Fields set on an existing election. `None` or an empty list leaves a
/// field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_public_key: Option<String>,
    #[serde(skip_serializing_if = "is_unset")]
    pub vote_options: Option<Vec<VoteOption>>,
    #[serde(skip_serializing_if = "is_unset")]
    pub tracker_numbers: Option<Vec<TrackerNumber>>,
}

fn is_unset<T>(list: &Option<Vec<T>>) -> bool {
    list.as_ref().map_or(true, Vec::is_empty)
}
