use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::db::Election;

use super::{Validate, Violations};

/// A new election, as submitted by the administrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitRequest {
    #[serde(alias = "election")]
    pub election_name: String,
    pub number_of_voters: u32,
    pub number_of_tellers: u32,
    pub threshold_tellers: u32,
    /// Vote option names in ballot order.
    pub vote_options: Vec<String>,
}

impl Validate for InitRequest {
    fn validate(&self) -> Result<()> {
        Violations::default()
            .election_name("electionName", &self.election_name)
            .check(
                self.number_of_voters >= 1,
                "numberOfVoters must be at least 1",
            )
            .check(
                self.number_of_tellers >= 1,
                "numberOfTellers must be at least 1",
            )
            .check(
                (1..=self.number_of_tellers).contains(&self.threshold_tellers),
                "thresholdTellers must be between 1 and numberOfTellers",
            )
            .check(
                !self.vote_options.is_empty(),
                "voteOptions must not be empty",
            )
            .check(
                self.vote_options.iter().all(|o| !o.trim().is_empty()),
                "voteOptions must not contain blank options",
            )
            .finish()
    }
}

impl From<InitRequest> for Election {
    fn from(request: InitRequest) -> Self {
        Election::pending(
            request.election_name,
            request.number_of_voters,
            request.number_of_tellers,
            request.threshold_tellers,
            request.vote_options,
        )
    }
}

/// Names the election a phase should run for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElectionRequest {
    #[serde(alias = "election")]
    pub election_name: String,
}

impl Validate for ElectionRequest {
    fn validate(&self) -> Result<()> {
        Violations::default()
            .election_name("electionName", &self.election_name)
            .finish()
    }
}

/// What `clear` deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSummary {
    pub elections: u64,
    pub voters: u64,
}
