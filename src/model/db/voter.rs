use serde::{Deserialize, Serialize};

/// Voter ID, unique within an election. Assigned from 1 upwards.
pub type VoterId = u32;

/// Keys uploaded by a voter's device, before an ID is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVoter {
    pub election_name: String,
    pub device_id: String,
    pub public_key_signature: String,
    pub public_key_trapdoor: String,
}

/// A voter, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub election_name: String,
    pub voter_id: VoterId,
    pub device_id: String,
    pub public_key_signature: String,
    pub public_key_trapdoor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_tracker_number_in_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_vote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_vote_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt_proof: Option<EncryptProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<String>,
}

impl Voter {
    /// Register a voter under the given ID.
    pub fn register(voter: NewVoter, voter_id: VoterId) -> Self {
        Self {
            election_name: voter.election_name,
            voter_id,
            device_id: voter.device_id,
            public_key_signature: voter.public_key_signature,
            public_key_trapdoor: voter.public_key_trapdoor,
            beta: None,
            encrypted_tracker_number_in_group: None,
            encrypted_vote: None,
            encrypted_vote_signature: None,
            encrypt_proof: None,
            alpha: None,
        }
    }

    pub fn apply(&mut self, update: VoterUpdate) {
        let VoterUpdate {
            beta,
            encrypted_tracker_number_in_group,
            encrypted_vote,
            encrypted_vote_signature,
            encrypt_proof,
            alpha,
        } = update;
        if beta.is_some() {
            self.beta = beta;
        }
        if encrypted_tracker_number_in_group.is_some() {
            self.encrypted_tracker_number_in_group = encrypted_tracker_number_in_group;
        }
        if encrypted_vote.is_some() {
            self.encrypted_vote = encrypted_vote;
        }
        if encrypted_vote_signature.is_some() {
            self.encrypted_vote_signature = encrypted_vote_signature;
        }
        if encrypt_proof.is_some() {
            self.encrypt_proof = encrypt_proof;
        }
        if alpha.is_some() {
            self.alpha = alpha;
        }
    }
}

/// Proof that an encrypted vote is well formed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptProof {
    pub c1_bar: String,
    pub c1_r: String,
    pub c2_bar: String,
    pub c2_r: String,
}

/// Fields set on an existing voter. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_tracker_number_in_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_vote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_vote_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypt_proof: Option<EncryptProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<String>,
}

/// The ways a voter can be looked up within an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoterKey<'a> {
    Id(VoterId),
    Device(&'a str),
    Beta(&'a str),
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl NewVoter {
        pub fn example(election: &str, n: u32) -> Self {
            Self {
                election_name: election.to_string(),
                device_id: format!("device-{n}"),
                public_key_signature: format!("sig-{n}"),
                public_key_trapdoor: format!("trap-{n}"),
            }
        }
    }

    impl EncryptProof {
        pub fn example() -> Self {
            Self {
                c1_bar: "c1bar".to_string(),
                c1_r: "c1r".to_string(),
                c2_bar: "c2bar".to_string(),
                c2_r: "c2r".to_string(),
            }
        }
    }
}
