use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::db::{
    Election, EncryptProof, NewVoter, TrackerNumber, VoteOption, VoterId, VoterUpdate,
};

use super::{Validate, Violations};

/// Public election parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionParams {
    pub g: Option<String>,
    pub p: Option<String>,
    pub q: Option<String>,
    pub election_public_key: Option<String>,
    pub number_of_tellers: u32,
    pub threshold_tellers: u32,
}

impl From<Election> for ElectionParams {
    fn from(election: Election) -> Self {
        Self {
            g: election.g,
            p: election.p,
            q: election.q,
            election_public_key: election.election_public_key,
            number_of_tellers: election.number_of_tellers,
            threshold_tellers: election.threshold_tellers,
        }
    }
}

/// Keys generated on a voter's device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadKeysRequest {
    pub election_name: String,
    pub device_id: String,
    pub public_key_signature: String,
    pub public_key_trapdoor: String,
}

impl Validate for UploadKeysRequest {
    fn validate(&self) -> Result<()> {
        Violations::default()
            .election_name("electionName", &self.election_name)
            .present("deviceId", &self.device_id)
            .present("publicKeySignature", &self.public_key_signature)
            .present("publicKeyTrapdoor", &self.public_key_trapdoor)
            .finish()
    }
}

impl From<UploadKeysRequest> for NewVoter {
    fn from(request: UploadKeysRequest) -> Self {
        Self {
            election_name: request.election_name,
            device_id: request.device_id,
            public_key_signature: request.public_key_signature,
            public_key_trapdoor: request.public_key_trapdoor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadKeysResponse {
    pub voter_id: VoterId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoterParamsRequest {
    pub election_name: String,
    pub device_id: String,
}

impl Validate for VoterParamsRequest {
    fn validate(&self) -> Result<()> {
        Violations::default()
            .election_name("electionName", &self.election_name)
            .present("deviceId", &self.device_id)
            .finish()
    }
}

/// Everything a voter needs to cast a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterParamsResponse {
    pub beta: String,
    pub encrypted_tracker_number_in_group: String,
    pub vote_options: Vec<VoteOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoteRequest {
    pub election_name: String,
    pub beta: String,
    pub encrypted_vote: String,
    pub encrypted_vote_signature: String,
    pub encrypt_proof: EncryptProof,
}

impl Validate for VoteRequest {
    fn validate(&self) -> Result<()> {
        Violations::default()
            .election_name("electionName", &self.election_name)
            .present("beta", &self.beta)
            .present("encryptedVote", &self.encrypted_vote)
            .present("encryptedVoteSignature", &self.encrypted_vote_signature)
            .present("encryptProof.c1Bar", &self.encrypt_proof.c1_bar)
            .present("encryptProof.c1R", &self.encrypt_proof.c1_r)
            .present("encryptProof.c2Bar", &self.encrypt_proof.c2_bar)
            .present("encryptProof.c2R", &self.encrypt_proof.c2_r)
            .finish()
    }
}

impl VoteRequest {
    /// The fields this vote sets on the voter.
    pub fn into_update(self) -> VoterUpdate {
        VoterUpdate {
            encrypted_vote: Some(self.encrypted_vote),
            encrypted_vote_signature: Some(self.encrypted_vote_signature),
            encrypt_proof: Some(self.encrypt_proof),
            ..Default::default()
        }
    }
}

/// Identifies a voter by the beta the tellers assigned them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlphaRequest {
    pub election_name: String,
    pub beta: String,
}

impl Validate for AlphaRequest {
    fn validate(&self) -> Result<()> {
        Violations::default()
            .election_name("electionName", &self.election_name)
            .present("beta", &self.beta)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlphaResponse {
    pub alpha: String,
    pub tracker_numbers: Vec<TrackerNumber>,
}

/// The mixed voters table as published by the first teller. Columns are
/// whatever the tellers chose to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedVoters {
    pub voters: Vec<BTreeMap<String, String>>,
}
