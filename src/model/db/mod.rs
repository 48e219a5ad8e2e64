//! DB-compatible (e.g. de/serialisable) types.
//!
//! Field names are camelCase so that documents match the JSON the voter
//! devices exchange with the API.

pub mod election;
pub mod voter;

pub use election::{Election, ElectionUpdate, TrackerNumber, VoteOption};
pub use voter::{EncryptProof, NewVoter, Voter, VoterId, VoterKey, VoterUpdate};
