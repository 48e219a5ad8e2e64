//! Persistence of elections and voters.
//!
//! Creation and update are separate operations: creating an election that
//! already exists fails, as does updating a voter that does not.

use std::sync::Arc;

use crate::error::Result;
use crate::model::db::{Election, ElectionUpdate, NewVoter, Voter, VoterId, VoterKey, VoterUpdate};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// The store in Rocket's managed state.
pub type Store = Arc<dyn ElectionStore>;

#[rocket::async_trait]
pub trait ElectionStore: Send + Sync {
    async fn election_exists(&self, name: &str) -> Result<bool>;

    /// Insert a new election. Fails with `AlreadyExists` if the name is taken.
    async fn create_election(&self, election: &Election) -> Result<()>;

    /// Set fields on an existing election. Fails with `ElectionNotExist`.
    async fn update_election(&self, name: &str, update: ElectionUpdate) -> Result<()>;

    async fn find_election(&self, name: &str) -> Result<Option<Election>>;

    async fn count_voters(&self, election: &str) -> Result<u64>;

    /// All voters of an election, in voter ID order.
    async fn find_voters(&self, election: &str) -> Result<Vec<Voter>>;

    async fn find_voter(&self, election: &str, key: VoterKey<'_>) -> Result<Option<Voter>>;

    /// Store a voter under the next free ID of its election.
    async fn register_voter(&self, voter: NewVoter) -> Result<Voter>;

    /// Set fields on an existing voter. Fails with `VoterNotExist`.
    async fn update_voter(&self, election: &str, voter_id: VoterId, update: VoterUpdate)
        -> Result<()>;

    /// Delete every voter (and the ID counters), returning how many were removed.
    async fn delete_all_voters(&self) -> Result<u64>;

    async fn delete_all_elections(&self) -> Result<u64>;
}
