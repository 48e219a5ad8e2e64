use std::collections::{BTreeMap, HashMap};

use rocket::tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::db::{Election, ElectionUpdate, NewVoter, Voter, VoterId, VoterKey, VoterUpdate};

use super::ElectionStore;

#[derive(Default)]
struct Collections {
    elections: HashMap<String, Election>,
    /// Voters per election, keyed by voter ID so iteration is in ID order.
    voters: HashMap<String, BTreeMap<VoterId, Voter>>,
    /// Last voter ID handed out per election.
    counters: HashMap<String, VoterId>,
}

/// An in-process store, used when no database is configured and in tests.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl ElectionStore for MemoryStore {
    async fn election_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.lock().await.elections.contains_key(name))
    }

    async fn create_election(&self, election: &Election) -> Result<()> {
        let mut collections = self.collections.lock().await;
        if collections.elections.contains_key(&election.name) {
            return Err(Error::AlreadyExists(election.name.clone()));
        }
        collections
            .elections
            .insert(election.name.clone(), election.clone());
        Ok(())
    }

    async fn update_election(&self, name: &str, update: ElectionUpdate) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let election = collections
            .elections
            .get_mut(name)
            .ok_or_else(|| Error::ElectionNotExist(name.to_string()))?;
        election.apply(update);
        Ok(())
    }

    async fn find_election(&self, name: &str) -> Result<Option<Election>> {
        Ok(self.collections.lock().await.elections.get(name).cloned())
    }

    async fn count_voters(&self, election: &str) -> Result<u64> {
        let collections = self.collections.lock().await;
        Ok(collections
            .voters
            .get(election)
            .map_or(0, |voters| voters.len() as u64))
    }

    async fn find_voters(&self, election: &str) -> Result<Vec<Voter>> {
        let collections = self.collections.lock().await;
        Ok(collections
            .voters
            .get(election)
            .map(|voters| voters.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_voter(&self, election: &str, key: VoterKey<'_>) -> Result<Option<Voter>> {
        let collections = self.collections.lock().await;
        let voters = match collections.voters.get(election) {
            Some(voters) => voters,
            None => return Ok(None),
        };
        let found = match key {
            VoterKey::Id(voter_id) => voters.get(&voter_id),
            VoterKey::Device(device_id) => voters.values().find(|v| v.device_id == device_id),
            VoterKey::Beta(beta) => voters
                .values()
                .find(|v| v.beta.as_deref() == Some(beta)),
        };
        Ok(found.cloned())
    }

    async fn register_voter(&self, voter: NewVoter) -> Result<Voter> {
        let mut collections = self.collections.lock().await;
        let counter = collections
            .counters
            .entry(voter.election_name.clone())
            .or_insert(0);
        *counter += 1;
        let voter = Voter::register(voter, *counter);
        collections
            .voters
            .entry(voter.election_name.clone())
            .or_default()
            .insert(voter.voter_id, voter.clone());
        Ok(voter)
    }

    async fn update_voter(
        &self,
        election: &str,
        voter_id: VoterId,
        update: VoterUpdate,
    ) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let voter = collections
            .voters
            .get_mut(election)
            .and_then(|voters| voters.get_mut(&voter_id))
            .ok_or_else(|| Error::VoterNotExist(election.to_string()))?;
        voter.apply(update);
        Ok(())
    }

    async fn delete_all_voters(&self) -> Result<u64> {
        let mut collections = self.collections.lock().await;
        collections.counters.clear();
        let deleted = collections.voters.drain().map(|(_, v)| v.len() as u64).sum();
        Ok(deleted)
    }

    async fn delete_all_elections(&self) -> Result<u64> {
        let mut collections = self.collections.lock().await;
        let deleted = collections.elections.len() as u64;
        collections.elections.clear();
        Ok(deleted)
    }
}
