use mongodb::{
    bson::{doc, to_document, Document},
    error::Error as DbError,
    options::FindOptions,
    Database,
};
use rocket::futures::TryStreamExt;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    db::{Election, ElectionUpdate, NewVoter, Voter, VoterId, VoterKey, VoterUpdate},
    mongodb::{is_duplicate_key_error, Coll, Counter},
};

use super::ElectionStore;

/// Elections and voters in MongoDB.
#[derive(Clone)]
pub struct MongoStore {
    elections: Coll<Election>,
    voters: Coll<Voter>,
    counters: Coll<Counter>,
}

impl MongoStore {
    pub fn from_db(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
            voters: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }
}

/// Build a `$set` update from the populated fields of `update`.
/// Returns `None` if there is nothing to set.
fn set_update(update: &impl Serialize) -> Result<Option<Document>> {
    let fields = to_document(update).map_err(DbError::from)?;
    Ok((!fields.is_empty()).then(|| doc! { "$set": fields }))
}

fn voter_filter(election: &str, key: VoterKey<'_>) -> Document {
    match key {
        VoterKey::Id(voter_id) => doc! { "electionName": election, "voterId": i64::from(voter_id) },
        VoterKey::Device(device_id) => doc! { "electionName": election, "deviceId": device_id },
        VoterKey::Beta(beta) => doc! { "electionName": election, "beta": beta },
    }
}

#[rocket::async_trait]
impl ElectionStore for MongoStore {
    async fn election_exists(&self, name: &str) -> Result<bool> {
        let count = self
            .elections
            .count_documents(doc! { "name": name }, None)
            .await?;
        Ok(count > 0)
    }

    async fn create_election(&self, election: &Election) -> Result<()> {
        match self.elections.insert_one(election, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => Err(Error::AlreadyExists(election.name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_election(&self, name: &str, update: ElectionUpdate) -> Result<()> {
        let filter = doc! { "name": name };
        let matched = match set_update(&update)? {
            Some(update) => self.elections.update_one(filter, update, None).await?.matched_count,
            None => self.elections.count_documents(filter, None).await?,
        };
        if matched == 0 {
            return Err(Error::ElectionNotExist(name.to_string()));
        }
        Ok(())
    }

    async fn find_election(&self, name: &str) -> Result<Option<Election>> {
        Ok(self.elections.find_one(doc! { "name": name }, None).await?)
    }

    async fn count_voters(&self, election: &str) -> Result<u64> {
        Ok(self
            .voters
            .count_documents(doc! { "electionName": election }, None)
            .await?)
    }

    async fn find_voters(&self, election: &str) -> Result<Vec<Voter>> {
        let options = FindOptions::builder().sort(doc! { "voterId": 1 }).build();
        let voters = self
            .voters
            .find(doc! { "electionName": election }, options)
            .await?
            .try_collect()
            .await?;
        Ok(voters)
    }

    async fn find_voter(&self, election: &str, key: VoterKey<'_>) -> Result<Option<Voter>> {
        Ok(self.voters.find_one(voter_filter(election, key), None).await?)
    }

    /// The ID is taken from the counter before the insert. If the insert then
    /// fails the ID stays used, leaving a gap. Handing it back is not safe,
    /// since a concurrent registration may already hold the next one.
    async fn register_voter(&self, voter: NewVoter) -> Result<Voter> {
        let voter_id = Counter::next(&self.counters, &voter.election_name).await?;
        let voter = Voter::register(voter, voter_id);
        self.voters.insert_one(&voter, None).await?;
        Ok(voter)
    }

    async fn update_voter(
        &self,
        election: &str,
        voter_id: VoterId,
        update: VoterUpdate,
    ) -> Result<()> {
        let filter = voter_filter(election, VoterKey::Id(voter_id));
        let matched = match set_update(&update)? {
            Some(update) => self.voters.update_one(filter, update, None).await?.matched_count,
            None => self.voters.count_documents(filter, None).await?,
        };
        if matched == 0 {
            return Err(Error::VoterNotExist(election.to_string()));
        }
        Ok(())
    }

    async fn delete_all_voters(&self) -> Result<u64> {
        let deleted = self.voters.delete_many(doc! {}, None).await?.deleted_count;
        self.counters.delete_many(doc! {}, None).await?;
        Ok(deleted)
    }

    async fn delete_all_elections(&self) -> Result<u64> {
        Ok(self.elections.delete_many(doc! {}, None).await?.deleted_count)
    }
}
