//! Applying teller output files to the stored election and voters.
//!
//! All of a phase's output files are read and checked before anything is
//! written, so a missing, empty or malformed file leaves the store untouched. Rows are matched to
//! voters by voter ID; rows for unknown voters and voters without a row are
//! logged and skipped while the rest of the batch is applied.

use std::collections::{BTreeMap, BTreeSet};

use crate::artifacts::{
    ArtifactError, ArtifactStore, AssociatedVoterRow, ElectionKeyRow, ElectionParamsRow,
    EncryptedVoterRow, TrackerNumberRow, VoteOptionRow, ASSOCIATED_VOTERS, ELECTION_KEYS,
    ELECTION_PARAMS, ENCRYPTED_VOTERS, TRACKER_NUMBERS, VOTE_OPTIONS,
};
use crate::error::{Error, Result};
use crate::model::db::{
    Election, ElectionUpdate, TrackerNumber, VoteOption, VoterId, VoterUpdate,
};
use crate::store::ElectionStore;

use super::Phase;

/// Summary of a completed reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// Voters updated.
    pub applied: u32,
    /// Rows without a voter, repeated rows, and voters without a row.
    pub mismatches: u32,
}

pub async fn reconcile(
    phase: Phase,
    store: &dyn ElectionStore,
    artifacts: &ArtifactStore,
    election: &Election,
) -> Result<Report> {
    let name = election.name.as_str();
    match phase {
        Phase::Init => {
            let params: Vec<ElectionParamsRow> = artifacts.read_table(name, ELECTION_PARAMS)?;
            let keys: Vec<ElectionKeyRow> = artifacts.read_table(name, ELECTION_KEYS)?;
            let params = first_row(artifacts, name, ELECTION_PARAMS, params)?;
            let key = first_row(artifacts, name, ELECTION_KEYS, keys)?;

            let update = ElectionUpdate {
                g: Some(params.g),
                p: Some(params.p),
                q: Some(params.q),
                election_public_key: Some(key.public_key),
                ..Default::default()
            };
            store.update_election(name, update).await?;
            Ok(Report::default())
        }
        Phase::PostVotersKeys => {
            let associated: Vec<AssociatedVoterRow> =
                artifacts.read_table(name, ASSOCIATED_VOTERS)?;
            let options: Vec<VoteOptionRow> = artifacts.read_table(name, VOTE_OPTIONS)?;
            let trackers: Vec<TrackerNumberRow> = artifacts.read_table(name, TRACKER_NUMBERS)?;
            let associated = non_empty(artifacts, name, ASSOCIATED_VOTERS, associated)?;
            let options = non_empty(artifacts, name, VOTE_OPTIONS, options)?;
            let trackers = non_empty(artifacts, name, TRACKER_NUMBERS, trackers)?;
            let options = mapped_options(artifacts, election, options)?;

            let updates = associated.into_iter().map(|row| {
                let update = VoterUpdate {
                    beta: Some(row.beta),
                    encrypted_tracker_number_in_group: Some(row.encrypted_tracker_number_in_group),
                    ..Default::default()
                };
                (row.voter_id, update)
            });
            let report = apply_voter_updates(store, name, updates).await?;

            let update = ElectionUpdate {
                vote_options: Some(options),
                tracker_numbers: Some(trackers.into_iter().map(TrackerNumber::from).collect()),
                ..Default::default()
            };
            store.update_election(name, update).await?;
            Ok(report)
        }
        Phase::EncryptVotes => {
            let encrypted: Vec<EncryptedVoterRow> = artifacts.read_table(name, ENCRYPTED_VOTERS)?;
            let encrypted = non_empty(artifacts, name, ENCRYPTED_VOTERS, encrypted)?;

            let updates = encrypted.into_iter().map(|row| {
                let update = VoterUpdate {
                    alpha: Some(row.alpha),
                    ..Default::default()
                };
                (row.voter_id, update)
            });
            apply_voter_updates(store, name, updates).await
        }
    }
}

/// Take the first row of a single-row table.
fn first_row<T>(artifacts: &ArtifactStore, election: &str, file: &str, rows: Vec<T>) -> Result<T> {
    if rows.len() > 1 {
        warn!("{file} of election {election} has {} rows, using the first", rows.len());
    }
    match rows.into_iter().next() {
        Some(row) => Ok(row),
        None => Err(ArtifactError::Empty {
            path: artifacts.election_dir(election)?.join(file),
        }
        .into()),
    }
}

/// Refuse a table with a header and no rows.
fn non_empty<T>(
    artifacts: &ArtifactStore,
    election: &str,
    file: &str,
    rows: Vec<T>,
) -> Result<Vec<T>> {
    if rows.is_empty() {
        return Err(ArtifactError::Empty {
            path: artifacts.election_dir(election)?.join(file),
        }
        .into());
    }
    Ok(rows)
}

/// The tellers' group numbers for the election's options, which must be
/// listed in the same order the election was created with.
fn mapped_options(
    artifacts: &ArtifactStore,
    election: &Election,
    rows: Vec<VoteOptionRow>,
) -> Result<Vec<VoteOption>> {
    let same = rows.len() == election.vote_options.len()
        && rows
            .iter()
            .zip(&election.vote_options)
            .all(|(row, option)| row.option == option.option);
    if !same {
        return Err(ArtifactError::UnexpectedOptions {
            path: artifacts.election_dir(&election.name)?.join(VOTE_OPTIONS),
            expected: election.vote_options.iter().map(|o| o.option.clone()).collect(),
            found: rows.into_iter().map(|row| row.option).collect(),
        }
        .into());
    }
    Ok(rows.into_iter().map(VoteOption::from).collect())
}

/// Updates matched to the registered voters of an election.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Matched<T> {
    pub matched: BTreeMap<VoterId, T>,
    /// IDs in the output with no registered voter.
    pub unknown: Vec<VoterId>,
    /// IDs that appear more than once; only the first row is used.
    pub repeated: Vec<VoterId>,
    /// Registered voters the output says nothing about.
    pub missing: Vec<VoterId>,
}

impl<T> Matched<T> {
    pub fn mismatches(&self) -> u32 {
        (self.unknown.len() + self.repeated.len() + self.missing.len()) as u32
    }
}

/// Match output rows to registered voters by ID.
pub fn match_rows<T>(
    registered: &BTreeSet<VoterId>,
    rows: impl IntoIterator<Item = (VoterId, T)>,
) -> Matched<T> {
    let mut result = Matched {
        matched: BTreeMap::new(),
        unknown: Vec::new(),
        repeated: Vec::new(),
        missing: Vec::new(),
    };
    for (voter_id, row) in rows {
        if !registered.contains(&voter_id) {
            result.unknown.push(voter_id);
        } else if result.matched.contains_key(&voter_id) {
            result.repeated.push(voter_id);
        } else {
            result.matched.insert(voter_id, row);
        }
    }
    result.missing = registered
        .iter()
        .filter(|id| !result.matched.contains_key(id))
        .copied()
        .collect();
    result
}

async fn apply_voter_updates(
    store: &dyn ElectionStore,
    election: &str,
    updates: impl IntoIterator<Item = (VoterId, VoterUpdate)>,
) -> Result<Report> {
    let registered = store
        .find_voters(election)
        .await?
        .into_iter()
        .map(|voter| voter.voter_id)
        .collect::<BTreeSet<_>>();
    let matched = match_rows(&registered, updates);
    for voter_id in &matched.unknown {
        warn!("Output row for voter {voter_id} of election {election} matches no voter, skipping");
    }
    for voter_id in &matched.repeated {
        warn!("Repeated output row for voter {voter_id} of election {election}, skipping");
    }
    for voter_id in &matched.missing {
        warn!("No output row for voter {voter_id} of election {election}");
    }

    let mut report = Report {
        applied: 0,
        mismatches: matched.mismatches(),
    };
    for (voter_id, update) in matched.matched {
        match store.update_voter(election, voter_id, update).await {
            Ok(()) => report.applied += 1,
            Err(Error::VoterNotExist(_)) => {
                warn!("Voter {voter_id} of election {election} vanished before it could be updated");
                report.mismatches += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

impl From<VoteOptionRow> for VoteOption {
    fn from(row: VoteOptionRow) -> Self {
        Self {
            option: row.option,
            option_number_in_group: Some(row.option_number_in_group),
        }
    }
}

impl From<TrackerNumberRow> for TrackerNumber {
    fn from(row: TrackerNumberRow) -> Self {
        Self {
            tracker_number: row.tracker_number,
            tracker_number_in_group: row.tracker_number_in_group,
            encrypted_tracker_number_in_group: row.encrypted_tracker_number_in_group,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    use crate::model::db::{NewVoter, VoterKey};
    use crate::store::MemoryStore;

    #[test]
    fn match_rows_sorts_out_mismatches() {
        let registered = BTreeSet::from([1, 2, 3]);
        let rows = vec![(2, "b"), (7, "x"), (1, "a"), (2, "again")];
        let matched = match_rows(&registered, rows);

        assert_eq!(matched.matched, BTreeMap::from([(1, "a"), (2, "b")]));
        assert_eq!(matched.unknown, vec![7]);
        assert_eq!(matched.repeated, vec![2]);
        assert_eq!(matched.missing, vec![3]);
        assert_eq!(matched.mismatches(), 3);
    }

    async fn setup(dir: &std::path::Path) -> (MemoryStore, ArtifactStore) {
        let store = MemoryStore::new();
        store.create_election(&Election::example()).await.unwrap();
        for n in 1..=2 {
            store.register_voter(NewVoter::example("E", n)).await.unwrap();
        }
        let artifacts = ArtifactStore::new(dir);
        artifacts.ensure_directory("E").unwrap();
        (store, artifacts)
    }

    fn write(dir: &std::path::Path, file: &str, contents: &str) {
        fs::write(dir.join("E").join(file), contents).unwrap();
    }

    #[rocket::async_test]
    async fn init_merges_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let (store, artifacts) = setup(dir.path()).await;
        write(dir.path(), ELECTION_PARAMS, "g,p,q\n2,23,11\n");
        write(dir.path(), ELECTION_KEYS, "publicKey\npk\n");

        let report = reconcile(Phase::Init, &store, &artifacts, &Election::example())
            .await
            .unwrap();
        assert_eq!(report, Report::default());

        let election = store.find_election("E").await.unwrap().unwrap();
        assert_eq!(election.g.as_deref(), Some("2"));
        assert_eq!(election.p.as_deref(), Some("23"));
        assert_eq!(election.q.as_deref(), Some("11"));
        assert_eq!(election.election_public_key.as_deref(), Some("pk"));
        assert_eq!(election.vote_options, Election::example().vote_options);
    }

    #[rocket::async_test]
    async fn empty_parameters_apply_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, artifacts) = setup(dir.path()).await;
        write(dir.path(), ELECTION_PARAMS, "g,p,q\n");
        write(dir.path(), ELECTION_KEYS, "publicKey\npk\n");

        let err = reconcile(Phase::Init, &store, &artifacts, &Election::example())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(ArtifactError::Empty { .. })));
        let election = store.find_election("E").await.unwrap().unwrap();
        assert_eq!(election, Election::example());
    }

    #[rocket::async_test]
    async fn missing_output_file_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, artifacts) = setup(dir.path()).await;
        write(
            dir.path(),
            ASSOCIATED_VOTERS,
            "voterId,beta,encryptedTrackerNumberInGroup\n1,b1,t1\n2,b2,t2\n",
        );
        write(dir.path(), VOTE_OPTIONS, "option,optionNumberInGroup\nYes,4\nNo,9\n");
        // No tracker numbers file.

        let err = reconcile(Phase::PostVotersKeys, &store, &artifacts, &Election::example())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(ArtifactError::Read { .. })));
        for voter in store.find_voters("E").await.unwrap() {
            assert_eq!(voter.beta, None);
        }
    }

    #[rocket::async_test]
    async fn partial_output_updates_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let (store, artifacts) = setup(dir.path()).await;
        write(dir.path(), ENCRYPTED_VOTERS, "voterId,alpha\n2,a2\n5,a5\n");

        let report = reconcile(Phase::EncryptVotes, &store, &artifacts, &Election::example())
            .await
            .unwrap();
        assert_eq!(
            report,
            Report {
                applied: 1,
                mismatches: 2
            }
        );
        let voter = store.find_voter("E", VoterKey::Id(2)).await.unwrap().unwrap();
        assert_eq!(voter.alpha.as_deref(), Some("a2"));
        let voter = store.find_voter("E", VoterKey::Id(1)).await.unwrap().unwrap();
        assert_eq!(voter.alpha, None);
    }

    #[rocket::async_test]
    async fn header_only_tables_apply_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, artifacts) = setup(dir.path()).await;
        write(
            dir.path(),
            ASSOCIATED_VOTERS,
            "voterId,beta,encryptedTrackerNumberInGroup\n1,b1,t1\n2,b2,t2\n",
        );
        write(dir.path(), VOTE_OPTIONS, "option,optionNumberInGroup\n");
        write(
            dir.path(),
            TRACKER_NUMBERS,
            "trackerNumber,trackerNumberInGroup,encryptedTrackerNumberInGroup\n",
        );

        let err = reconcile(Phase::PostVotersKeys, &store, &artifacts, &Election::example())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(ArtifactError::Empty { .. })));
        let election = store.find_election("E").await.unwrap().unwrap();
        assert_eq!(election, Election::example());
        for voter in store.find_voters("E").await.unwrap() {
            assert_eq!(voter.beta, None);
        }

        write(dir.path(), ENCRYPTED_VOTERS, "voterId,alpha\n");
        let err = reconcile(Phase::EncryptVotes, &store, &artifacts, &Election::example())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(ArtifactError::Empty { .. })));
    }

    #[rocket::async_test]
    async fn reordered_options_apply_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, artifacts) = setup(dir.path()).await;
        write(
            dir.path(),
            ASSOCIATED_VOTERS,
            "voterId,beta,encryptedTrackerNumberInGroup\n1,b1,t1\n2,b2,t2\n",
        );
        write(dir.path(), VOTE_OPTIONS, "option,optionNumberInGroup\nNo,9\nYes,4\n");
        write(
            dir.path(),
            TRACKER_NUMBERS,
            "trackerNumber,trackerNumberInGroup,encryptedTrackerNumberInGroup\ntn,tnig,t1\n",
        );

        let err = reconcile(Phase::PostVotersKeys, &store, &artifacts, &Election::example())
            .await
            .unwrap_err();
        match err {
            Error::Artifact(ArtifactError::UnexpectedOptions { expected, found, .. }) => {
                assert_eq!(expected, ["Yes", "No"]);
                assert_eq!(found, ["No", "Yes"]);
            }
            other => panic!("unexpected error {other}"),
        }
        let election = store.find_election("E").await.unwrap().unwrap();
        assert_eq!(election, Election::example());
        for voter in store.find_voters("E").await.unwrap() {
            assert_eq!(voter.beta, None);
        }
    }
}
