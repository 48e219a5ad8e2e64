//! Driving a protocol phase from request to reconciliation.
//!
//! Starting a phase checks its preconditions, writes its input files and
//! launches every teller before returning. The rest of the run happens on a
//! background task whose progress is published through [`PhaseRuns`].

use std::sync::Arc;
use std::time::Duration;

use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use tokio::time::{timeout_at, Instant};

use crate::artifacts::{
    ArtifactStore, VoteOptionInputRow, VoteRow, VoterKeysRow, VOTERS_KEYS, VOTES,
    VOTE_OPTIONS_INPUT,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::api::ClearSummary;
use crate::model::db::{Election, Voter};
use crate::store::Store;

use super::{
    reconcile, supervisor, Gate, Phase, PhaseRun, PhaseRuns, PhaseStatus, RunState,
    TellerCommand, TellerConfig, Tellers,
};

enum PhaseRequest {
    Init(Election),
    PostVotersKeys(String),
    EncryptVotes(String),
}

impl PhaseRequest {
    fn phase(&self) -> Phase {
        match self {
            Self::Init(_) => Phase::Init,
            Self::PostVotersKeys(_) => Phase::PostVotersKeys,
            Self::EncryptVotes(_) => Phase::EncryptVotes,
        }
    }

    fn election_name(&self) -> &str {
        match self {
            Self::Init(election) => &election.name,
            Self::PostVotersKeys(name) | Self::EncryptVotes(name) => name,
        }
    }
}

/// Runs protocol phases. Cheap to clone; clones share their state.
#[derive(Clone)]
pub struct PhaseCoordinator {
    store: Store,
    artifacts: ArtifactStore,
    tellers: Arc<TellerConfig>,
    timeout: Duration,
    runs: PhaseRuns,
}

impl PhaseCoordinator {
    pub fn new(
        store: Store,
        artifacts: ArtifactStore,
        tellers: TellerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            tellers: Arc::new(tellers),
            timeout,
            runs: PhaseRuns::new(),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// The latest phase run of an election, if any.
    pub async fn status(&self, election: &str) -> Option<PhaseStatus> {
        self.runs.get(election).await
    }

    /// Elections with a phase still running.
    pub async fn active_runs(&self) -> Vec<(String, Phase)> {
        self.runs.active().await
    }

    /// Create a new election and have the tellers generate its parameters.
    pub async fn init(&self, election: Election) -> Result<PhaseStatus> {
        self.start(PhaseRequest::Init(election)).await
    }

    /// Hand the registered voters' keys to the tellers.
    pub async fn post_voters_keys(&self, election: &str) -> Result<PhaseStatus> {
        self.start(PhaseRequest::PostVotersKeys(election.to_string()))
            .await
    }

    /// Hand the cast votes to the tellers.
    pub async fn encrypt_votes(&self, election: &str) -> Result<PhaseStatus> {
        self.start(PhaseRequest::EncryptVotes(election.to_string()))
            .await
    }

    /// Delete every election and voter, provided no phase is running.
    pub async fn clear(&self) -> Result<ClearSummary> {
        self.runs
            .when_idle(async {
                let voters = self.store.delete_all_voters().await?;
                let elections = self.store.delete_all_elections().await?;
                info!("Cleared {elections} elections and {voters} voters");
                Ok(ClearSummary { elections, voters })
            })
            .await
    }

    async fn start(&self, request: PhaseRequest) -> Result<PhaseStatus> {
        let phase = request.phase();
        let name = request.election_name().to_string();

        let previous = self.runs.begin(&name, phase).await?;
        let election = match self.prepare(request).await {
            Ok(election) => election,
            Err(e) => {
                self.runs.release(&name, previous).await;
                return Err(e);
            }
        };

        let tellers = match self.launch(phase, &election) {
            Ok(tellers) => tellers,
            Err(e) => {
                error!("Failed to launch tellers for {phase} of election {name}: {e}");
                let reason = e.to_string();
                self.runs.update(&name, |status| status.fail(reason)).await;
                return Err(e);
            }
        };
        info!(
            "Started {phase} for election {name} with {} tellers",
            tellers.count()
        );

        let expected = tellers.count() as u32;
        let status = self
            .runs
            .update(&name, |status| status.tellers = expected)
            .await
            .ok_or_else(|| Error::not_found(format!("phase run of election {name}")))?;
        tokio::spawn(self.clone().drive(phase, election, tellers));
        Ok(status)
    }

    /// Check a phase's preconditions and write its input files.
    async fn prepare(&self, request: PhaseRequest) -> Result<Election> {
        match request {
            PhaseRequest::Init(election) => {
                if self.store.election_exists(&election.name).await? {
                    return Err(Error::AlreadyExists(election.name));
                }
                self.artifacts.ensure_directory(&election.name)?;
                let rows = election
                    .vote_options
                    .iter()
                    .map(|option| VoteOptionInputRow {
                        option: option.option.clone(),
                    })
                    .collect::<Vec<_>>();
                self.artifacts
                    .write_table(&election.name, VOTE_OPTIONS_INPUT, &rows)?;
                self.store.create_election(&election).await?;
                Ok(election)
            }
            PhaseRequest::PostVotersKeys(name) => {
                let (election, voters) = self.registered_voters(&name).await?;
                self.artifacts.ensure_directory(&name)?;
                let rows = voters.into_iter().map(VoterKeysRow::from).collect::<Vec<_>>();
                self.artifacts.write_table(&name, VOTERS_KEYS, &rows)?;
                Ok(election)
            }
            PhaseRequest::EncryptVotes(name) => {
                let (election, voters) = self.registered_voters(&name).await?;
                self.artifacts.ensure_directory(&name)?;
                let rows = voters.into_iter().map(VoteRow::from).collect::<Vec<_>>();
                self.artifacts.write_table(&name, VOTES, &rows)?;
                Ok(election)
            }
        }
    }

    /// The election and its voters, provided registration is complete.
    async fn registered_voters(&self, name: &str) -> Result<(Election, Vec<Voter>)> {
        let election = self
            .store
            .find_election(name)
            .await?
            .ok_or_else(|| Error::ElectionNotExist(name.to_string()))?;

        let registered = self.store.count_voters(name).await?;
        let expected = election.number_of_voters;
        if registered < u64::from(expected) {
            return Err(Error::IncompleteRegistration {
                election: name.to_string(),
                registered,
                expected,
            });
        }
        if registered > u64::from(expected) {
            return Err(Error::TooManyRegistrations {
                election: name.to_string(),
                registered,
                expected,
            });
        }

        let voters = self.store.find_voters(name).await?;
        Ok((election, voters))
    }

    fn launch(&self, phase: Phase, election: &Election) -> Result<Tellers> {
        let working_dir = self.artifacts.election_dir(&election.name)?;
        let command = TellerCommand {
            interpreter: self.tellers.interpreter.as_deref(),
            program: self.tellers.program(phase),
            working_dir: &working_dir,
        };
        Ok(supervisor::launch(
            command,
            self.tellers.all_args(phase, election),
        )?)
    }

    /// Wait for every teller, then reconcile if they all succeeded.
    async fn drive(self, phase: Phase, election: Election, mut tellers: Tellers) {
        let name = election.name.clone();
        let mut run = PhaseRun::new(tellers.count() as u32);
        let deadline = Instant::now() + self.timeout;
        let mut timed_out = false;

        let gate = loop {
            let outcome = if timed_out {
                tellers.next_outcome().await
            } else {
                match timeout_at(deadline, tellers.next_outcome()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(
                            "{phase} for election {name} timed out after {}s, killing tellers",
                            self.timeout.as_secs()
                        );
                        timed_out = true;
                        tellers.kill_all();
                        continue;
                    }
                }
            };
            let Some(outcome) = outcome else {
                // Every watcher is gone without the run being decided.
                break None;
            };

            if !outcome.succeeded() {
                warn!(
                    "Teller {} of {phase} for election {name} failed (exit code {:?}, stderr: {})",
                    outcome.teller, outcome.exit_code, outcome.saw_stderr
                );
            }
            let gate = run.record(&outcome);
            self.runs.update(&name, |status| status.observe(&run)).await;
            match gate {
                Gate::Pending => continue,
                gate => break Some(gate),
            }
        };

        let failure = match (timed_out, gate) {
            (true, _) => Some("timed out".to_string()),
            (false, Some(Gate::Reconcile)) => None,
            (false, Some(Gate::Failed)) => {
                Some(format!("tellers {:?} failed", run.failed_tellers()))
            }
            (false, Some(Gate::Pending) | None) => Some("lost track of tellers".to_string()),
        };
        if let Some(reason) = failure {
            error!("{phase} for election {name} failed: {reason}");
            self.runs.update(&name, |status| status.fail(reason)).await;
            return;
        }

        info!("All tellers of {phase} for election {name} succeeded, reconciling");
        self.runs
            .update(&name, |status| status.state = RunState::Reconciling)
            .await;
        match reconcile(phase, self.store.as_ref(), &self.artifacts, &election).await {
            Ok(report) => {
                info!(
                    "{phase} for election {name} done: {} voters updated, {} mismatches",
                    report.applied, report.mismatches
                );
                self.runs
                    .update(&name, |status| status.finish(report.mismatches))
                    .await;
            }
            Err(e) => {
                error!("Failed to reconcile {phase} for election {name}: {e}");
                let reason = format!("reconciliation failed: {e}");
                self.runs.update(&name, |status| status.fail(reason)).await;
            }
        }
    }
}

impl From<Voter> for VoterKeysRow {
    fn from(voter: Voter) -> Self {
        Self {
            voter_id: voter.voter_id,
            public_key_signature: voter.public_key_signature,
            public_key_trapdoor: voter.public_key_trapdoor,
        }
    }
}

impl From<Voter> for VoteRow {
    fn from(voter: Voter) -> Self {
        let proof = voter.encrypt_proof.unwrap_or_default();
        Self {
            voter_id: voter.voter_id,
            encrypted_vote: voter.encrypted_vote.unwrap_or_default(),
            encrypted_vote_signature: voter.encrypted_vote_signature.unwrap_or_default(),
            c1_bar: proof.c1_bar,
            c1_r: proof.c1_r,
            c2_bar: proof.c2_bar,
            c2_r: proof.c2_r,
        }
    }
}

/// A fairing that places a `PhaseCoordinator` into managed state.
/// It depends on the `Config` and the `Store`, and so must be attached after
/// the fairings responsible for them.
pub struct PhaseCoordinatorFairing;

#[rocket::async_trait]
impl Fairing for PhaseCoordinatorFairing {
    fn info(&self) -> Info {
        Info {
            name: "Phase Coordinator",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Config was not available when creating the phase coordinator");
            return Err(rocket);
        };
        let Some(store) = rocket.state::<Store>() else {
            error!("Store was not available when creating the phase coordinator");
            return Err(rocket);
        };
        let coordinator = PhaseCoordinator::new(
            store.clone(),
            ArtifactStore::new(config.elections_dir()),
            config.tellers().clone(),
            config.phase_timeout(),
        );
        info!(
            "Teller artifacts will be kept under {}",
            coordinator.artifacts().root().display()
        );

        Ok(rocket.manage(coordinator))
    }
}


#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    use crate::model::db::{EncryptProof, NewVoter, VoterKey, VoterUpdate};
    use crate::store::MemoryStore;
    use crate::teller::fake;

    fn coordinator(dir: &Path, store: &Store) -> PhaseCoordinator {
        PhaseCoordinator::new(
            store.clone(),
            ArtifactStore::new(dir.join("elections")),
            TellerConfig::example(dir),
            Duration::from_secs(10),
        )
    }

    /// An initialised election "E" with both of its voters registered.
    async fn registered(dir: &Path, store: &Store) -> PhaseCoordinator {
        fake::install(dir, Phase::Init, fake::INIT);
        let coordinator = coordinator(dir, store);
        coordinator.init(Election::example()).await.unwrap();
        assert_eq!(coordinator.wait_for("E").await.state, RunState::Done);
        for n in 1..=2 {
            store.register_voter(NewVoter::example("E", n)).await.unwrap();
        }
        coordinator
    }

    fn memory_store() -> Store {
        Arc::new(MemoryStore::new())
    }

    #[rocket::async_test]
    async fn init_creates_election_with_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        fake::install(dir.path(), Phase::Init, fake::INIT);
        let coordinator = coordinator(dir.path(), &store);

        let started = coordinator.init(Election::example()).await.unwrap();
        assert_eq!(started.phase, Phase::Init);
        assert_eq!(started.tellers, 4);

        let status = coordinator.wait_for("E").await;
        assert_eq!(status.state, RunState::Done);
        assert_eq!(status.completed, 4);

        let input = dir.path().join("elections/E").join(VOTE_OPTIONS_INPUT);
        assert_eq!(std::fs::read_to_string(input).unwrap(), "option\nYes\nNo\n");
        let election = store.find_election("E").await.unwrap().unwrap();
        assert_eq!(election.g.as_deref(), Some("2"));
        assert_eq!(election.p.as_deref(), Some("23"));
        assert_eq!(election.q.as_deref(), Some("11"));
        assert_eq!(election.election_public_key.as_deref(), Some("pk-E"));
    }

    #[rocket::async_test]
    async fn init_twice_is_refused_without_launching() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;
        let input = dir.path().join("elections/E").join(VOTE_OPTIONS_INPUT);
        std::fs::remove_file(&input).unwrap();

        let mut again = Election::example();
        again.vote_options.truncate(1);
        let err = coordinator.init(again).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(!input.exists());
        // The previous run's record is untouched.
        let status = coordinator.status("E").await.unwrap();
        assert_eq!(status.phase, Phase::Init);
        assert_eq!(status.state, RunState::Done);
    }

    #[rocket::async_test]
    async fn post_voters_keys_updates_voters_and_election() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;
        fake::install(dir.path(), Phase::PostVotersKeys, fake::POST_VOTERS_KEYS);

        coordinator.post_voters_keys("E").await.unwrap();
        let status = coordinator.wait_for("E").await;
        assert_eq!(status.state, RunState::Done);
        assert_eq!(status.mismatches, 0);

        for n in 1..=2 {
            let voter = store.find_voter("E", VoterKey::Id(n)).await.unwrap().unwrap();
            let mut expected = Voter::register(NewVoter::example("E", n), n);
            expected.beta = Some(format!("beta-{n}"));
            expected.encrypted_tracker_number_in_group = Some(format!("etn-{n}"));
            assert_eq!(voter, expected);
        }

        let election = store.find_election("E").await.unwrap().unwrap();
        let options = election
            .vote_options
            .iter()
            .map(|o| (o.option.as_str(), o.option_number_in_group.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(options, vec![("Yes", Some("4")), ("No", Some("9"))]);
        let trackers = election
            .tracker_numbers
            .iter()
            .map(|t| t.tracker_number.as_str())
            .collect::<Vec<_>>();
        assert_eq!(trackers, vec!["tn-1", "tn-2"]);
    }

    #[rocket::async_test]
    async fn one_failing_teller_blocks_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;
        let script = format!("if [ \"$9\" = \"3\" ]; then exit 1; fi\n{}", fake::POST_VOTERS_KEYS);
        fake::install(dir.path(), Phase::PostVotersKeys, &script);
        let before = store.find_election("E").await.unwrap().unwrap();

        coordinator.post_voters_keys("E").await.unwrap();
        let status = coordinator.wait_for("E").await;
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.completed, 4);
        assert_eq!(status.failed_tellers, vec![3]);

        // Teller 1 wrote its outputs, but none of them were applied.
        assert!(dir.path().join("elections/E/public-associated-voters.csv").exists());
        assert_eq!(store.find_election("E").await.unwrap().unwrap(), before);
        for voter in store.find_voters("E").await.unwrap() {
            assert_eq!(voter.beta, None);
            assert_eq!(voter.encrypted_tracker_number_in_group, None);
        }
    }

    #[rocket::async_test]
    async fn stderr_output_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;
        let script = format!("if [ \"$9\" = \"2\" ]; then echo oops >&2; fi\n{}", fake::POST_VOTERS_KEYS);
        fake::install(dir.path(), Phase::PostVotersKeys, &script);

        coordinator.post_voters_keys("E").await.unwrap();
        let status = coordinator.wait_for("E").await;
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.failed_tellers, vec![2]);
        let voter = store.find_voter("E", VoterKey::Id(1)).await.unwrap().unwrap();
        assert_eq!(voter.beta, None);
    }

    #[rocket::async_test]
    async fn registration_must_be_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        fake::install(dir.path(), Phase::Init, fake::INIT);
        let coordinator = coordinator(dir.path(), &store);
        coordinator.init(Election::example()).await.unwrap();
        coordinator.wait_for("E").await;
        let keys = dir.path().join("elections/E").join(VOTERS_KEYS);

        store.register_voter(NewVoter::example("E", 1)).await.unwrap();
        let err = coordinator.post_voters_keys("E").await.unwrap_err();
        assert!(matches!(
            err,
            Error::IncompleteRegistration { registered: 1, expected: 2, .. }
        ));
        assert!(!keys.exists());

        for n in 2..=3 {
            store.register_voter(NewVoter::example("E", n)).await.unwrap();
        }
        let err = coordinator.post_voters_keys("E").await.unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyRegistrations { registered: 3, expected: 2, .. }
        ));
        assert!(!keys.exists());
        // Neither attempt replaced the Init record.
        assert_eq!(coordinator.status("E").await.unwrap().phase, Phase::Init);
    }

    #[rocket::async_test]
    async fn unknown_election_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = coordinator(dir.path(), &store);
        let err = coordinator.encrypt_votes("nope").await.unwrap_err();
        assert!(matches!(err, Error::ElectionNotExist(_)));
        assert!(coordinator.status("nope").await.is_none());
    }

    #[rocket::async_test]
    async fn encrypt_votes_writes_votes_and_sets_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;
        let vote = VoterUpdate {
            encrypted_vote: Some("ev".to_string()),
            encrypted_vote_signature: Some("evs".to_string()),
            encrypt_proof: Some(EncryptProof::example()),
            ..Default::default()
        };
        store.update_voter("E", 2, vote).await.unwrap();
        fake::install(dir.path(), Phase::EncryptVotes, fake::ENCRYPT_VOTES);

        coordinator.encrypt_votes("E").await.unwrap();
        assert_eq!(coordinator.wait_for("E").await.state, RunState::Done);

        let votes = std::fs::read_to_string(dir.path().join("elections/E").join(VOTES)).unwrap();
        assert_eq!(
            votes,
            "voterId,encryptedVote,encryptedVoteSignature,c1Bar,c1R,c2Bar,c2R\n\
             1,,,,,,\n\
             2,ev,evs,c1bar,c1r,c2bar,c2r\n"
        );
        for n in 1..=2 {
            let voter = store.find_voter("E", VoterKey::Id(n)).await.unwrap().unwrap();
            assert_eq!(voter.alpha, Some(format!("alpha-{n}")));
        }
    }

    #[rocket::async_test]
    async fn hung_teller_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let script = format!("if [ \"$9\" = \"4\" ]; then exec sleep 30; fi\n{}", fake::INIT);
        fake::install(dir.path(), Phase::Init, &script);
        let mut coordinator = coordinator(dir.path(), &store);
        coordinator.timeout = Duration::from_secs(1);

        coordinator.init(Election::example()).await.unwrap();
        let status = coordinator.wait_for("E").await;
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.reason.as_deref(), Some("timed out"));
        assert_eq!(status.completed, 4);
        assert_eq!(status.failed_tellers, vec![4]);
        let election = store.find_election("E").await.unwrap().unwrap();
        assert!(!election.has_parameters());
    }

    #[rocket::async_test]
    async fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let mut coordinator = coordinator(dir.path(), &store);
        let mut tellers = TellerConfig::example(dir.path());
        tellers.interpreter = None;
        coordinator.tellers = Arc::new(tellers);

        let err = coordinator.init(Election::example()).await.unwrap_err();
        assert!(matches!(err, Error::TellerLaunch(_)));
        let status = coordinator.status("E").await.unwrap();
        assert_eq!(status.state, RunState::Failed);
        assert!(status.reason.is_some());
    }

    #[rocket::async_test]
    async fn one_phase_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;
        let script = format!("sleep 1\n{}", fake::POST_VOTERS_KEYS);
        fake::install(dir.path(), Phase::PostVotersKeys, &script);
        fake::install(dir.path(), Phase::EncryptVotes, fake::ENCRYPT_VOTES);

        coordinator.post_voters_keys("E").await.unwrap();
        let err = coordinator.encrypt_votes("E").await.unwrap_err();
        assert!(matches!(
            err,
            Error::PhaseInProgress { phase: Phase::PostVotersKeys, .. }
        ));
        let err = coordinator.clear().await.unwrap_err();
        assert!(matches!(err, Error::PhaseInProgress { .. }));

        assert_eq!(coordinator.wait_for("E").await.state, RunState::Done);
        coordinator.encrypt_votes("E").await.unwrap();
        assert_eq!(coordinator.wait_for("E").await.state, RunState::Done);
    }

    #[rocket::async_test]
    async fn clear_deletes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let coordinator = registered(dir.path(), &store).await;

        let summary = coordinator.clear().await.unwrap();
        assert_eq!(
            summary,
            ClearSummary {
                elections: 1,
                voters: 2
            }
        );
        assert!(!store.election_exists("E").await.unwrap());
        assert!(coordinator.status("E").await.is_none());
    }
}
