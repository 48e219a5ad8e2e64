use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::tokio::sync::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{Phase, PhaseRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    /// Tellers are in flight.
    Running,
    /// Every teller succeeded and their outputs are being applied.
    Reconciling,
    Done,
    Failed,
}

impl RunState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Reconciling)
    }
}

/// The observable record of the latest phase run of an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStatus {
    pub phase: Phase,
    pub state: RunState,
    /// Number of tellers launched.
    pub tellers: u32,
    /// Number of tellers that have exited.
    pub completed: u32,
    pub failed_tellers: Vec<u32>,
    /// Output rows and voters that could not be matched up.
    pub mismatches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseStatus {
    fn started(phase: Phase) -> Self {
        Self {
            phase,
            state: RunState::Running,
            tellers: 0,
            completed: 0,
            failed_tellers: Vec::new(),
            mismatches: 0,
            reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Copy the teller counts out of a run.
    pub fn observe(&mut self, run: &PhaseRun) {
        self.tellers = run.expected();
        self.completed = run.completed();
        self.failed_tellers = run.failed_tellers();
    }

    pub fn finish(&mut self, mismatches: u32) {
        self.state = RunState::Done;
        self.mismatches = mismatches;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = RunState::Failed;
        self.reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Latest phase run per election.
///
/// An active record doubles as the election's phase lock: no second phase can
/// start for that election until it is done or failed.
#[derive(Debug, Clone, Default)]
pub struct PhaseRuns {
    runs: Arc<Mutex<HashMap<String, PhaseStatus>>>,
}

impl PhaseRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, election: &str) -> Option<PhaseStatus> {
        self.runs.lock().await.get(election).cloned()
    }

    /// Elections with a phase still running, and which phase.
    pub async fn active(&self) -> Vec<(String, Phase)> {
        let runs = self.runs.lock().await;
        let mut active = runs
            .iter()
            .filter(|(_, status)| status.state.is_active())
            .map(|(election, status)| (election.clone(), status.phase))
            .collect::<Vec<_>>();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active
    }

    /// Reserve the election for a new run of `phase`.
    /// Returns the record it replaces, for [`Self::release`].
    pub async fn begin(&self, election: &str, phase: Phase) -> Result<Option<PhaseStatus>> {
        let mut runs = self.runs.lock().await;
        if let Some(current) = runs.get(election) {
            if current.state.is_active() {
                return Err(Error::PhaseInProgress {
                    election: election.to_string(),
                    phase: current.phase,
                });
            }
        }
        Ok(runs.insert(election.to_string(), PhaseStatus::started(phase)))
    }

    /// Undo a [`Self::begin`] for a run that never started.
    pub async fn release(&self, election: &str, previous: Option<PhaseStatus>) {
        let mut runs = self.runs.lock().await;
        match previous {
            Some(previous) => runs.insert(election.to_string(), previous),
            None => runs.remove(election),
        };
    }

    /// Change the election's record in place, returning the result.
    pub async fn update(
        &self,
        election: &str,
        change: impl FnOnce(&mut PhaseStatus),
    ) -> Option<PhaseStatus> {
        match self.runs.lock().await.get_mut(election) {
            Some(status) => {
                change(status);
                Some(status.clone())
            }
            None => {
                warn!("No phase run recorded for election {election}");
                None
            }
        }
    }

    /// Run `task` while no phase is running anywhere, then forget every record.
    pub async fn when_idle<T, F>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut runs = self.runs.lock().await;
        if let Some((election, status)) = runs.iter().find(|(_, s)| s.state.is_active()) {
            return Err(Error::PhaseInProgress {
                election: election.clone(),
                phase: status.phase,
            });
        }
        let result = task.await?;
        runs.clear();
        Ok(result)
    }
}
