use std::collections::BTreeSet;

use super::supervisor::TellerOutcome;

/// What the coordinator should do after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Not every teller has reported yet.
    Pending,
    /// Every teller succeeded: reconcile the outputs.
    Reconcile,
    /// Every teller has reported and at least one failed.
    Failed,
}

/// Aggregate of the teller outcomes of one phase run.
///
/// Counting and the error flag are both order independent, so the verdict is
/// the same whichever order the tellers finish in. The final verdict is handed
/// out exactly once; outcomes after that, repeats, and unknown teller indices
/// are ignored.
#[derive(Debug, Clone)]
pub struct PhaseRun {
    expected: u32,
    reported: BTreeSet<u32>,
    failed: BTreeSet<u32>,
    closed: bool,
}

impl PhaseRun {
    pub fn new(expected: u32) -> Self {
        Self {
            expected,
            reported: BTreeSet::new(),
            failed: BTreeSet::new(),
            closed: false,
        }
    }

    pub fn record(&mut self, outcome: &TellerOutcome) -> Gate {
        if self.closed || outcome.teller == 0 || outcome.teller > self.expected {
            return Gate::Pending;
        }
        if !self.reported.insert(outcome.teller) {
            warn!("Ignoring repeated outcome of teller {}", outcome.teller);
            return Gate::Pending;
        }
        if !outcome.succeeded() {
            self.failed.insert(outcome.teller);
        }

        if self.completed() < self.expected {
            return Gate::Pending;
        }
        self.closed = true;
        if self.has_error() {
            Gate::Failed
        } else {
            Gate::Reconcile
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn completed(&self) -> u32 {
        self.reported.len() as u32
    }

    /// Sticky: once a teller has failed this stays true.
    pub fn has_error(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Tellers that exited nonzero or wrote to stderr, in index order.
    pub fn failed_tellers(&self) -> Vec<u32> {
        self.failed.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(teller: u32) -> TellerOutcome {
        TellerOutcome {
            teller,
            exit_code: Some(0),
            saw_stderr: false,
        }
    }

    /// Every ordering of `items`.
    fn permutations(items: &[TellerOutcome]) -> Vec<Vec<TellerOutcome>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let first = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                all.push(tail);
            }
        }
        all
    }

    /// Feed `outcomes` in order, returning every non-pending gate with the
    /// index of the event that produced it.
    fn verdicts(expected: u32, outcomes: &[TellerOutcome]) -> Vec<(usize, Gate)> {
        let mut run = PhaseRun::new(expected);
        outcomes
            .iter()
            .enumerate()
            .map(|(i, outcome)| (i, run.record(outcome)))
            .filter(|(_, gate)| *gate != Gate::Pending)
            .collect()
    }

    #[test]
    fn all_succeeding_reconciles_once_in_any_order() {
        let outcomes: Vec<_> = (1..=4).map(ok).collect();
        for order in permutations(&outcomes) {
            assert_eq!(verdicts(4, &order), vec![(3, Gate::Reconcile)]);
        }
    }

    #[test]
    fn one_failure_fails_in_any_order() {
        let mut outcomes: Vec<_> = (1..=4).map(ok).collect();
        outcomes[2].exit_code = Some(1);
        for order in permutations(&outcomes) {
            assert_eq!(verdicts(4, &order), vec![(3, Gate::Failed)]);
        }
    }

    #[test]
    fn stderr_counts_as_failure() {
        let mut outcomes: Vec<_> = (1..=2).map(ok).collect();
        outcomes[0].saw_stderr = true;
        let mut run = PhaseRun::new(2);
        assert_eq!(run.record(&outcomes[0]), Gate::Pending);
        assert!(run.has_error());
        assert_eq!(run.record(&outcomes[1]), Gate::Failed);
        assert_eq!(run.failed_tellers(), vec![1]);
    }

    #[test]
    fn killed_teller_fails() {
        let mut run = PhaseRun::new(1);
        let killed = TellerOutcome {
            teller: 1,
            exit_code: None,
            saw_stderr: false,
        };
        assert_eq!(run.record(&killed), Gate::Failed);
    }

    #[test]
    fn repeats_and_strangers_are_ignored() {
        let mut run = PhaseRun::new(2);
        assert_eq!(run.record(&ok(1)), Gate::Pending);
        assert_eq!(run.record(&ok(1)), Gate::Pending);
        assert_eq!(run.record(&ok(3)), Gate::Pending);
        assert_eq!(run.record(&ok(0)), Gate::Pending);
        assert_eq!(run.completed(), 1);
        assert_eq!(run.record(&ok(2)), Gate::Reconcile);
        // Closed: no second verdict.
        assert_eq!(run.record(&ok(2)), Gate::Pending);
        assert_eq!(run.expected(), 2);
    }
}
