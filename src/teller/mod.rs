//! Running the teller processes of each protocol phase.

mod coordinator;
mod phase;
mod reconcile;
mod run;
mod status;
mod supervisor;

pub use coordinator::{PhaseCoordinator, PhaseCoordinatorFairing};
pub use phase::{Phase, TellerConfig};
pub use reconcile::{match_rows, reconcile, Matched, Report};
pub use run::{Gate, PhaseRun};
pub use status::{PhaseRuns, PhaseStatus, RunState};
pub use supervisor::{launch, LaunchError, TellerCommand, TellerOutcome, Tellers};

/// Fake teller programs for tests, run through `/bin/sh`.
///
/// The first teller reads the input file it is given and writes every output
/// of the phase; the others just exit. `$9` is the teller index.
#[cfg(test)]
pub mod fake {
    use std::fs;
    use std::path::Path;

    use super::Phase;

    pub const INIT: &str = r#"
if [ "$9" = "1" ]; then
  test -f "${14}" || exit 2
  printf 'g,p,q\n2,23,11\n' > public-election-params.csv
  printf 'publicKey\npk-%s\n' "$6" > public-election-keys.csv
fi
exit 0
"#;

    pub const POST_VOTERS_KEYS: &str = r#"
if [ "$9" = "1" ]; then
  test -f "${14}" || exit 2
  echo 'voterId,beta,encryptedTrackerNumberInGroup' > "${15}"
  echo 'trackerNumber,trackerNumberInGroup,encryptedTrackerNumberInGroup' > public-tracker-numbers.csv
  tail -n +2 "${14}" | while IFS=, read -r id sig trap; do
    echo "$id,beta-$id,etn-$id" >> "${15}"
    echo "tn-$id,tnig-$id,etn-$id" >> public-tracker-numbers.csv
  done
  printf 'option,optionNumberInGroup\nYes,4\nNo,9\n' > public-vote-options.csv
fi
exit 0
"#;

    pub const ENCRYPT_VOTES: &str = r#"
if [ "$9" = "1" ]; then
  test -f "${14}" || exit 2
  echo 'voterId,alpha' > public-encrypted-voters.csv
  echo 'voterId,vote' > public-mixed-voters-1.csv
  tail -n +2 "${14}" | while IFS=, read -r id rest; do
    echo "$id,alpha-$id" >> public-encrypted-voters.csv
    echo "$id,Yes" >> public-mixed-voters-1.csv
  done
fi
exit 0
"#;

    /// Make `script` the program of `phase` for `TellerConfig::example(dir)`.
    pub fn install(dir: &Path, phase: Phase, script: &str) {
        fs::write(dir.join(phase.script_name()), script).unwrap();
    }
}
