use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifacts::{ASSOCIATED_VOTERS, VOTERS_KEYS, VOTES, VOTE_OPTIONS_INPUT};
use crate::model::db::Election;

/// The coordinated steps of the protocol, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Generate the group parameters and the joint election key.
    Init,
    /// Associate registered voters with their tracker numbers.
    PostVotersKeys,
    /// Mix and encrypt the cast votes.
    EncryptVotes,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "Init",
            Self::PostVotersKeys => "PostVotersKeys",
            Self::EncryptVotes => "EncryptVotes",
        };
        f.write_str(name)
    }
}

/// How teller processes are started. Read from the `tellers` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TellerConfig {
    /// Program the phase scripts are run through, e.g. `expect`.
    /// If absent the phase programs are executed directly.
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    pub init_program: PathBuf,
    pub post_voters_keys_program: PathBuf,
    pub encrypt_votes_program: PathBuf,
    pub home_dir: String,
    pub jar: String,
    pub ssh_key: String,
    pub ssh_host: String,
    pub mode: String,
    /// Address the tellers listen on.
    pub host: String,
    /// Teller `i` listens on `base_port + i`.
    pub base_port: u16,
    /// Teller `i` bootstraps on `base_bootstrap_port + i`.
    pub base_bootstrap_port: u16,
}

impl TellerConfig {
    pub fn program(&self, phase: Phase) -> &Path {
        match phase {
            Phase::Init => &self.init_program,
            Phase::PostVotersKeys => &self.post_voters_keys_program,
            Phase::EncryptVotes => &self.encrypt_votes_program,
        }
    }

    /// The argument vector for one teller (1-based) of a phase run.
    pub fn args(&self, phase: Phase, election: &Election, teller: u32) -> Vec<String> {
        let mut args = vec![
            self.home_dir.clone(),
            self.jar.clone(),
            self.ssh_key.clone(),
            self.ssh_host.clone(),
            self.mode.clone(),
            election.name.clone(),
            election.number_of_tellers.to_string(),
            election.threshold_tellers.to_string(),
            teller.to_string(),
            self.host.clone(),
            (u32::from(self.base_port) + teller).to_string(),
            (u32::from(self.base_bootstrap_port) + teller).to_string(),
        ];

        // The first teller drives the phase and is told where its files are.
        if teller == 1 {
            args.push(election.number_of_voters.to_string());
            match phase {
                Phase::Init => args.push(VOTE_OPTIONS_INPUT.to_string()),
                Phase::PostVotersKeys => {
                    args.push(VOTERS_KEYS.to_string());
                    args.push(ASSOCIATED_VOTERS.to_string());
                }
                Phase::EncryptVotes => args.push(VOTES.to_string()),
            }
        }

        args
    }

    /// Argument vectors for every teller of the election, in teller order.
    pub fn all_args(&self, phase: Phase, election: &Election) -> Vec<Vec<String>> {
        (1..=election.number_of_tellers)
            .map(|teller| self.args(phase, election, teller))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tellers_get_their_own_ports() {
        let config = TellerConfig::example(Path::new("/tellers"));
        let election = Election::example();
        let args = config.all_args(Phase::Init, &election);

        assert_eq!(args.len(), 4);
        assert_eq!(
            args[2],
            vec![
                "/home/vmv",
                "vmv.jar",
                "id_ed25519",
                "localhost",
                "expect",
                "E",
                "4",
                "3",
                "3",
                "127.0.0.1",
                "8083",
                "4043"
            ]
        );
    }

    #[test]
    fn first_teller_gets_phase_files() {
        let config = TellerConfig::example(Path::new("/tellers"));
        let election = Election::example();

        let init = config.args(Phase::Init, &election, 1);
        assert_eq!(&init[12..], ["2", VOTE_OPTIONS_INPUT]);

        let post = config.args(Phase::PostVotersKeys, &election, 1);
        assert_eq!(&post[12..], ["2", VOTERS_KEYS, ASSOCIATED_VOTERS]);

        let encrypt = config.args(Phase::EncryptVotes, &election, 1);
        assert_eq!(&encrypt[12..], ["2", VOTES]);

        for teller in 2..=4 {
            assert_eq!(config.args(Phase::PostVotersKeys, &election, teller).len(), 12);
        }
    }
}
