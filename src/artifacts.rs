//! Tabular files exchanged with the teller processes.
//!
//! Every election owns a directory under the configured elections root. The
//! coordinator writes phase inputs there and the tellers write their outputs
//! next to them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Init input: vote option names.
pub const VOTE_OPTIONS_INPUT: &str = "vote-options.csv";
/// Init output: group parameters.
pub const ELECTION_PARAMS: &str = "public-election-params.csv";
/// Init output: the joint election public key.
pub const ELECTION_KEYS: &str = "public-election-keys.csv";
/// PostVotersKeys input: every registered voter's public keys.
pub const VOTERS_KEYS: &str = "public-voters-keys.csv";
/// PostVotersKeys output: per-voter beta and encrypted tracker number.
pub const ASSOCIATED_VOTERS: &str = "public-associated-voters.csv";
/// PostVotersKeys output: vote options mapped into the group.
pub const VOTE_OPTIONS: &str = "public-vote-options.csv";
/// PostVotersKeys output: published tracker numbers.
pub const TRACKER_NUMBERS: &str = "public-tracker-numbers.csv";
/// EncryptVotes input: the votes cast by each voter.
pub const VOTES: &str = "public-votes.csv";
/// EncryptVotes output: per-voter alpha.
pub const ENCRYPTED_VOTERS: &str = "public-encrypted-voters.csv";
/// Mixed voters as published by the first teller.
pub const MIXED_VOTERS: &str = "public-mixed-voters-1.csv";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid election name {0:?}")]
    InvalidName(String),
    #[error("Failed to create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{} has no rows", path.display())]
    Empty { path: PathBuf },
    #[error("{} lists options {found:?}, expected {expected:?}", path.display())]
    UnexpectedOptions {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Is `name` usable as a single directory name?
pub fn is_valid_election_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Per-election directories of CSV tables.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory belonging to the given election.
    pub fn election_dir(&self, election: &str) -> Result<PathBuf, ArtifactError> {
        if !is_valid_election_name(election) {
            return Err(ArtifactError::InvalidName(election.to_string()));
        }
        Ok(self.root.join(election))
    }

    /// Create the election's directory if it doesn't exist yet.
    pub fn ensure_directory(&self, election: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.election_dir(election)?;
        fs::create_dir_all(&path).map_err(|source| ArtifactError::Directory {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Write `rows` to `file` in the election's directory, replacing any
    /// previous content. Columns are the serialized field names of `T`.
    pub fn write_table<T: Serialize>(
        &self,
        election: &str,
        file: &str,
        rows: &[T],
    ) -> Result<(), ArtifactError> {
        let path = self.election_dir(election)?.join(file);
        let write = || -> Result<(), csv::Error> {
            let mut writer = csv::Writer::from_path(&path)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            Ok(())
        };
        write().map_err(|source| ArtifactError::Write {
            path: path.clone(),
            source,
        })?;
        trace!("Wrote {} rows to {}", rows.len(), path.display());
        Ok(())
    }

    /// Read every row of `file` in the election's directory.
    pub fn read_table<T: DeserializeOwned>(
        &self,
        election: &str,
        file: &str,
    ) -> Result<Vec<T>, ArtifactError> {
        let path = self.election_dir(election)?.join(file);
        let read = || -> Result<Vec<T>, csv::Error> {
            csv::Reader::from_path(&path)?.deserialize().collect()
        };
        read().map_err(|source| ArtifactError::Read { path, source })
    }

    /// Read a table whose columns aren't known ahead of time.
    pub fn read_raw_table(
        &self,
        election: &str,
        file: &str,
    ) -> Result<Vec<BTreeMap<String, String>>, ArtifactError> {
        self.read_table(election, file)
    }
}

/// A row of [`VOTE_OPTIONS_INPUT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOptionInputRow {
    pub option: String,
}

/// A row of [`ELECTION_PARAMS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionParamsRow {
    pub g: String,
    pub p: String,
    pub q: String,
}

/// A row of [`ELECTION_KEYS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionKeyRow {
    pub public_key: String,
}

/// A row of [`VOTERS_KEYS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterKeysRow {
    pub voter_id: u32,
    pub public_key_signature: String,
    pub public_key_trapdoor: String,
}

/// A row of [`ASSOCIATED_VOTERS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedVoterRow {
    pub voter_id: u32,
    pub beta: String,
    pub encrypted_tracker_number_in_group: String,
}

/// A row of [`VOTE_OPTIONS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOptionRow {
    pub option: String,
    pub option_number_in_group: String,
}

/// A row of [`TRACKER_NUMBERS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerNumberRow {
    pub tracker_number: String,
    pub tracker_number_in_group: String,
    pub encrypted_tracker_number_in_group: String,
}

/// A row of [`VOTES`]. Voters who haven't voted get empty fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRow {
    pub voter_id: u32,
    pub encrypted_vote: String,
    pub encrypted_vote_signature: String,
    pub c1_bar: String,
    pub c1_r: String,
    pub c2_bar: String,
    pub c2_r: String,
}

/// A row of [`ENCRYPTED_VOTERS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVoterRow {
    pub voter_id: u32,
    pub alpha: String,
}
