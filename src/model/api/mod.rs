//! API-compatible types.
//!
//! Request bodies default every missing field, so that a missing field is
//! reported by [`Validate`] together with every other problem instead of
//! failing deserialisation on the first one.

pub mod admin;
pub mod voter;

pub use admin::{ClearSummary, ElectionRequest, InitRequest};
pub use voter::{
    AlphaRequest, AlphaResponse, ElectionParams, MixedVoters, UploadKeysRequest,
    UploadKeysResponse, VoteRequest, VoterParamsRequest, VoterParamsResponse,
};

use crate::artifacts::is_valid_election_name;
use crate::error::{Error, Result};

/// A request body that can be checked before anything is done with it.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Collects every problem with a request.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    /// Require a non-blank string field.
    pub fn present(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.0.push(format!("{field} is required"));
        }
        self
    }

    /// Require a usable election name.
    pub fn election_name(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.0.push(format!("{field} is required"));
        } else if !is_valid_election_name(value) {
            self.0.push(format!(
                "{field} may only contain letters, digits, '.', '_' and '-'"
            ));
        }
        self
    }

    pub fn check(&mut self, ok: bool, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.0.push(message.into());
        }
        self
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(std::mem::take(&mut self.0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_are_collected() {
        let err = Violations::default()
            .present("deviceId", " ")
            .election_name("electionName", "../etc")
            .check(true, "never reported")
            .check(false, "numberOfVoters must be at least 1")
            .finish()
            .unwrap_err();
        match err {
            Error::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error {other:?}"),
        }

        assert!(Violations::default()
            .present("deviceId", "d")
            .election_name("electionName", "E")
            .finish()
            .is_ok());
    }
}
