use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    artifacts::MIXED_VOTERS,
    error::{Error, Result},
    model::{
        api::{
            AlphaRequest, AlphaResponse, ElectionParams, MixedVoters, UploadKeysRequest,
            UploadKeysResponse, Validate, Violations, VoteRequest, VoterParamsRequest,
            VoterParamsResponse,
        },
        db::{Election, VoterKey},
    },
    store::Store,
    teller::PhaseCoordinator,
};

pub fn routes() -> Vec<Route> {
    routes![
        get_election_params,
        upload_keys,
        get_voter_params_and_options,
        vote,
        get_alpha_and_tracker_numbers,
        get_mixed_voters,
    ]
}

#[get("/voter/getElectionParams/<election_name>")]
async fn get_election_params(
    election_name: &str,
    store: &State<Store>,
) -> Result<Json<ElectionParams>> {
    let election = find_election(store, election_name).await?;
    Ok(Json(election.into()))
}

/// Register a voter's keys, assigning the next voter ID.
#[post("/voter/uploadKeys", data = "<request>", format = "json")]
async fn upload_keys(
    request: Json<UploadKeysRequest>,
    store: &State<Store>,
) -> Result<(Status, Json<UploadKeysResponse>)> {
    request.validate()?;
    if !store.election_exists(&request.election_name).await? {
        return Err(Error::ElectionNotExist(request.0.election_name));
    }
    let voter = store.register_voter(request.0.into()).await?;
    debug!(
        "Registered voter {} of election {}",
        voter.voter_id, voter.election_name
    );
    Ok((
        Status::Created,
        Json(UploadKeysResponse {
            voter_id: voter.voter_id,
        }),
    ))
}

#[post("/voter/getVoterParamsAndOptions", data = "<request>", format = "json")]
async fn get_voter_params_and_options(
    request: Json<VoterParamsRequest>,
    store: &State<Store>,
) -> Result<Json<VoterParamsResponse>> {
    request.validate()?;
    let name = request.election_name.as_str();
    let election = find_election(store, name).await?;
    let voter = store
        .find_voter(name, VoterKey::Device(&request.device_id))
        .await?
        .ok_or_else(|| Error::NoSuchVoter(name.to_string()))?;

    // Voters can only vote once the tellers have associated them.
    let options_mapped = election
        .vote_options
        .iter()
        .all(|option| option.option_number_in_group.is_some());
    match (voter.beta, voter.encrypted_tracker_number_in_group) {
        (Some(beta), Some(encrypted_tracker_number_in_group)) if options_mapped => {
            Ok(Json(VoterParamsResponse {
                beta,
                encrypted_tracker_number_in_group,
                vote_options: election.vote_options,
            }))
        }
        _ => Err(Error::ElectionNotStarted(name.to_string())),
    }
}

/// Store a voter's encrypted vote. Voting again replaces the previous vote.
#[post("/voter/vote", data = "<request>", format = "json")]
async fn vote(request: Json<VoteRequest>, store: &State<Store>) -> Result<()> {
    request.validate()?;
    let name = request.election_name.clone();
    find_election(store, &name).await?;
    let voter = store
        .find_voter(&name, VoterKey::Beta(&request.beta))
        .await?
        .ok_or_else(|| Error::VoterNotExist(name.clone()))?;
    store
        .update_voter(&name, voter.voter_id, request.0.into_update())
        .await?;
    debug!("Voter {} of election {name} voted", voter.voter_id);
    Ok(())
}

#[post("/voter/getAlphaAndTN", data = "<request>", format = "json")]
async fn get_alpha_and_tracker_numbers(
    request: Json<AlphaRequest>,
    store: &State<Store>,
) -> Result<Json<AlphaResponse>> {
    request.validate()?;
    let name = request.election_name.as_str();
    let election = find_election(store, name).await?;
    let voter = store
        .find_voter(name, VoterKey::Beta(&request.beta))
        .await?
        .ok_or_else(|| Error::VoterNotExist(name.to_string()))?;
    let alpha = voter
        .alpha
        .ok_or_else(|| Error::ElectionNotEnded(name.to_string()))?;
    Ok(Json(AlphaResponse {
        alpha,
        tracker_numbers: election.tracker_numbers,
    }))
}

/// The mixed voters published by the first teller after `encryptVotes`.
#[get("/voter/getMixedVoters/<election_name>")]
async fn get_mixed_voters(
    election_name: &str,
    coordinator: &State<PhaseCoordinator>,
) -> Result<Json<MixedVoters>> {
    Violations::default()
        .election_name("electionName", election_name)
        .finish()?;
    let voters = coordinator
        .artifacts()
        .read_raw_table(election_name, MIXED_VOTERS)?;
    Ok(Json(MixedVoters { voters }))
}

async fn find_election(store: &Store, name: &str) -> Result<Election> {
    store
        .find_election(name)
        .await?
        .ok_or_else(|| Error::ElectionNotExist(name.to_string()))
}
