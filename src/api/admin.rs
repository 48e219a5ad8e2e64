use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::api::{ClearSummary, ElectionRequest, InitRequest, Validate},
    teller::{PhaseCoordinator, PhaseStatus},
};

pub fn routes() -> Vec<Route> {
    routes![init, post_voters_keys, encrypt_votes, clear, phase_status]
}

/// Create an election and start generating its parameters.
#[post("/admin/init", data = "<request>", format = "json")]
async fn init(
    request: Json<InitRequest>,
    coordinator: &State<PhaseCoordinator>,
) -> Result<(Status, Json<PhaseStatus>)> {
    request.validate()?;
    let status = coordinator.init(request.0.into()).await?;
    Ok((Status::Accepted, Json(status)))
}

#[post("/admin/postVotersKeys", data = "<request>", format = "json")]
async fn post_voters_keys(
    request: Json<ElectionRequest>,
    coordinator: &State<PhaseCoordinator>,
) -> Result<(Status, Json<PhaseStatus>)> {
    request.validate()?;
    let status = coordinator.post_voters_keys(&request.election_name).await?;
    Ok((Status::Accepted, Json(status)))
}

#[post("/admin/encryptVotes", data = "<request>", format = "json")]
async fn encrypt_votes(
    request: Json<ElectionRequest>,
    coordinator: &State<PhaseCoordinator>,
) -> Result<(Status, Json<PhaseStatus>)> {
    request.validate()?;
    let status = coordinator.encrypt_votes(&request.election_name).await?;
    Ok((Status::Accepted, Json(status)))
}

#[delete("/admin/clear")]
async fn clear(coordinator: &State<PhaseCoordinator>) -> Result<Json<ClearSummary>> {
    let summary = coordinator.clear().await?;
    Ok(Json(summary))
}

/// The latest phase run of an election.
#[get("/admin/phase/<election_name>")]
async fn phase_status(
    election_name: &str,
    coordinator: &State<PhaseCoordinator>,
) -> Result<Json<PhaseStatus>> {
    coordinator
        .status(election_name)
        .await
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("Phase run for election {election_name}")))
}
