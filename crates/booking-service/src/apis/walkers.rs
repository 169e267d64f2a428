//! Walker self-service endpoints under `/walkers/me`.

use super::identity::Party;
use super::{api_error, json_body};
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use booking_types::{
	APIError, Order, PositionReport, WalkerAvailability, WalkerProfileRequest, WalkerStatusRequest,
};

/// Orders currently offered to the caller, soonest first.
pub async fn pending_offers(
	State(state): State<AppState>,
	Party(actor): Party,
) -> Result<Json<Vec<Order>>, APIError> {
	let offers = state
		.engine
		.queries()
		.pending_offers(&actor)
		.await
		.map_err(|e| api_error("offers", e))?;
	Ok(Json(offers))
}

pub async fn update_profile(
	State(state): State<AppState>,
	Party(actor): Party,
	payload: Result<Json<WalkerProfileRequest>, JsonRejection>,
) -> Result<Json<WalkerAvailability>, APIError> {
	let request = json_body(payload)?;
	let availability = state
		.engine
		.walkers()
		.update_profile(&actor, request)
		.await
		.map_err(|e| api_error("profile", e))?;
	Ok(Json(availability))
}

pub async fn report_position(
	State(state): State<AppState>,
	Party(actor): Party,
	payload: Result<Json<PositionReport>, JsonRejection>,
) -> Result<Json<WalkerAvailability>, APIError> {
	let report = json_body(payload)?;
	let availability = state
		.engine
		.walkers()
		.report_position(&actor, report)
		.await
		.map_err(|e| api_error("position", e))?;
	Ok(Json(availability))
}

pub async fn set_status(
	State(state): State<AppState>,
	Party(actor): Party,
	payload: Result<Json<WalkerStatusRequest>, JsonRejection>,
) -> Result<Json<WalkerAvailability>, APIError> {
	let request = json_body(payload)?;
	let availability = state
		.engine
		.walkers()
		.set_status(&actor, request.status)
		.await
		.map_err(|e| api_error("status", e))?;
	Ok(Json(availability))
}
