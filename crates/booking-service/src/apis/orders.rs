//! Order endpoints.
//!
//! Every mutating route answers with the order snapshot after the operation.

use super::identity::Party;
use super::{api_error, json_body, optional_json_body, query_params};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use booking_types::{
	APIError, CancelOrderRequest, CreateOrderRequest, EstimateQuery, EstimateResponse,
	ListOrdersQuery, Order, OrderPage, OrderStatistics, ReviewRequest, StatusTransition,
	TrackPointRequest, UpdateOrderRequest, WalkerNotesRequest,
};

type ApiResult<T> = Result<Json<T>, APIError>;

pub async fn create_order(
	State(state): State<AppState>,
	Party(actor): Party,
	payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), APIError> {
	let request = json_body(payload)?;
	let order = state
		.engine
		.lifecycle()
		.create(&actor, request)
		.await
		.map_err(|e| api_error("create", e))?;
	Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
	State(state): State<AppState>,
	Party(actor): Party,
	query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> ApiResult<OrderPage> {
	let query = query_params(query)?;
	let page = state
		.engine
		.queries()
		.list(&actor, &query)
		.await
		.map_err(|e| api_error("list", e))?;
	Ok(Json(page))
}

/// Any authenticated party may ask for an estimate.
pub async fn estimate(
	State(state): State<AppState>,
	Party(_actor): Party,
	query: Result<Query<EstimateQuery>, QueryRejection>,
) -> ApiResult<EstimateResponse> {
	let query = query_params(query)?;
	let estimate = state
		.engine
		.queries()
		.estimate(&query)
		.await
		.map_err(|e| api_error("estimate", e))?;
	Ok(Json(estimate))
}

pub async fn statistics(
	State(state): State<AppState>,
	Party(actor): Party,
) -> ApiResult<OrderStatistics> {
	let statistics = state
		.engine
		.queries()
		.statistics(&actor)
		.await
		.map_err(|e| api_error("statistics", e))?;
	Ok(Json(statistics))
}

pub async fn get_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
) -> ApiResult<Order> {
	let order = state
		.engine
		.queries()
		.get(&id, &actor)
		.await
		.map_err(|e| api_error("get", e))?;
	Ok(Json(order))
}

pub async fn order_history(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
) -> ApiResult<Vec<StatusTransition>> {
	let history = state
		.engine
		.queries()
		.history(&id, &actor)
		.await
		.map_err(|e| api_error("history", e))?;
	Ok(Json(history))
}

pub async fn update_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
	payload: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> ApiResult<Order> {
	let request = json_body(payload)?;
	let order = state
		.engine
		.lifecycle()
		.update_details(&id, &actor, request)
		.await
		.map_err(|e| api_error("update", e))?;
	Ok(Json(order))
}

pub async fn accept_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
) -> ApiResult<Order> {
	let order = state
		.engine
		.lifecycle()
		.accept(&id, &actor)
		.await
		.map_err(|e| api_error("accept", e))?;
	Ok(Json(order))
}

pub async fn start_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
) -> ApiResult<Order> {
	let order = state
		.engine
		.lifecycle()
		.start(&id, &actor)
		.await
		.map_err(|e| api_error("start", e))?;
	Ok(Json(order))
}

pub async fn complete_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
) -> ApiResult<Order> {
	let order = state
		.engine
		.lifecycle()
		.complete(&id, &actor)
		.await
		.map_err(|e| api_error("complete", e))?;
	Ok(Json(order))
}

/// The reason is optional, so is the body.
pub async fn cancel_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
	body: Bytes,
) -> ApiResult<Order> {
	let request: CancelOrderRequest = optional_json_body(body)?;
	let order = state
		.engine
		.lifecycle()
		.cancel(&id, &actor, request)
		.await
		.map_err(|e| api_error("cancel", e))?;
	Ok(Json(order))
}

pub async fn append_track_point(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
	payload: Result<Json<TrackPointRequest>, JsonRejection>,
) -> ApiResult<Order> {
	let request = json_body(payload)?;
	let order = state
		.engine
		.lifecycle()
		.append_track_point(&id, &actor, request)
		.await
		.map_err(|e| api_error("track", e))?;
	Ok(Json(order))
}

pub async fn review_order(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
	payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> ApiResult<Order> {
	let request = json_body(payload)?;
	let order = state
		.engine
		.lifecycle()
		.review(&id, &actor, request)
		.await
		.map_err(|e| api_error("review", e))?;
	Ok(Json(order))
}

pub async fn add_walker_notes(
	State(state): State<AppState>,
	Party(actor): Party,
	Path(id): Path<String>,
	payload: Result<Json<WalkerNotesRequest>, JsonRejection>,
) -> ApiResult<Order> {
	let request = json_body(payload)?;
	let order = state
		.engine
		.lifecycle()
		.add_walker_notes(&id, &actor, request)
		.await
		.map_err(|e| api_error("notes", e))?;
	Ok(Json(order))
}
