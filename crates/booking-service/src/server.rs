//! HTTP server for the booking API.
//!
//! Routes live under `/api`; identity comes from the `X-Party-Id` and
//! `X-Party-Role` headers set by the gateway in front of the service.

use crate::apis::{orders, walkers};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use booking_config::{ApiConfig, CorsConfig};
use booking_core::BookingEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<BookingEngine>,
}

/// Builds the CORS layer from `[api.cors]`. Permissive when absent.
fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let origins: Vec<HeaderValue> = cors
		.allowed_origins
		.iter()
		.filter_map(|origin| match origin.parse() {
			Ok(value) => Some(value),
			Err(_) => {
				tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
				None
			},
		})
		.collect();
	let headers: Vec<HeaderName> = cors
		.allowed_headers
		.iter()
		.filter_map(|header| header.parse().ok())
		.collect();
	let methods: Vec<Method> = cors
		.allowed_methods
		.iter()
		.filter_map(|method| method.parse().ok())
		.collect();

	CorsLayer::new()
		.allow_origin(AllowOrigin::list(origins))
		.allow_headers(AllowHeaders::list(headers))
		.allow_methods(AllowMethods::list(methods))
}

pub fn router(api_config: &ApiConfig, engine: Arc<BookingEngine>) -> Router {
	let api = Router::new()
		.route("/health", get(health))
		.route(
			"/orders",
			post(orders::create_order).get(orders::list_orders),
		)
		.route("/orders/estimate", get(orders::estimate))
		.route("/orders/statistics", get(orders::statistics))
		.route(
			"/orders/{id}",
			get(orders::get_order).patch(orders::update_order),
		)
		.route("/orders/{id}/history", get(orders::order_history))
		.route("/orders/{id}/accept", post(orders::accept_order))
		.route("/orders/{id}/start", post(orders::start_order))
		.route("/orders/{id}/complete", post(orders::complete_order))
		.route("/orders/{id}/cancel", post(orders::cancel_order))
		.route("/orders/{id}/track", post(orders::append_track_point))
		.route("/orders/{id}/review", post(orders::review_order))
		.route("/orders/{id}/notes", post(orders::add_walker_notes))
		.route("/walkers/me/offers", get(walkers::pending_offers))
		.route("/walkers/me/profile", put(walkers::update_profile))
		.route("/walkers/me/position", put(walkers::report_position))
		.route("/walkers/me/status", put(walkers::set_status));

	Router::new()
		.nest("/api", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(api_config.cors.as_ref()))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(AppState { engine })
}

/// Serves the API until the listener fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<BookingEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(&api_config, engine);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!("Booking API server starting on {}", bind_address);

	axum::serve(listener, app).await?;
	Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
	Json(json!({
		"status": "ok",
		"service": state.engine.config().service.id,
	}))
}
