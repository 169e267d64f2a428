//! Walker-facing writes to the geo index.

use crate::engine::context::BookingContext;
use crate::error::BookingError;
use booking_types::{
	truncate_id, Actor, GeoPoint, PositionReport, Role, WalkerAvailability, WalkerProfile,
	WalkerProfileRequest, WalkerStatus,
};
use chrono::Utc;
use validator::Validate;

pub struct WalkerHandler {
	ctx: BookingContext,
}

fn require_walker(actor: &Actor) -> Result<(), BookingError> {
	if actor.role != Role::Walker {
		return Err(BookingError::Unauthorized(
			"Only walkers can manage walker availability".into(),
		));
	}
	Ok(())
}

impl WalkerHandler {
	pub fn new(ctx: BookingContext) -> Self {
		Self { ctx }
	}

	/// Records a position report. Reports older than the stored one are
	/// ignored by the index.
	pub async fn report_position(
		&self,
		actor: &Actor,
		report: PositionReport,
	) -> Result<WalkerAvailability, BookingError> {
		require_walker(actor)?;
		report.validate()?;
		let timestamp = report.timestamp.unwrap_or_else(Utc::now);
		let availability = self
			.ctx
			.geo
			.upsert_position(
				&actor.party_id,
				GeoPoint::new(report.latitude, report.longitude),
				timestamp,
			)
			.await?;
		tracing::trace!(walker_id = %truncate_id(&actor.party_id), "Position updated");
		Ok(availability)
	}

	pub async fn set_status(
		&self,
		actor: &Actor,
		status: WalkerStatus,
	) -> Result<WalkerAvailability, BookingError> {
		require_walker(actor)?;
		let availability = self.ctx.geo.set_status(&actor.party_id, status).await?;
		tracing::info!(walker_id = %truncate_id(&actor.party_id), status = ?status, "Walker status changed");
		Ok(availability)
	}

	/// Creates or replaces the caller's matching profile.
	pub async fn update_profile(
		&self,
		actor: &Actor,
		request: WalkerProfileRequest,
	) -> Result<WalkerAvailability, BookingError> {
		require_walker(actor)?;
		request.validate()?;
		Ok(self
			.ctx
			.geo
			.register_walker(
				&actor.party_id,
				WalkerProfile {
					rating: request.rating,
					rating_count: request.rating_count,
					hourly_rate: request.hourly_rate,
				},
			)
			.await?)
	}
}
