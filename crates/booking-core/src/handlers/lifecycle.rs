//! Lifecycle controller.
//!
//! The only component that changes order status. Every user-facing
//! transition runs end to end under the order's lock: read the current
//! snapshot, detect a replay, check the guards, commit through the state
//! machine and invalidate both parties' listings. Payment calls happen after
//! the lock is released.
//!
//! A replay is a request for a status the order already has, by the actor
//! that moved it there. It returns the current snapshot without appending
//! history.

use crate::engine::context::BookingContext;
use crate::error::BookingError;
use crate::matching::MatchOutcome;
use crate::recovery::PaymentReconciler;
use booking_config::ChargePolicy;
use booking_pricing::validate_duration;
use booking_types::{
	truncate_id, Actor, CancelOrderRequest, CreateOrderRequest, GeoPoint, MatchCandidate, Offer,
	Order, OrderEvent, OrderStatus, Review, ReviewRequest, Role, TrackPoint, TrackPointRequest,
	UpdateOrderRequest, WalkerNotesRequest,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;
use validator::Validate;

pub struct LifecycleController {
	ctx: BookingContext,
	payments: Arc<PaymentReconciler>,
}

fn require_role(actor: &Actor, role: Role, action: &str) -> Result<(), BookingError> {
	if actor.role != role {
		return Err(BookingError::Unauthorized(format!(
			"Only {:?} parties can {}",
			role, action
		)));
	}
	Ok(())
}

fn require_assigned_walker(order: &Order, actor: &Actor) -> Result<(), BookingError> {
	if actor.role != Role::Walker || order.walker_id.as_deref() != Some(actor.party_id.as_str()) {
		return Err(BookingError::Unauthorized(format!(
			"Only the assigned walker may modify order {}",
			order.id
		)));
	}
	Ok(())
}

fn require_status(order: &Order, expected: OrderStatus) -> Result<(), BookingError> {
	if order.status != expected {
		return Err(BookingError::Conflict(format!(
			"Order {} is {}, expected {}",
			order.id, order.status, expected
		)));
	}
	Ok(())
}

impl LifecycleController {
	pub fn new(ctx: BookingContext, payments: Arc<PaymentReconciler>) -> Self {
		Self { ctx, payments }
	}

	/// Whether the order already reached `target` through this actor.
	async fn is_replay(
		&self,
		order: &Order,
		actor: &Actor,
		target: OrderStatus,
	) -> Result<bool, BookingError> {
		if order.status != target {
			return Ok(false);
		}
		let history = self.ctx.store.history(&order.id).await?;
		Ok(history
			.last()
			.is_some_and(|entry| entry.to == target && entry.actor == *actor))
	}

	/// Creates a PENDING order and runs its first matching pass.
	///
	/// A matching failure does not fail the creation; the offer monitor
	/// picks stranded PENDING orders up again.
	#[instrument(skip_all, fields(client_id = %truncate_id(&actor.party_id)))]
	pub async fn create(
		&self,
		actor: &Actor,
		request: CreateOrderRequest,
	) -> Result<Order, BookingError> {
		require_role(actor, Role::Client, "create orders")?;
		request.validate()?;
		validate_duration(request.order_type, request.duration_minutes)?;

		let lifecycle = &self.ctx.config.lifecycle;
		let now = Utc::now();
		if request.scheduled_at <= now {
			return Err(BookingError::Validation(
				"Scheduled time must be in the future".into(),
			));
		}
		if request.scheduled_at > now + Duration::days(lifecycle.max_advance_booking_days) {
			return Err(BookingError::Validation(format!(
				"Orders can be booked at most {} days ahead",
				lifecycle.max_advance_booking_days
			)));
		}

		let created_today = self
			.ctx
			.store
			.all_for_party(&actor.party_id)
			.await?
			.iter()
			.filter(|o| o.client_id == actor.party_id && o.created_at.date_naive() == now.date_naive())
			.count();
		if created_today >= lifecycle.max_orders_per_day {
			return Err(BookingError::Validation(format!(
				"Daily limit of {} orders reached",
				lifecycle.max_orders_per_day
			)));
		}

		let order = Order {
			id: uuid::Uuid::new_v4().to_string(),
			client_id: actor.party_id.clone(),
			walker_id: None,
			pet_id: request.pet_id,
			order_type: request.order_type,
			status: OrderStatus::Pending,
			scheduled_at: request.scheduled_at,
			duration_minutes: request.duration_minutes,
			location: GeoPoint::new(request.latitude, request.longitude),
			address: request.address,
			special_instructions: request.special_instructions,
			walker_notes: None,
			preferred_walker_id: request.preferred_walker_id,
			price: None,
			offer: None,
			matching_round: 0,
			track: Vec::new(),
			payment_ref: None,
			payment_pending: false,
			refund_pending: false,
			refunded: false,
			cancelled_by: None,
			cancellation_reason: None,
			client_review: None,
			walker_review: None,
			created_at: now,
			updated_at: now,
			confirmed_at: None,
			started_at: None,
			completed_at: None,
			cancelled_at: None,
		};
		let order = self.ctx.store.create(order, actor).await?;
		self.ctx.invalidate_order(&order).await;
		tracing::info!(
			order_id = %truncate_id(&order.id),
			order_type = %order.order_type,
			"Order created"
		);

		match self.run_matching(&order.id).await {
			Ok(order) => Ok(order),
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"Initial matching failed, order stays PENDING"
				);
				Ok(self.ctx.store.get_by_id(&order.id).await?)
			},
		}
	}

	/// Runs the remaining matching rounds of a PENDING order and commits the
	/// outcome. Orders in any other status are returned unchanged.
	///
	/// The search itself runs outside the lock; a transition that raced the
	/// search fails the final compare-and-swap.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn run_matching(&self, order_id: &str) -> Result<Order, BookingError> {
		let order = self.ctx.store.get_by_id(order_id).await?;
		if order.status != OrderStatus::Pending {
			return Ok(order);
		}

		match self.ctx.matcher.find_match(&order).await? {
			MatchOutcome::Offer {
				candidates,
				round,
				radius_meters,
			} => self.offer(&order, &candidates, round, radius_meters).await,
			MatchOutcome::Exhausted { rounds } => {
				self.exhaust(order_id, OrderStatus::Pending, rounds).await
			},
		}
	}

	async fn offer(
		&self,
		order: &Order,
		candidates: &[MatchCandidate],
		round: u32,
		radius_meters: f64,
	) -> Result<Order, BookingError> {
		let price = match &order.price {
			Some(price) => price.clone(),
			None => {
				let pricing = &self.ctx.pricing;
				let rates: Vec<(f64, Option<Decimal>)> =
					candidates.iter().map(|c| (c.rating, c.hourly_rate)).collect();
				pricing.compute_price(
					order.order_type,
					order.duration_minutes,
					pricing.blended_hourly_rate(&rates)?,
					pricing.demand_multiplier(order.scheduled_at),
				)?
			},
		};

		let now = Utc::now();
		let timeout = Duration::from_std(self.ctx.config.matching.offer_timeout())
			.map_err(|e| BookingError::Validation(e.to_string()))?;
		let offer = Offer {
			walker_ids: candidates.iter().map(|c| c.walker_id.clone()).collect(),
			round,
			radius_meters,
			offered_at: now,
			expires_at: now + timeout,
		};

		let updated = self
			.ctx
			.locks
			.with_lock(&order.id, || async {
				let updated = self
					.ctx
					.state_machine
					.transition(
						&order.id,
						OrderStatus::Pending,
						OrderStatus::Offered,
						&Actor::system(),
						Some(format!("Matching round {}", round + 1)),
						|o| {
							if o.price.is_none() {
								o.price = Some(price.clone());
							}
							o.offer = Some(offer.clone());
							o.matching_round = round + 1;
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok::<_, BookingError>(updated)
			})
			.await?;

		tracing::info!(
			round,
			walkers = offer.walker_ids.len(),
			total = %price.total,
			"Order offered"
		);
		self.ctx.publish_order(OrderEvent::Offered {
			order_id: updated.id.clone(),
			client_id: updated.client_id.clone(),
			walker_ids: offer.walker_ids,
		});
		Ok(updated)
	}

	async fn exhaust(
		&self,
		order_id: &str,
		from: OrderStatus,
		rounds: u32,
	) -> Result<Order, BookingError> {
		let updated = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let updated = self
					.ctx
					.state_machine
					.transition(
						order_id,
						from,
						OrderStatus::NoWalker,
						&Actor::system(),
						Some(format!("No walker found after {} rounds", rounds)),
						|o| {
							o.offer = None;
							o.matching_round = rounds;
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok::<_, BookingError>(updated)
			})
			.await?;

		tracing::info!(rounds, "No walker found");
		self.ctx.publish_order(OrderEvent::NoWalker {
			order_id: updated.id.clone(),
			client_id: updated.client_id.clone(),
		});
		Ok(updated)
	}

	/// Withdraws an expired offer. The order re-enters matching at its next
	/// round, or ends in NO_WALKER once the round budget is spent. Orders
	/// whose offer is still live are returned unchanged.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn expire_offer(&self, order_id: &str) -> Result<Order, BookingError> {
		let max_rounds = self.ctx.matcher.max_rounds();
		let now = Utc::now();

		let withdrawn = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				let expired = current.status == OrderStatus::Offered
					&& current.offer.as_ref().is_some_and(|offer| offer.is_expired(now));
				if !expired || current.matching_round >= max_rounds {
					return Ok::<_, BookingError>((current, false));
				}
				let updated = self
					.ctx
					.state_machine
					.transition(
						order_id,
						OrderStatus::Offered,
						OrderStatus::Pending,
						&Actor::system(),
						Some("Offer expired".into()),
						|o| {
							o.offer = None;
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok((updated, true))
			})
			.await?;

		match withdrawn {
			(_, true) => {
				tracing::info!("Offer expired, re-entering matching");
				self.run_matching(order_id).await
			},
			(current, false)
				if current.status == OrderStatus::Offered
					&& current.offer.as_ref().is_some_and(|offer| offer.is_expired(now)) =>
			{
				self.exhaust(order_id, OrderStatus::Offered, max_rounds).await
			},
			(current, false) => Ok(current),
		}
	}

	/// A walker accepts an offer made to them.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), walker_id = %truncate_id(&actor.party_id)))]
	pub async fn accept(&self, order_id: &str, actor: &Actor) -> Result<Order, BookingError> {
		require_role(actor, Role::Walker, "accept offers")?;
		let max_active = self.ctx.config.matching.max_active_orders;

		let (order, applied) = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				if self.is_replay(&current, actor, OrderStatus::Confirmed).await? {
					return Ok::<_, BookingError>((current, false));
				}
				require_status(&current, OrderStatus::Offered)?;
				let offer = current.offer.as_ref().ok_or_else(|| {
					BookingError::Conflict(format!("Order {} has no open offer", order_id))
				})?;
				if !offer.includes(&actor.party_id) {
					return Err(BookingError::Unauthorized(
						"This order was not offered to you".into(),
					));
				}
				let now = Utc::now();
				if offer.is_expired(now) {
					return Err(BookingError::Conflict("The offer has expired".into()));
				}

				match self.ctx.geo.get(&actor.party_id).await {
					Ok(Some(availability)) if !self.ctx.geo.is_matchable(&availability, now) => {
						return Err(BookingError::Conflict(format!(
							"Walker is {:?} or has not reported recently",
							availability.status
						)));
					},
					Ok(Some(availability)) if availability.load >= max_active => {
						return Err(BookingError::Validation(format!(
							"Walker already has {} active orders",
							availability.load
						)));
					},
					Ok(Some(_)) => {},
					Ok(None) => {
						return Err(BookingError::Conflict(
							"Walker has no availability on record".into(),
						));
					},
					Err(e) => {
						tracing::warn!(error = %e, "Geo index unavailable, skipping availability check");
					},
				}

				let walker_id = actor.party_id.clone();
				let updated = self
					.ctx
					.state_machine
					.transition(
						order_id,
						OrderStatus::Offered,
						OrderStatus::Confirmed,
						actor,
						None,
						|o| {
							o.walker_id = Some(walker_id.clone());
							o.confirmed_at = Some(o.updated_at);
							o.offer = None;
							o.payment_pending = self.ctx.config.lifecycle.charge_policy
								== ChargePolicy::OnConfirmation
								&& o.payment_ref.is_none();
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok((updated, true))
			})
			.await?;

		if !applied {
			return Ok(order);
		}

		tracing::info!("Order confirmed");
		self.adjust_load(&actor.party_id, 1).await;
		self.ctx.publish_order(OrderEvent::Confirmed {
			order_id: order.id.clone(),
			client_id: order.client_id.clone(),
			walker_id: actor.party_id.clone(),
		});
		Ok(self.settle_charge(order).await)
	}

	/// The assigned walker starts the service, no earlier than the grace
	/// window before the scheduled time.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn start(&self, order_id: &str, actor: &Actor) -> Result<Order, BookingError> {
		require_role(actor, Role::Walker, "start orders")?;
		let grace = Duration::minutes(self.ctx.config.lifecycle.start_grace_minutes);

		let (order, applied) = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				if self.is_replay(&current, actor, OrderStatus::InProgress).await? {
					return Ok::<_, BookingError>((current, false));
				}
				require_status(&current, OrderStatus::Confirmed)?;
				require_assigned_walker(&current, actor)?;
				let earliest = current.scheduled_at - grace;
				if Utc::now() < earliest {
					return Err(BookingError::Validation(format!(
						"Order can be started from {}",
						earliest.to_rfc3339()
					)));
				}

				let updated = self
					.ctx
					.state_machine
					.transition(
						order_id,
						OrderStatus::Confirmed,
						OrderStatus::InProgress,
						actor,
						None,
						|o| {
							o.started_at = Some(o.updated_at);
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok((updated, true))
			})
			.await?;

		if applied {
			tracing::info!("Order started");
			self.ctx.publish_order(OrderEvent::Started {
				order_id: order.id.clone(),
				client_id: order.client_id.clone(),
				walker_id: actor.party_id.clone(),
			});
		}
		Ok(order)
	}

	/// The assigned walker completes the service. The charge follows the
	/// commit; a failed charge leaves the order COMPLETED and flagged.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn complete(&self, order_id: &str, actor: &Actor) -> Result<Order, BookingError> {
		require_role(actor, Role::Walker, "complete orders")?;
		let charge_on_completion =
			self.ctx.config.lifecycle.charge_policy == ChargePolicy::OnCompletion;

		let (order, applied) = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				if self.is_replay(&current, actor, OrderStatus::Completed).await? {
					return Ok::<_, BookingError>((current, false));
				}
				require_status(&current, OrderStatus::InProgress)?;
				require_assigned_walker(&current, actor)?;

				let updated = self
					.ctx
					.state_machine
					.transition(
						order_id,
						OrderStatus::InProgress,
						OrderStatus::Completed,
						actor,
						None,
						|o| {
							o.completed_at = Some(o.updated_at);
							if charge_on_completion && o.payment_ref.is_none() && o.price.is_some() {
								o.payment_pending = true;
							}
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok((updated, true))
			})
			.await?;

		if !applied {
			return Ok(order);
		}

		tracing::info!("Order completed");
		self.adjust_load(&actor.party_id, -1).await;
		self.ctx.publish_order(OrderEvent::Completed {
			order_id: order.id.clone(),
			client_id: order.client_id.clone(),
			walker_id: actor.party_id.clone(),
		});
		Ok(self.settle_charge(order).await)
	}

	/// Cancels a PENDING, OFFERED or CONFIRMED order.
	///
	/// Before a walker is assigned only the client may cancel. Once
	/// CONFIRMED, the client and the assigned walker may cancel until their
	/// respective cut-off before the scheduled time. The system actor, which
	/// only the engine itself holds, may cancel any cancellable order. A
	/// captured payment is refunded after the commit.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), actor_id = %truncate_id(&actor.party_id)))]
	pub async fn cancel(
		&self,
		order_id: &str,
		actor: &Actor,
		request: CancelOrderRequest,
	) -> Result<Order, BookingError> {
		request.validate()?;
		let lifecycle = &self.ctx.config.lifecycle;

		let outcome = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				if self.is_replay(&current, actor, OrderStatus::Cancelled).await? {
					return Ok::<_, BookingError>((current, None));
				}

				let is_client = actor.role == Role::Client && current.client_id == actor.party_id;
				let is_walker = actor.role == Role::Walker
					&& current.walker_id.as_deref() == Some(actor.party_id.as_str());
				let is_system = actor.role == Role::System;

				match current.status {
					OrderStatus::Pending | OrderStatus::Offered => {
						if !(is_client || is_system) {
							return Err(BookingError::Unauthorized(
								"Only the client can cancel an unassigned order".into(),
							));
						}
					},
					OrderStatus::Confirmed => {
						let until_start = current.scheduled_at - Utc::now();
						if is_client {
							if until_start <= Duration::minutes(lifecycle.client_cancel_cutoff_minutes) {
								return Err(BookingError::Validation(format!(
									"Clients can cancel only more than {} minutes before the start",
									lifecycle.client_cancel_cutoff_minutes
								)));
							}
						} else if is_walker {
							if until_start <= Duration::minutes(lifecycle.walker_cancel_cutoff_minutes) {
								return Err(BookingError::Validation(format!(
									"Walkers can cancel only more than {} minutes before the start",
									lifecycle.walker_cancel_cutoff_minutes
								)));
							}
						} else if !is_system {
							return Err(BookingError::Unauthorized(
								"Only the client or the assigned walker can cancel this order".into(),
							));
						}
					},
					status => {
						return Err(BookingError::Conflict(format!(
							"Order {} is {} and can no longer be cancelled",
							order_id, status
						)));
					},
				}

				let cancelled_by = actor.party_id.clone();
				let reason = request.reason.clone();
				let updated = self
					.ctx
					.state_machine
					.transition(
						order_id,
						current.status,
						OrderStatus::Cancelled,
						actor,
						reason.clone(),
						|o| {
							o.walker_id = None;
							o.offer = None;
							o.cancelled_at = Some(o.updated_at);
							o.cancelled_by = Some(cancelled_by.clone());
							o.cancellation_reason = reason.clone();
							o.payment_pending = false;
							o.refund_pending = o.payment_ref.is_some() && !o.refunded;
							Ok(())
						},
					)
					.await?;
				self.ctx.invalidate_order(&current).await;
				Ok((updated, Some(current)))
			})
			.await?;

		let (order, previous) = match outcome {
			(order, Some(previous)) => (order, previous),
			(order, None) => return Ok(order),
		};

		tracing::info!(from = %previous.status, "Order cancelled");
		if previous.status == OrderStatus::Confirmed {
			if let Some(walker_id) = previous.walker_id.as_deref() {
				self.adjust_load(walker_id, -1).await;
			}
		}
		self.ctx.publish_order(OrderEvent::Cancelled {
			order_id: order.id.clone(),
			client_id: order.client_id.clone(),
			walker_id: previous.walker_id.clone(),
			cancelled_by: actor.party_id.clone(),
			reason: order.cancellation_reason.clone(),
		});

		if order.refund_pending {
			return Ok(match self.payments.refund(&order).await {
				Ok(refunded) => refunded,
				Err(_) => order,
			});
		}
		Ok(order)
	}

	/// The client edits address or instructions before the service starts.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn update_details(
		&self,
		order_id: &str,
		actor: &Actor,
		request: UpdateOrderRequest,
	) -> Result<Order, BookingError> {
		request.validate()?;
		if request.address.is_none() && request.special_instructions.is_none() {
			return Err(BookingError::Validation("Nothing to update".into()));
		}

		self.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				if actor.role != Role::Client || current.client_id != actor.party_id {
					return Err(BookingError::Unauthorized(
						"Only the client can edit order details".into(),
					));
				}
				if !matches!(
					current.status,
					OrderStatus::Pending | OrderStatus::Offered | OrderStatus::Confirmed
				) {
					return Err(BookingError::Conflict(format!(
						"Order {} is {} and can no longer be edited",
						order_id, current.status
					)));
				}

				let updated = self
					.ctx
					.store
					.update_fields(order_id, |o| {
						if let Some(address) = &request.address {
							o.address = Some(address.clone());
						}
						if let Some(instructions) = &request.special_instructions {
							o.special_instructions = Some(instructions.clone());
						}
						Ok(())
					})
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok::<_, BookingError>(updated)
			})
			.await
	}

	/// The assigned walker records notes about the service.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn add_walker_notes(
		&self,
		order_id: &str,
		actor: &Actor,
		request: WalkerNotesRequest,
	) -> Result<Order, BookingError> {
		request.validate()?;

		self.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				require_assigned_walker(&current, actor)?;
				if !matches!(
					current.status,
					OrderStatus::Confirmed | OrderStatus::InProgress | OrderStatus::Completed
				) {
					return Err(BookingError::Conflict(format!(
						"Order {} is {} and takes no walker notes",
						order_id, current.status
					)));
				}

				let updated = self
					.ctx
					.store
					.update_fields(order_id, |o| {
						o.walker_notes = Some(request.notes.clone());
						Ok(())
					})
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok::<_, BookingError>(updated)
			})
			.await
	}

	/// Leaves a review of the other party. Each side reviews a COMPLETED
	/// order at most once; client reviews feed the walker's rating.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn review(
		&self,
		order_id: &str,
		actor: &Actor,
		request: ReviewRequest,
	) -> Result<Order, BookingError> {
		request.validate()?;

		let order = self
			.ctx
			.locks
			.with_lock(order_id, || async {
				let current = self.ctx.store.get_by_id(order_id).await?;
				let by_client = actor.role == Role::Client && current.client_id == actor.party_id;
				let by_walker = actor.role == Role::Walker
					&& current.walker_id.as_deref() == Some(actor.party_id.as_str());
				if !by_client && !by_walker {
					return Err(BookingError::Unauthorized(
						"Only the parties of an order can review it".into(),
					));
				}
				require_status(&current, OrderStatus::Completed)?;
				let existing = if by_client {
					&current.client_review
				} else {
					&current.walker_review
				};
				if existing.is_some() {
					return Err(BookingError::Conflict("Order already reviewed".into()));
				}

				let review = Review {
					rating: request.rating,
					comment: request.comment.clone(),
					created_at: Utc::now(),
				};
				let updated = self
					.ctx
					.store
					.update_fields(order_id, |o| {
						if by_client {
							o.client_review = Some(review.clone());
						} else {
							o.walker_review = Some(review.clone());
						}
						Ok(())
					})
					.await?;
				self.ctx.invalidate_order(&updated).await;
				Ok::<_, BookingError>(updated)
			})
			.await?;

		if actor.role == Role::Client {
			if let Some(walker_id) = order.walker_id.as_deref() {
				if let Err(e) = self.ctx.geo.record_rating(walker_id, request.rating).await {
					tracing::warn!(walker_id = %truncate_id(walker_id), error = %e, "Failed to record walker rating");
				}
			}
		}
		Ok(order)
	}

	/// Appends a live-track point reported by the assigned walker.
	pub async fn append_track_point(
		&self,
		order_id: &str,
		actor: &Actor,
		request: TrackPointRequest,
	) -> Result<Order, BookingError> {
		request.validate()?;
		let current = self.ctx.store.get_by_id(order_id).await?;
		require_assigned_walker(&current, actor)?;

		let point = TrackPoint {
			latitude: request.latitude,
			longitude: request.longitude,
			recorded_at: request.recorded_at.unwrap_or_else(Utc::now),
			accuracy_meters: request.accuracy_meters,
			speed_mps: request.speed_mps,
			heading_degrees: request.heading_degrees,
		};
		let updated = self.ctx.store.append_track_point(order_id, point).await?;
		self.ctx.invalidate_order(&updated).await;
		Ok(updated)
	}

	async fn adjust_load(&self, walker_id: &str, delta: i32) {
		if let Err(e) = self.ctx.geo.adjust_load(walker_id, delta).await {
			tracing::warn!(walker_id = %truncate_id(walker_id), delta, error = %e, "Failed to adjust walker load");
		}
	}

	/// Runs a charge the last transition flagged, keeping the flagged
	/// snapshot when it fails.
	async fn settle_charge(&self, order: Order) -> Order {
		if !order.payment_pending {
			return order;
		}
		match self.payments.charge(&order).await {
			Ok(charged) => charged,
			Err(_) => order,
		}
	}
}
