//! Pricing calculator for the booking engine.
//!
//! Everything here is pure: no I/O, no clock. Amounts are computed exactly
//! in decimal arithmetic and rounded to currency precision once, at the end.
//! Commission is a fixed share of the total and walker earnings are derived
//! by exact subtraction of the rounded amounts, so
//! `walker_earnings + commission == total` always holds.

use booking_types::{OrderType, PriceBreakdown};
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Decimal places of currency amounts.
pub const CURRENCY_DP: u32 = 2;

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
	#[error("Duration {minutes} min is outside {min}-{max} min for {order_type}")]
	InvalidDuration {
		order_type: OrderType,
		minutes: u32,
		min: u32,
		max: u32,
	},
	#[error("Invalid rate: {0}")]
	InvalidRate(String),
	#[error("Amount overflow")]
	Overflow,
}

/// Per-type pricing and duration rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTypeRules {
	pub rate_multiplier: Decimal,
	pub min_duration_minutes: u32,
	pub max_duration_minutes: u32,
}

/// Dispatch table of [`OrderTypeRules`].
pub fn rules_for(order_type: OrderType) -> OrderTypeRules {
	let (multiplier_pct, min, max) = match order_type {
		OrderType::SingleWalk => (100, 30, 180),
		OrderType::RegularWalk => (90, 30, 180),
		OrderType::PetSitting => (80, 60, 720),
		OrderType::PetBoarding => (60, 720, 10_080),
	};
	OrderTypeRules {
		rate_multiplier: Decimal::new(multiplier_pct, 2),
		min_duration_minutes: min,
		max_duration_minutes: max,
	}
}

/// Checks a requested duration against the order type's bounds.
pub fn validate_duration(order_type: OrderType, minutes: u32) -> Result<(), PricingError> {
	let rules = rules_for(order_type);
	if !(rules.min_duration_minutes..=rules.max_duration_minutes).contains(&minutes) {
		return Err(PricingError::InvalidDuration {
			order_type,
			minutes,
			min: rules.min_duration_minutes,
			max: rules.max_duration_minutes,
		});
	}
	Ok(())
}

fn round_currency(amount: Decimal) -> Decimal {
	amount.round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Fixed platform parameters of the calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingCalculator {
	commission_rate: Decimal,
	currency: String,
	base_hourly_rate: Decimal,
	min_hourly_rate: Decimal,
	max_hourly_rate: Decimal,
	surge_enabled: bool,
	/// Offset of the deployment's local time, used for demand windows.
	local_offset: FixedOffset,
}

impl PricingCalculator {
	pub fn new(
		commission_rate: Decimal,
		currency: impl Into<String>,
		base_hourly_rate: Decimal,
		min_hourly_rate: Decimal,
		max_hourly_rate: Decimal,
	) -> Result<Self, PricingError> {
		if commission_rate < Decimal::ZERO || commission_rate >= Decimal::ONE {
			return Err(PricingError::InvalidRate(format!(
				"commission rate {} outside [0, 1)",
				commission_rate
			)));
		}
		if min_hourly_rate <= Decimal::ZERO || min_hourly_rate > max_hourly_rate {
			return Err(PricingError::InvalidRate(format!(
				"hourly rate bounds {}-{}",
				min_hourly_rate, max_hourly_rate
			)));
		}
		Ok(Self {
			commission_rate,
			currency: currency.into(),
			base_hourly_rate,
			min_hourly_rate,
			max_hourly_rate,
			surge_enabled: true,
			local_offset: Utc.fix(),
		})
	}

	pub fn with_surge(mut self, enabled: bool) -> Self {
		self.surge_enabled = enabled;
		self
	}

	/// Sets the local time offset in minutes east of UTC.
	pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Result<Self, PricingError> {
		self.local_offset = FixedOffset::east_opt(minutes * 60)
			.ok_or_else(|| PricingError::InvalidRate(format!("UTC offset {} min", minutes)))?;
		Ok(self)
	}

	pub fn currency(&self) -> &str {
		&self.currency
	}

	/// Computes the price breakdown of an order.
	///
	/// `base = hourly_rate × hours × type multiplier`,
	/// `total = base × demand_multiplier`, `commission = total × rate`.
	pub fn compute_price(
		&self,
		order_type: OrderType,
		duration_minutes: u32,
		hourly_rate: Decimal,
		demand_multiplier: Decimal,
	) -> Result<PriceBreakdown, PricingError> {
		if hourly_rate <= Decimal::ZERO {
			return Err(PricingError::InvalidRate(format!("hourly rate {}", hourly_rate)));
		}
		if demand_multiplier <= Decimal::ZERO {
			return Err(PricingError::InvalidRate(format!(
				"demand multiplier {}",
				demand_multiplier
			)));
		}
		validate_duration(order_type, duration_minutes)?;

		let rules = rules_for(order_type);
		let minutes = Decimal::from(duration_minutes);
		let base_exact = hourly_rate
			.checked_mul(minutes)
			.and_then(|v| v.checked_div(Decimal::from(60)))
			.and_then(|v| v.checked_mul(rules.rate_multiplier))
			.ok_or(PricingError::Overflow)?;
		let total_exact = base_exact
			.checked_mul(demand_multiplier)
			.ok_or(PricingError::Overflow)?;
		let commission_exact = total_exact
			.checked_mul(self.commission_rate)
			.ok_or(PricingError::Overflow)?;

		let total = round_currency(total_exact);
		let commission = round_currency(commission_exact);
		Ok(PriceBreakdown {
			order_type,
			duration_minutes,
			hourly_rate,
			rate_multiplier: rules.rate_multiplier,
			demand_multiplier,
			base_amount: round_currency(base_exact),
			commission,
			walker_earnings: total - commission,
			total,
			currency: self.currency.clone(),
		})
	}

	/// Demand factor for a start time: time-of-day × day-of-week, both
	/// evaluated in the deployment's local time. `1` when surge is disabled.
	pub fn demand_multiplier(&self, scheduled_at: DateTime<Utc>) -> Decimal {
		if !self.surge_enabled {
			return Decimal::ONE;
		}
		let local = scheduled_at.with_timezone(&self.local_offset);
		let hour_pct = match local.hour() {
			6..=9 => 120,
			10..=16 => 100,
			17..=21 => 130,
			_ => 150,
		};
		let day_pct = match local.weekday() {
			Weekday::Mon => 110,
			Weekday::Fri => 120,
			Weekday::Sat => 140,
			Weekday::Sun => 130,
			_ => 100,
		};
		Decimal::new(hour_pct, 2) * Decimal::new(day_pct, 2)
	}

	/// Hourly rate for an offer round.
	///
	/// Rating-weighted mean of the candidates' published rates, using the
	/// platform base rate for walkers without one, clamped to the configured
	/// bounds. Falls back to the unweighted mean when every rating is zero
	/// and to the base rate when there are no candidates.
	pub fn blended_hourly_rate(
		&self,
		candidates: &[(f64, Option<Decimal>)],
	) -> Result<Decimal, PricingError> {
		let mut weighted = Decimal::ZERO;
		let mut weights = Decimal::ZERO;
		let mut plain = Decimal::ZERO;
		for (rating, rate) in candidates {
			let rate = rate.unwrap_or(self.base_hourly_rate);
			let weight = Decimal::try_from(*rating)
				.map(|w| w.round_dp(2).max(Decimal::ZERO))
				.unwrap_or(Decimal::ZERO);
			weighted = rate
				.checked_mul(weight)
				.and_then(|v| weighted.checked_add(v))
				.ok_or(PricingError::Overflow)?;
			weights = weights.checked_add(weight).ok_or(PricingError::Overflow)?;
			plain = plain.checked_add(rate).ok_or(PricingError::Overflow)?;
		}

		let rate = if !weights.is_zero() {
			weighted.checked_div(weights)
		} else if !candidates.is_empty() {
			plain.checked_div(Decimal::from(candidates.len()))
		} else {
			Some(self.base_hourly_rate)
		}
		.ok_or(PricingError::Overflow)?;
		Ok(round_currency(rate.clamp(self.min_hourly_rate, self.max_hourly_rate)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn calculator() -> PricingCalculator {
		PricingCalculator::new(
			Decimal::new(20, 2),
			"RUB",
			Decimal::from(500),
			Decimal::from(200),
			Decimal::from(800),
		)
		.unwrap()
	}

	#[test]
	fn test_single_walk_half_hour() {
		let price = calculator()
			.compute_price(OrderType::SingleWalk, 30, Decimal::from(800), Decimal::ONE)
			.unwrap();
		assert_eq!(price.base_amount, Decimal::from(400));
		assert_eq!(price.total, Decimal::from(400));
		assert_eq!(price.commission, Decimal::from(80));
		assert_eq!(price.walker_earnings, Decimal::from(320));
		assert_eq!(price.currency, "RUB");
	}

	#[test]
	fn test_type_multiplier_and_demand() {
		let price = calculator()
			.compute_price(
				OrderType::PetSitting,
				90,
				Decimal::from(500),
				Decimal::new(13, 1),
			)
			.unwrap();
		// 500 × 1.5 h × 0.8 = 600, × 1.3 = 780
		assert_eq!(price.base_amount, Decimal::from(600));
		assert_eq!(price.total, Decimal::from(780));
		assert_eq!(price.commission, Decimal::from(156));
	}

	#[test]
	fn test_rounding_happens_once() {
		// 333.33 × 0.75 h = 249.9975 exactly; 249.9975 × 1.1 = 274.99725.
		let price = calculator()
			.compute_price(
				OrderType::SingleWalk,
				45,
				Decimal::new(33333, 2),
				Decimal::new(11, 1),
			)
			.unwrap();
		assert_eq!(price.total, Decimal::new(27500, 2));
		// 274.99725 × 0.2 = 54.99945
		assert_eq!(price.commission, Decimal::new(5500, 2));
		assert_eq!(price.walker_earnings + price.commission, price.total);
	}

	#[test]
	fn test_sum_invariant_and_determinism() {
		let calc = calculator();
		for rate in [201, 333, 457, 599, 777] {
			for minutes in [30, 47, 95, 180] {
				for demand in [100, 110, 132, 182, 210] {
					let args = (
						OrderType::RegularWalk,
						minutes,
						Decimal::new(rate * 100 + 37, 2),
						Decimal::new(demand, 2),
					);
					let a = calc.compute_price(args.0, args.1, args.2, args.3).unwrap();
					let b = calc.compute_price(args.0, args.1, args.2, args.3).unwrap();
					assert_eq!(a, b);
					assert_eq!(a.walker_earnings + a.commission, a.total);
					assert!(a.total.scale() <= CURRENCY_DP);
				}
			}
		}
	}

	#[test]
	fn test_duration_bounds() {
		assert!(validate_duration(OrderType::SingleWalk, 29).is_err());
		assert!(validate_duration(OrderType::SingleWalk, 180).is_ok());
		assert!(validate_duration(OrderType::PetBoarding, 600).is_err());
		assert!(matches!(
			calculator().compute_price(OrderType::SingleWalk, 10, Decimal::from(500), Decimal::ONE),
			Err(PricingError::InvalidDuration { min: 30, .. })
		));
	}

	#[test]
	fn test_demand_multiplier_windows() {
		let calc = calculator();
		// Wednesday 2024-05-15
		let at = |hour| Utc.with_ymd_and_hms(2024, 5, 15, hour, 0, 0).unwrap();
		assert_eq!(calc.demand_multiplier(at(8)), Decimal::new(12, 1));
		assert_eq!(calc.demand_multiplier(at(12)), Decimal::ONE);
		assert_eq!(calc.demand_multiplier(at(18)), Decimal::new(13, 1));
		assert_eq!(calc.demand_multiplier(at(23)), Decimal::new(15, 1));

		// Saturday evening
		let saturday = Utc.with_ymd_and_hms(2024, 5, 18, 18, 0, 0).unwrap();
		assert_eq!(calc.demand_multiplier(saturday), Decimal::new(182, 2));

		assert_eq!(calc.clone().with_surge(false).demand_multiplier(saturday), Decimal::ONE);
	}

	#[test]
	fn test_demand_uses_local_offset() {
		let calc = calculator().with_utc_offset_minutes(180).unwrap();
		// 05:00 UTC on a Wednesday is 08:00 at UTC+3
		let at = Utc.with_ymd_and_hms(2024, 5, 15, 5, 0, 0).unwrap();
		assert_eq!(calc.demand_multiplier(at), Decimal::new(12, 1));
	}

	#[test]
	fn test_blended_rate() {
		let calc = calculator();
		assert_eq!(calc.blended_hourly_rate(&[]).unwrap(), Decimal::from(500));

		let rate = calc
			.blended_hourly_rate(&[
				(5.0, Some(Decimal::from(600))),
				(3.0, Some(Decimal::from(400))),
			])
			.unwrap();
		// (5 × 600 + 3 × 400) / 8 = 525
		assert_eq!(rate, Decimal::from(525));

		let clamped = calc
			.blended_hourly_rate(&[(4.0, Some(Decimal::from(2000)))])
			.unwrap();
		assert_eq!(clamped, Decimal::from(800));

		let unrated = calc
			.blended_hourly_rate(&[(0.0, None), (0.0, Some(Decimal::from(300)))])
			.unwrap();
		assert_eq!(unrated, Decimal::from(400));
	}

	#[test]
	fn test_blended_rate_overflow_is_an_error() {
		let calc = calculator();
		assert_eq!(
			calc.blended_hourly_rate(&[(5.0, Some(Decimal::MAX))]),
			Err(PricingError::Overflow)
		);
		assert_eq!(
			calc.blended_hourly_rate(&[(0.0, Some(Decimal::MAX)), (0.0, Some(Decimal::MAX))]),
			Err(PricingError::Overflow)
		);
	}
}
