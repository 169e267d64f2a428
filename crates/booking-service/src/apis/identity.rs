//! Caller identity from trusted gateway headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use booking_types::{APIError, Actor, ErrorKind, Role};

pub const PARTY_ID_HEADER: &str = "x-party-id";
pub const PARTY_ROLE_HEADER: &str = "x-party-role";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Party(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, APIError> {
	let value = parts.headers.get(name).ok_or_else(|| {
		APIError::from_kind(ErrorKind::Unauthorized, format!("Missing {} header", name))
	})?;
	let value = value.to_str().map_err(|_| {
		APIError::from_kind(ErrorKind::Validation, format!("Header {} is not valid text", name))
	})?;
	let value = value.trim();
	if value.is_empty() {
		return Err(APIError::from_kind(
			ErrorKind::Unauthorized,
			format!("Empty {} header", name),
		));
	}
	Ok(value)
}

impl<S> FromRequestParts<S> for Party
where
	S: Send + Sync,
{
	type Rejection = APIError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let party_id = header(parts, PARTY_ID_HEADER)?;
		let role: Role = header(parts, PARTY_ROLE_HEADER)?
			.parse()
			.map_err(|e: String| APIError::from_kind(ErrorKind::Validation, e))?;
		// The system identity belongs to the engine's own background tasks
		if role == Role::System {
			return Err(APIError::from_kind(
				ErrorKind::Unauthorized,
				"The system role cannot be claimed by API callers",
			));
		}
		Ok(Party(Actor::new(party_id, role)))
	}
}
