//! Access tokens held by the session cache and the expiry policy deciding their reuse.

// self
use crate::{_prelude::*, auth::Secret};

/// Safety margin applied before a token's nominal expiry to absorb clock skew and latency.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(5);

/// Admin access token obtained through the client-credentials flow.
///
/// Tokens are never persisted; they live only inside a session cache entry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
	/// Bearer value; callers must avoid logging it.
	pub value: Secret,
	/// Instant the token response was received.
	pub issued_at: OffsetDateTime,
	/// Lifetime reported by the provider. Zero means the token must not be reused.
	pub expires_in: u64,
}
impl AccessToken {
	/// Creates a token issued at `issued_at` and valid for `expires_in` seconds.
	pub fn new(value: impl Into<String>, issued_at: OffsetDateTime, expires_in: u64) -> Self {
		Self { value: Secret::new(value), issued_at, expires_in }
	}

	/// Nominal expiry instant, or `None` when the lifetime exceeds the representable range.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		let secs = i64::try_from(self.expires_in).ok()?;

		self.issued_at.checked_add(Duration::seconds(secs))
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("value", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_in", &self.expires_in)
			.finish()
	}
}

/// Decides whether a cached token may still be handed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryPolicy {
	safety_margin: Duration,
}
impl ExpiryPolicy {
	/// Creates a policy with the provided safety margin; negative margins clamp to zero.
	pub fn new(safety_margin: Duration) -> Self {
		let safety_margin = if safety_margin.is_negative() { Duration::ZERO } else { safety_margin };

		Self { safety_margin }
	}

	/// Margin subtracted from the nominal expiry.
	pub fn safety_margin(&self) -> Duration {
		self.safety_margin
	}

	/// Returns `true` iff `now + margin < issued_at + expires_in`.
	///
	/// A zero lifetime is never usable, which forces a fresh login for providers that omit
	/// lifetime metadata. A margin too large to add to `now` makes every token unusable.
	pub fn is_usable(&self, token: &AccessToken, now: OffsetDateTime) -> bool {
		if token.expires_in == 0 {
			return false;
		}

		match token.expires_at() {
			Some(expires_at) =>
				now.checked_add(self.safety_margin).is_some_and(|deadline| deadline < expires_at),
			None => true,
		}
	}
}
impl Default for ExpiryPolicy {
	fn default() -> Self {
		Self::new(DEFAULT_SAFETY_MARGIN)
	}
}
