//! Broker tunables, deserializable from host configuration with every field defaulted.

// self
use crate::{_prelude::*, auth::ExpiryPolicy};

/// Response shape of the legacy `client-secret/{clientId}` read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyResponse {
	/// `client_secret`, `client_id`, and `issuer_url`.
	#[default]
	Full,
	/// `client_secret` only.
	SecretOnly,
}

/// Failure to load [`BrokerSettings`].
#[derive(Debug, ThisError)]
pub enum SettingsError {
	/// The JSON document does not match the settings schema.
	#[error("Settings field `{}` is invalid.", .0.path())]
	Parse(#[from] serde_path_to_error::Error<serde_json::Error>),
	/// A zero or negative timeout would fail every identity provider call immediately.
	#[error("request_timeout must be at least one second, got {value}.")]
	NonPositiveTimeout {
		/// Rejected value in seconds.
		value: i64,
	},
}

/// Runtime settings shared by the session cache, the adapter, and the broker facade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
	/// Seconds subtracted from a token's nominal expiry; negative values clamp to zero.
	pub safety_margin: i64,
	/// Seconds allowed for each identity provider call made by a detached refresh or by the
	/// HTTP adapter; must be positive. Values below one second constructed in code are raised
	/// to one second.
	pub request_timeout: i64,
	/// Shape of the legacy secret response.
	pub legacy_response: LegacyResponse,
}
impl BrokerSettings {
	const DEFAULT_REQUEST_TIMEOUT: i64 = 30;
	const DEFAULT_SAFETY_MARGIN: i64 = 5;

	/// Parses settings from JSON, reporting the path of the offending field on failure.
	pub fn from_json(raw: &str) -> Result<Self, SettingsError> {
		let mut deserializer = serde_json::Deserializer::from_str(raw);
		let settings: Self = serde_path_to_error::deserialize(&mut deserializer)?;

		if settings.request_timeout <= 0 {
			return Err(SettingsError::NonPositiveTimeout { value: settings.request_timeout });
		}

		Ok(settings)
	}

	/// Expiry policy built from [`safety_margin`](Self::safety_margin).
	pub fn expiry_policy(&self) -> ExpiryPolicy {
		ExpiryPolicy::new(Duration::seconds(self.safety_margin))
	}

	/// Per-call timeout built from [`request_timeout`](Self::request_timeout).
	pub fn call_timeout(&self) -> Duration {
		Duration::seconds(self.request_timeout.max(1))
	}
}
impl Default for BrokerSettings {
	fn default() -> Self {
		Self {
			safety_margin: Self::DEFAULT_SAFETY_MARGIN,
			request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
			legacy_response: LegacyResponse::default(),
		}
	}
}
