//! Broker-level error types shared across the resolver, session cache, and stores.
//!
//! Every user-facing variant renders a fixed sentence. Provider and transport detail is kept
//! in the [`source`](std::error::Error::source) chain so hosts can log it without echoing it
//! back to callers.

// self
use crate::{_prelude::*, obs::Operation};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// No connection configuration exists for the scope or the default scope.
	#[error("No connection configuration is available for scope `{scope}`.")]
	ConfigurationMissing {
		/// Scope that was requested.
		scope: String,
	},
	/// The broker could not log in to the identity provider.
	#[error("Failed to authenticate against the identity provider.")]
	AuthenticationFailed {
		/// Underlying provider failure.
		#[source]
		source: ProviderError,
	},
	/// The identity provider holds no client with the requested id.
	#[error("Client `{client_id}` was not found.")]
	ClientNotFound {
		/// Requested client id.
		client_id: String,
	},
	/// The identity provider returned more than one client for the requested id.
	#[error("Found {count} clients for `{client_id}`.")]
	AmbiguousClient {
		/// Requested client id.
		client_id: String,
		/// Number of matching client records.
		count: usize,
	},
	/// The client exists but no secret value is available for it.
	#[error("No secret is available for client `{client_id}`.")]
	SecretUnavailable {
		/// Requested client id.
		client_id: String,
	},
	/// The realm discovery document could not be fetched or parsed.
	#[error("Failed to resolve the issuer for realm `{realm}`.")]
	IssuerResolutionFailed {
		/// Realm whose discovery document was requested.
		realm: String,
		/// Underlying provider failure.
		#[source]
		source: ProviderError,
	},
	/// The connectivity probe rejected a configuration write.
	#[error("Failed to access the identity provider with the supplied configuration.")]
	ConnectivityCheckFailed {
		/// Underlying provider failure.
		#[source]
		source: ProviderError,
	},
	/// An authenticated admin API call failed.
	#[error("Identity provider request failed during {operation}.")]
	IdentityProvider {
		/// Admin operation that failed.
		operation: Operation,
		/// Underlying provider failure.
		#[source]
		source: ProviderError,
	},
	/// Caller input was rejected before any side effect.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// The caller cancelled the request.
	#[error("Request was cancelled.")]
	Cancelled,
	/// The caller's deadline elapsed.
	#[error("Request timed out.")]
	TimedOut,
	/// The detached session refresh task terminated without a result.
	#[error("Session refresh task terminated unexpectedly.")]
	SessionTask,
}
impl Error {
	/// Returns `true` for failures caused by the caller's input or configuration rather than
	/// by the broker or its collaborators.
	pub fn is_user_error(&self) -> bool {
		matches!(
			self,
			Self::ConfigurationMissing { .. }
				| Self::ClientNotFound { .. }
				| Self::AmbiguousClient { .. }
				| Self::SecretUnavailable { .. }
				| Self::ConnectivityCheckFailed { .. }
				| Self::Validation(_)
		)
	}
}

/// Input validation failures raised before any write is performed.
#[derive(Debug, ThisError)]
pub enum ValidationError {
	/// A required field was absent or empty.
	#[error("Missing {field}.")]
	MissingField {
		/// Field name as it appears in the request payload.
		field: &'static str,
	},
	/// A field failed identifier validation.
	#[error("Invalid {field}.")]
	InvalidField {
		/// Field name as it appears in the request payload.
		field: &'static str,
		/// Identifier validation failure.
		#[source]
		source: crate::auth::IdentifierError,
	},
	/// The server URL cannot be parsed.
	#[error("Invalid server_url.")]
	InvalidServerUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A realm-scoped write named a different realm in its payload.
	#[error("Realm `{payload}` does not match the configured scope `{scope}`.")]
	RealmMismatch {
		/// Realm taken from the scope identifier.
		scope: String,
		/// Realm supplied in the payload.
		payload: String,
	},
}

/// Failures reported by an [`IdentityProviderClient`](crate::idp::IdentityProviderClient).
#[derive(Debug, ThisError)]
pub enum ProviderError {
	/// The token endpoint rejected the client credentials.
	#[error("Token endpoint rejected the client: {error}.")]
	Rejected {
		/// OAuth error code returned by the provider.
		error: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// An admin or discovery endpoint answered with a non-success status.
	#[error("Identity provider responded with HTTP {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Endpoint URL could not be derived from the connection configuration.
	#[error("Identity provider URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Identity provider returned an unexpected response: {message}.")]
	Endpoint {
		/// Broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Provider responded with JSON that does not match the expected shape.
	#[error("Identity provider returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the identity provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the identity provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
