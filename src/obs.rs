//! Optional observability helpers for broker operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `iam_secret_broker.operation` with the
//!   `operation` and `stage` (call site) fields, plus warnings for identity provider failures.
//! - Enable `metrics` to increment the `iam_secret_broker_operation_total` counter for every
//!   attempt and result, labeled by `operation` + `outcome`. Failures caused by the caller
//!   (missing configuration, unknown client, rejected credentials) are labeled `rejected` so
//!   they can be told apart from provider or storage faults.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{_prelude::*, error::ProviderError};

/// Errors that know which [`Outcome`] they represent.
pub trait ClassifyOutcome {
	/// Outcome label recorded when this error ends an operation.
	fn outcome(&self) -> Outcome;
}
impl ClassifyOutcome for Error {
	fn outcome(&self) -> Outcome {
		if self.is_user_error() { Outcome::Rejected } else { Outcome::Failure }
	}
}
impl ClassifyOutcome for ProviderError {
	fn outcome(&self) -> Outcome {
		match self {
			ProviderError::Rejected { .. } => Outcome::Rejected,
			_ => Outcome::Failure,
		}
	}
}

/// Operations observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
	/// Client-credentials login against the token endpoint.
	Authenticate,
	/// Client lookup by public `clientId`.
	ListClients,
	/// Credential lookup by internal client id.
	FetchClientCredential,
	/// Realm OpenID discovery document fetch.
	FetchDiscoveryDocument,
	/// Throwaway login run before a configuration write.
	ConnectivityCheck,
	/// Full client-secret resolution.
	ResolveSecret,
	/// Configuration write.
	WriteConfig,
	/// Configuration read.
	ReadConfig,
	/// Configuration delete.
	DeleteConfig,
}
impl Operation {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::Authenticate => "authenticate",
			Operation::ListClients => "list_clients",
			Operation::FetchClientCredential => "fetch_client_credential",
			Operation::FetchDiscoveryDocument => "fetch_discovery_document",
			Operation::ConnectivityCheck => "connectivity_check",
			Operation::ResolveSecret => "resolve_secret",
			Operation::WriteConfig => "write_config",
			Operation::ReadConfig => "read_config",
			Operation::DeleteConfig => "delete_config",
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a broker operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure caused by the caller's input or credentials.
	Rejected,
	/// Failure of the broker or one of its collaborators.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Rejected => "rejected",
			Outcome::Failure => "failure",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Emits a warning for an identity provider failure (when tracing is enabled).
///
/// Only the top-level message is logged; provider detail stays in the error chain.
pub fn log_provider_failure(operation: Operation, error: &ProviderError) {
	#[cfg(feature = "tracing")]
	{
		::tracing::warn!(
			operation = operation.as_str(),
			error = %error,
			"identity provider call failed"
		);
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (operation, error);
	}
}

/// Outcome recorded for a finished operation.
pub fn outcome_of<T, E>(result: &Result<T, E>) -> Outcome
where
	E: ClassifyOutcome,
{
	result.as_ref().map_or_else(|e| e.outcome(), |_| Outcome::Success)
}
