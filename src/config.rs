//! Connection configurations keyed by scope, with default-scope fallback.
//!
//! A configuration is stored either under the default scope or under a realm-named scope.
//! Reads prefer the realm-specific record and fall back to the default one, which lets
//! operators pin dedicated low-privilege credentials per realm while a single administrative
//! identity serves everything else. There is no caching layer: every write is visible to the
//! next resolution.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, RealmId, Secret},
	context::RequestContext,
	error::ValidationError,
	idp::{IdentityProviderClient, ServerEndpoint},
	obs::{self, Operation},
	store::{ConfigStorage, StoreError},
};

/// Label used for the default scope in messages and logs.
pub const DEFAULT_SCOPE: &str = "default";

const DEFAULT_STORAGE_KEY: &str = "config/connection";

/// Administrative key under which a [`ConnectionConfig`] is stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
	/// Fallback scope used when no realm-specific configuration exists.
	Default,
	/// Realm-specific scope.
	Realm(RealmId),
}
impl Scope {
	/// Storage key for this scope.
	pub fn storage_key(&self) -> String {
		match self {
			Self::Default => DEFAULT_STORAGE_KEY.into(),
			Self::Realm(realm) => format!("config/realms/{realm}/connection"),
		}
	}

	/// Realm carried by a realm-specific scope.
	pub fn realm(&self) -> Option<&RealmId> {
		match self {
			Self::Default => None,
			Self::Realm(realm) => Some(realm),
		}
	}
}
impl Display for Scope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Default => f.write_str(DEFAULT_SCOPE),
			Self::Realm(realm) => Display::fmt(realm, f),
		}
	}
}
impl From<RealmId> for Scope {
	fn from(realm: RealmId) -> Self {
		Self::Realm(realm)
	}
}

/// Credentials and coordinates used to log in to the IAM server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Base IAM URL, e.g. `https://auth.example.org`.
	pub server_url: String,
	/// Realm the broker logs in to.
	pub realm: RealmId,
	/// Client used to access the admin API.
	pub client_id: ClientId,
	/// Secret of [`client_id`](Self::client_id).
	pub client_secret: Secret,
	/// Optional path prefix between the server URL and `/realms`, e.g. `/auth`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub base_path: Option<String>,
}
impl ConnectionConfig {
	/// Creates a configuration without a base path.
	pub fn new(
		server_url: impl Into<String>,
		realm: RealmId,
		client_id: ClientId,
		client_secret: impl Into<String>,
	) -> Self {
		Self {
			server_url: server_url.into(),
			realm,
			client_id,
			client_secret: Secret::new(client_secret),
			base_path: None,
		}
	}

	/// Sets the path prefix inserted before `/realms` and `/admin`.
	pub fn with_base_path(mut self, base_path: impl AsRef<str>) -> Self {
		self.base_path = normalize_base_path(base_path.as_ref());

		self
	}

	/// Server coordinates for identity provider calls.
	pub fn endpoint(&self) -> ServerEndpoint {
		ServerEndpoint { server_url: self.server_url.clone(), base_path: self.base_path.clone() }
	}
}

/// Connectivity probe run before a configuration write commits.
#[derive(Clone, Copy)]
pub enum Probe<'a> {
	/// Commit without contacting the identity provider.
	Skip,
	/// Perform a throwaway login and reject the write if it fails.
	Authenticate(&'a dyn IdentityProviderClient),
}
impl Debug for Probe<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Skip => f.write_str("Probe::Skip"),
			Self::Authenticate(_) => f.write_str("Probe::Authenticate(..)"),
		}
	}
}

/// Resolves scopes to configurations on top of a [`ConfigStorage`] collaborator.
#[derive(Clone)]
pub struct ConnectionConfigStore {
	storage: Arc<dyn ConfigStorage>,
}
impl ConnectionConfigStore {
	/// Wraps the provided persistence collaborator.
	pub fn new(storage: Arc<dyn ConfigStorage>) -> Self {
		Self { storage }
	}

	/// Resolves `scope`, falling back to the default scope when no realm-specific record exists.
	pub async fn get(&self, scope: &Scope) -> Result<Option<ConnectionConfig>> {
		if let Some(config) = self.get_exact(scope).await? {
			return Ok(Some(config));
		}

		match scope {
			Scope::Default => Ok(None),
			Scope::Realm(_) => self.get_exact(&Scope::Default).await,
		}
	}

	/// Reads the record stored for exactly `scope`, without fallback.
	pub async fn get_exact(&self, scope: &Scope) -> Result<Option<ConnectionConfig>> {
		let key = scope.storage_key();
		let Some(bytes) = self.storage.get(&key).await? else {
			return Ok(None);
		};
		let config = serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to decode configuration stored under {key}: {e}"),
		})?;

		Ok(Some(config))
	}

	/// Stores `config` under `scope`, optionally probing connectivity first.
	///
	/// A failed probe rejects the write and leaves the previous record untouched.
	pub async fn put(
		&self,
		ctx: &RequestContext,
		scope: &Scope,
		config: &ConnectionConfig,
		probe: Probe<'_>,
	) -> Result<()> {
		if let Probe::Authenticate(idp) = probe {
			let server = config.endpoint();

			ctx.run(async {
				idp.authenticate(
					&server,
					&config.realm,
					&config.client_id,
					&config.client_secret,
				)
				.await
				.map_err(|source| {
					obs::log_provider_failure(Operation::ConnectivityCheck, &source);

					Error::ConnectivityCheckFailed { source }
				})
			})
			.await?;
		}

		let bytes = serde_json::to_vec(config).map_err(|e| StoreError::Serialization {
			message: format!("Failed to encode configuration for scope {scope}: {e}"),
		})?;

		self.storage.put(&scope.storage_key(), bytes).await.map_err(Error::from)
	}

	/// Removes the record stored under `scope`; the default record is never touched by a
	/// realm-scoped delete.
	pub async fn delete(&self, scope: &Scope) -> Result<()> {
		self.storage.delete(&scope.storage_key()).await.map_err(Error::from)
	}
}
impl Debug for ConnectionConfigStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ConnectionConfigStore(..)")
	}
}

/// Write payload for a connection configuration, as received from the host.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectionConfigInput {
	/// Base IAM URL.
	#[serde(default)]
	pub server_url: Option<String>,
	/// Realm; required for the default scope, implied by realm-specific scopes.
	#[serde(default)]
	pub realm: Option<String>,
	/// Admin client id.
	#[serde(default)]
	pub client_id: Option<String>,
	/// Admin client secret.
	#[serde(default)]
	pub client_secret: Option<Secret>,
	/// Optional path prefix, e.g. `/auth`.
	#[serde(default)]
	pub base_path: Option<String>,
	/// Skips the connectivity probe when `true`.
	#[serde(default)]
	pub ignore_connectivity_check: bool,
}
impl ConnectionConfigInput {
	/// Validates the payload for `scope`, performing no side effects.
	pub fn validate(&self, scope: &Scope) -> Result<ConnectionConfig, ValidationError> {
		let server_url = required("server_url", self.server_url.as_deref())?;

		Url::parse(server_url).map_err(|source| ValidationError::InvalidServerUrl { source })?;

		let payload_realm = self.realm.as_deref().filter(|value| !value.is_empty());
		let realm = match scope {
			Scope::Default => RealmId::new(required("realm", payload_realm)?)
				.map_err(|source| ValidationError::InvalidField { field: "realm", source })?,
			Scope::Realm(realm) => {
				if let Some(payload) = payload_realm.filter(|payload| *payload != realm.as_ref()) {
					return Err(ValidationError::RealmMismatch {
						scope: realm.to_string(),
						payload: payload.to_owned(),
					});
				}

				realm.clone()
			},
		};
		let client_id = ClientId::new(required("client_id", self.client_id.as_deref())?)
			.map_err(|source| ValidationError::InvalidField { field: "client_id", source })?;
		let client_secret =
			required("client_secret", self.client_secret.as_ref().map(Secret::expose))?;
		let config = ConnectionConfig::new(server_url, realm, client_id, client_secret);

		Ok(match self.base_path.as_deref() {
			Some(base_path) => config.with_base_path(base_path),
			None => config,
		})
	}
}

fn required<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
	value.filter(|value| !value.is_empty()).ok_or(ValidationError::MissingField { field })
}

fn normalize_base_path(raw: &str) -> Option<String> {
	let trimmed = raw.trim_matches('/');

	if trimmed.is_empty() { None } else { Some(format!("/{trimmed}")) }
}
