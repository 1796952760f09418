//! Client-secret lookup against the IAM admin API.
//!
//! A resolution reads the connection configuration for its scope, borrows a session from the
//! [`SessionCache`], looks the target client up by exact `clientId`, fetches its credential, and
//! resolves the realm issuer from the live discovery document. Every provider call is raced
//! against the caller's [`RequestContext`].

// self
use crate::{
	_prelude::*,
	auth::{ClientId, RealmId, Secret},
	config::{ConnectionConfig, ConnectionConfigStore, Scope},
	context::RequestContext,
	error::ProviderError,
	idp::IdentityProviderClient,
	obs::{self, Operation, OperationSpan, Outcome},
	session::SessionCache,
	settings::LegacyResponse,
};

/// Result of a client-secret resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedSecret {
	/// Secret of the requested client.
	pub client_secret: Secret,
	/// Requested client id.
	pub client_id: ClientId,
	/// Issuer published by the realm's discovery document.
	pub issuer: String,
}

/// Result of the legacy lookup form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LegacySecret {
	/// Secret of the requested client.
	pub client_secret: Secret,
	/// Requested client id; omitted in the secret-only shape.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_id: Option<ClientId>,
	/// Issuer URL built from the configuration; omitted in the secret-only shape.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub issuer_url: Option<String>,
}

/// Orchestrates configuration, session, and identity provider lookups.
#[derive(Clone)]
pub struct ClientSecretResolver {
	configs: ConnectionConfigStore,
	sessions: SessionCache,
	idp: Arc<dyn IdentityProviderClient>,
}
impl ClientSecretResolver {
	/// Wires the resolver to its collaborators.
	pub fn new(
		configs: ConnectionConfigStore,
		sessions: SessionCache,
		idp: Arc<dyn IdentityProviderClient>,
	) -> Self {
		Self { configs, sessions, idp }
	}

	/// Resolves `client_id` using the configuration of `scope`.
	///
	/// `realm_override` selects the realm queried for the client; the configuration's own realm
	/// is used otherwise. Logins always target the configuration's realm.
	pub async fn resolve(
		&self,
		ctx: &RequestContext,
		scope: &Scope,
		realm_override: Option<&RealmId>,
		client_id: &ClientId,
	) -> Result<ResolvedSecret> {
		const OPERATION: Operation = Operation::ResolveSecret;

		let span = OperationSpan::new(OPERATION, "resolve");

		obs::record_outcome(OPERATION, Outcome::Attempt);

		let result = span
			.instrument(async {
				let config = self.config(scope).await?;
				let realm = realm_override.unwrap_or(&config.realm);
				let client_secret = self.fetch_secret(ctx, &config, realm, client_id).await?;
				let issuer = self.issuer(ctx, &config, realm).await?;

				Ok(ResolvedSecret { client_secret, client_id: client_id.clone(), issuer })
			})
			.await;

		span.finish(&result);

		result
	}

	/// Resolves `client_id` in the default scope's realm, answering in the legacy shape.
	///
	/// The issuer URL is concatenated from the configuration rather than discovered.
	pub async fn resolve_legacy(
		&self,
		ctx: &RequestContext,
		client_id: &ClientId,
		shape: LegacyResponse,
	) -> Result<LegacySecret> {
		const OPERATION: Operation = Operation::ResolveSecret;

		let span = OperationSpan::new(OPERATION, "resolve_legacy");

		obs::record_outcome(OPERATION, Outcome::Attempt);

		let result = span
			.instrument(async {
				let config = self.config(&Scope::Default).await?;
				let client_secret =
					self.fetch_secret(ctx, &config, &config.realm, client_id).await?;

				Ok(match shape {
					LegacyResponse::SecretOnly =>
						LegacySecret { client_secret, client_id: None, issuer_url: None },
					LegacyResponse::Full => LegacySecret {
						client_secret,
						client_id: Some(client_id.clone()),
						issuer_url: Some(legacy_issuer_url(&config)),
					},
				})
			})
			.await;

		span.finish(&result);

		result
	}

	async fn config(&self, scope: &Scope) -> Result<ConnectionConfig> {
		self.configs
			.get(scope)
			.await?
			.ok_or_else(|| Error::ConfigurationMissing { scope: scope.to_string() })
	}

	async fn fetch_secret(
		&self,
		ctx: &RequestContext,
		config: &ConnectionConfig,
		realm: &RealmId,
		client_id: &ClientId,
	) -> Result<Secret> {
		let token = self.sessions.get_valid_token(ctx, config).await?;
		let server = config.endpoint();
		let clients = ctx
			.run(async {
				self.idp
					.list_clients(&server, &token, realm, client_id)
					.await
					.map_err(|source| provider_failure(Operation::ListClients, source))
			})
			.await?;
		let internal_id = match clients.as_slice() {
			[client] => client.internal_id.as_str(),
			[] => return Err(Error::ClientNotFound { client_id: client_id.to_string() }),
			_ =>
				return Err(Error::AmbiguousClient {
					client_id: client_id.to_string(),
					count: clients.len(),
				}),
		};
		let credential = ctx
			.run(async {
				self.idp
					.fetch_client_credential(&server, &token, realm, internal_id)
					.await
					.map_err(|source| provider_failure(Operation::FetchClientCredential, source))
			})
			.await?;

		credential
			.secret
			.filter(|secret| !secret.is_empty())
			.ok_or_else(|| Error::SecretUnavailable { client_id: client_id.to_string() })
	}

	async fn issuer(
		&self,
		ctx: &RequestContext,
		config: &ConnectionConfig,
		realm: &RealmId,
	) -> Result<String> {
		let server = config.endpoint();
		let discovery = ctx
			.run(async {
				self.idp.fetch_discovery_document(&server, realm).await.map_err(|source| {
					obs::log_provider_failure(Operation::FetchDiscoveryDocument, &source);

					Error::IssuerResolutionFailed { realm: realm.to_string(), source }
				})
			})
			.await?;

		Ok(discovery.issuer)
	}
}
impl Debug for ClientSecretResolver {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientSecretResolver")
			.field("configs", &self.configs)
			.field("sessions", &self.sessions)
			.finish_non_exhaustive()
	}
}

/// Issuer URL of the legacy response, concatenated as `server_url + base_path + /realms/ + realm`.
pub fn legacy_issuer_url(config: &ConnectionConfig) -> String {
	format!(
		"{}{}/realms/{}",
		config.server_url,
		config.base_path.as_deref().unwrap_or_default(),
		config.realm
	)
}

fn provider_failure(operation: Operation, source: ProviderError) -> Error {
	obs::log_provider_failure(operation, &source);

	Error::IdentityProvider { operation, source }
}
