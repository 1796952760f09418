//! Host-facing operations: connection configuration management and client-secret lookups.
//!
//! [`Broker`] owns one process-wide [`SessionCache`] and [`ConnectionConfigStore`] and is
//! meant to be shared (it is cheap to clone) across every concurrent request the host
//! dispatches.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, RealmId},
	clock::{Clock, SystemClock},
	config::{ConnectionConfig, ConnectionConfigInput, ConnectionConfigStore, Probe, Scope},
	context::RequestContext,
	idp::IdentityProviderClient,
	obs::{self, Operation, OperationSpan, Outcome},
	resolver::{ClientSecretResolver, LegacySecret, ResolvedSecret},
	session::SessionCache,
	settings::BrokerSettings,
	store::ConfigStorage,
};

/// Secret broker facade.
#[derive(Clone)]
pub struct Broker {
	configs: ConnectionConfigStore,
	sessions: SessionCache,
	resolver: ClientSecretResolver,
	idp: Arc<dyn IdentityProviderClient>,
	settings: BrokerSettings,
}
impl Broker {
	/// Creates a broker that stamps tokens with the system clock.
	pub fn new(
		storage: Arc<dyn ConfigStorage>,
		idp: Arc<dyn IdentityProviderClient>,
		settings: BrokerSettings,
	) -> Self {
		Self::with_clock(storage, idp, Arc::new(SystemClock), settings)
	}

	/// Creates a broker with an explicit time source.
	pub fn with_clock(
		storage: Arc<dyn ConfigStorage>,
		idp: Arc<dyn IdentityProviderClient>,
		clock: Arc<dyn Clock>,
		settings: BrokerSettings,
	) -> Self {
		let configs = ConnectionConfigStore::new(storage);
		let sessions = SessionCache::new(idp.clone(), clock, settings.expiry_policy())
			.with_login_timeout(settings.call_timeout());
		let resolver = ClientSecretResolver::new(configs.clone(), sessions.clone(), idp.clone());

		Self { configs, sessions, resolver, idp, settings }
	}

	/// Session cache shared by every resolution.
	pub fn sessions(&self) -> &SessionCache {
		&self.sessions
	}

	/// Resolver used by the lookup operations.
	pub fn resolver(&self) -> &ClientSecretResolver {
		&self.resolver
	}

	/// Settings the broker was built with.
	pub fn settings(&self) -> &BrokerSettings {
		&self.settings
	}

	/// Validates and stores a connection configuration for `scope`.
	///
	/// Unless `ignore_connectivity_check` is set, a throwaway login must succeed before the
	/// write commits. The session of a replaced configuration is dropped.
	pub async fn write_config(
		&self,
		ctx: &RequestContext,
		scope: &Scope,
		input: ConnectionConfigInput,
	) -> Result<ConnectionConfig> {
		const OPERATION: Operation = Operation::WriteConfig;

		let span = OperationSpan::new(OPERATION, "write_config");

		obs::record_outcome(OPERATION, Outcome::Attempt);

		let result = span
			.instrument(async {
				let config = input.validate(scope)?;
				let probe = if input.ignore_connectivity_check {
					Probe::Skip
				} else {
					Probe::Authenticate(self.idp.as_ref())
				};
				let previous = self.configs.get_exact(scope).await?;

				self.configs.put(ctx, scope, &config, probe).await?;

				if let Some(previous) = previous.filter(|previous| *previous != config) {
					self.sessions.invalidate(&previous);
				}

				Ok(config)
			})
			.await;

		span.finish(&result);

		result
	}

	/// Reads the configuration stored for exactly `scope`, without default-scope fallback.
	pub async fn read_config(&self, scope: &Scope) -> Result<Option<ConnectionConfig>> {
		const OPERATION: Operation = Operation::ReadConfig;

		let span = OperationSpan::new(OPERATION, "read_config");

		obs::record_outcome(OPERATION, Outcome::Attempt);

		let result = span.instrument(self.configs.get_exact(scope)).await;

		span.finish(&result);

		result
	}

	/// Deletes the configuration stored for `scope` and drops its session.
	pub async fn delete_config(&self, scope: &Scope) -> Result<()> {
		const OPERATION: Operation = Operation::DeleteConfig;

		let span = OperationSpan::new(OPERATION, "delete_config");

		obs::record_outcome(OPERATION, Outcome::Attempt);

		let result = span
			.instrument(async {
				let previous = self.configs.get_exact(scope).await?;

				self.configs.delete(scope).await?;

				if let Some(previous) = previous {
					self.sessions.invalidate(&previous);
				}

				Ok(())
			})
			.await;

		span.finish(&result);

		result
	}

	/// Looks up `client_id` with the default configuration.
	pub async fn client_secret(
		&self,
		ctx: &RequestContext,
		client_id: &ClientId,
	) -> Result<ResolvedSecret> {
		self.resolver.resolve(ctx, &Scope::Default, None, client_id).await
	}

	/// Looks up `client_id` in `realm`, preferring a configuration pinned to that realm.
	pub async fn realm_client_secret(
		&self,
		ctx: &RequestContext,
		realm: &RealmId,
		client_id: &ClientId,
	) -> Result<ResolvedSecret> {
		self.resolver.resolve(ctx, &Scope::Realm(realm.clone()), Some(realm), client_id).await
	}

	/// Looks up `client_id` with the default configuration in the legacy response shape.
	pub async fn legacy_client_secret(
		&self,
		ctx: &RequestContext,
		client_id: &ClientId,
	) -> Result<LegacySecret> {
		self.resolver.resolve_legacy(ctx, client_id, self.settings.legacy_response).await
	}
}
impl Debug for Broker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("configs", &self.configs)
			.field("sessions", &self.sessions)
			.field("settings", &self.settings)
			.finish_non_exhaustive()
	}
}
