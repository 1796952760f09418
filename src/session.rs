//! Expiry-aware cache of admin sessions, one entry per connection identity.
//!
//! Lookups take a read lock and return a usable token without touching the network. Misses
//! and expiring tokens go through a per-identity singleflight guard: the first caller logs in
//! while later callers wait on the same guard and re-check the entry once they acquire it, so
//! a validity window never sees more than one login. The login itself runs in a detached task,
//! which lets a caller abandon the wait (cancellation or deadline) without aborting a refresh
//! other waiters depend on.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, ExpiryPolicy, RealmId},
	clock::Clock,
	config::ConnectionConfig,
	context::RequestContext,
	error::{ProviderError, TransientError},
	idp::IdentityProviderClient,
	obs::{self, Operation, OperationSpan, Outcome},
};

/// Identity under which a session is cached.
///
/// The client secret participates only through its fingerprint, so a rotated secret forces a
/// fresh login without the secret ever becoming a map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
	/// Base IAM URL.
	pub server_url: String,
	/// Optional path prefix.
	pub base_path: Option<String>,
	/// Realm the session is logged in to.
	pub realm: RealmId,
	/// Admin client id.
	pub client_id: ClientId,
	/// SHA-256 fingerprint of the admin client secret.
	pub secret_fingerprint: String,
}
impl SessionKey {
	/// Derives the key for `config`.
	pub fn for_config(config: &ConnectionConfig) -> Self {
		Self {
			server_url: config.server_url.clone(),
			base_path: config.base_path.clone(),
			realm: config.realm.clone(),
			client_id: config.client_id.clone(),
			secret_fingerprint: config.client_secret.fingerprint(),
		}
	}
}

#[derive(Debug, Default)]
struct SessionEntry {
	token: RwLock<Option<AccessToken>>,
	refresh: AsyncMutex<()>,
}

/// Process-wide cache of admin sessions shared by every resolution.
///
/// Clones share the same entries.
#[derive(Clone)]
pub struct SessionCache {
	idp: Arc<dyn IdentityProviderClient>,
	clock: Arc<dyn Clock>,
	policy: ExpiryPolicy,
	login_timeout: Duration,
	entries: Arc<RwLock<HashMap<SessionKey, Arc<SessionEntry>>>>,
}
impl SessionCache {
	/// Default bound on a single detached login.
	pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::seconds(30);

	/// Creates an empty cache.
	pub fn new(
		idp: Arc<dyn IdentityProviderClient>,
		clock: Arc<dyn Clock>,
		policy: ExpiryPolicy,
	) -> Self {
		Self {
			idp,
			clock,
			policy,
			login_timeout: Self::DEFAULT_LOGIN_TIMEOUT,
			entries: Default::default(),
		}
	}

	/// Overrides the bound on a single detached login; negative values clamp to zero.
	pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
		self.login_timeout = if timeout.is_negative() { Duration::ZERO } else { timeout };

		self
	}

	/// Expiry policy applied to cached tokens.
	pub fn policy(&self) -> ExpiryPolicy {
		self.policy
	}

	/// Returns a usable admin token for `config`, logging in at most once per validity window.
	pub async fn get_valid_token(
		&self,
		ctx: &RequestContext,
		config: &ConnectionConfig,
	) -> Result<AccessToken> {
		let key = SessionKey::for_config(config);

		if let Some(token) = self.cached(&key) {
			return Ok(token);
		}

		let span = OperationSpan::new(Operation::Authenticate, "session_refresh");
		let entry = self.entry(key);
		let cache = self.clone();
		let config = config.clone();
		let task =
			tokio::spawn(span.instrument(async move { cache.refresh(&entry, &config).await }));

		ctx.run(async { task.await.unwrap_or(Err(Error::SessionTask)) }).await
	}

	/// Drops the session cached for `config`'s identity.
	///
	/// An entry still referenced by an in-flight refresh or its waiters stays in the map with
	/// its token cleared, so callers arriving afterwards join that refresh instead of starting a
	/// second login.
	pub fn invalidate(&self, config: &ConnectionConfig) {
		let key = SessionKey::for_config(config);
		let mut entries = self.entries.write();
		let Some(entry) = entries.get(&key) else {
			return;
		};

		if Arc::strong_count(entry) == 1 {
			entries.remove(&key);
		} else {
			*entry.token.write() = None;
		}
	}

	/// Number of identities with an entry.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns `true` when no identity has an entry.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	fn usable(&self, entry: &SessionEntry) -> Option<AccessToken> {
		let now = self.clock.now();

		entry.token.read().as_ref().filter(|token| self.policy.is_usable(token, now)).cloned()
	}

	async fn refresh(
		&self,
		entry: &SessionEntry,
		config: &ConnectionConfig,
	) -> Result<AccessToken> {
		let _singleflight = entry.refresh.lock().await;

		if let Some(token) = self.usable(entry) {
			return Ok(token);
		}

		obs::record_outcome(Operation::Authenticate, Outcome::Attempt);

		let server = config.endpoint();
		let login = self.idp.authenticate(
			&server,
			&config.realm,
			&config.client_id,
			&config.client_secret,
		);
		let result = tokio::time::timeout(self.login_timeout.unsigned_abs(), login)
			.await
			.unwrap_or_else(|_| {
				Err(ProviderError::from(TransientError::Endpoint {
					message: "Login timed out".into(),
					status: None,
					retry_after: None,
				}))
			});

		obs::record_result(Operation::Authenticate, &result);

		let grant = result.map_err(|source| {
			obs::log_provider_failure(Operation::Authenticate, &source);

			Error::AuthenticationFailed { source }
		})?;
		let token = AccessToken {
			value: grant.access_token,
			issued_at: self.clock.now(),
			expires_in: grant.expires_in,
		};

		*entry.token.write() = Some(token.clone());

		Ok(token)
	}

	fn cached(&self, key: &SessionKey) -> Option<AccessToken> {
		let entry = self.entries.read().get(key).cloned()?;

		self.usable(&entry)
	}

	fn entry(&self, key: SessionKey) -> Arc<SessionEntry> {
		if let Some(entry) = self.entries.read().get(&key) {
			return entry.clone();
		}

		self.entries.write().entry(key).or_default().clone()
	}
}
impl Debug for SessionCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionCache")
			.field("policy", &self.policy)
			.field("login_timeout", &self.login_timeout)
			.field("entries", &self.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{clock::ManualClock, idp::ScriptedIdentityProvider};

	const START: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	fn config(client: &str, secret: &str) -> ConnectionConfig {
		ConnectionConfig::new(
			"http://x",
			RealmId::new("m").expect("Realm fixture should be valid."),
			ClientId::new(client).expect("Client fixture should be valid."),
			secret,
		)
	}

	fn cache(idp: &Arc<ScriptedIdentityProvider>, clock: &ManualClock) -> SessionCache {
		SessionCache::new(idp.clone(), Arc::new(clock.clone()), ExpiryPolicy::default())
	}

	#[tokio::test]
	async fn reuses_token_until_margin() {
		let idp = Arc::new(ScriptedIdentityProvider::new());
		let clock = ManualClock::new(START);
		let cache = cache(&idp, &clock);
		let ctx = RequestContext::new();
		let config = config("vault", "s");

		idp.register_account("m", "vault", "s", 60);

		let first = cache.get_valid_token(&ctx, &config).await.expect("Login should succeed.");

		assert_eq!(first.issued_at, START);

		clock.advance(Duration::seconds(54));

		let second = cache.get_valid_token(&ctx, &config).await.expect("Cache hit expected.");

		assert_eq!(first, second);
		assert_eq!(idp.call_count(Operation::Authenticate), 1);

		clock.advance(Duration::seconds(1));

		let third = cache.get_valid_token(&ctx, &config).await.expect("Refresh should succeed.");

		assert_ne!(first.value, third.value);
		assert_eq!(third.issued_at, START + Duration::seconds(55));
		assert_eq!(idp.call_count(Operation::Authenticate), 2);
	}

	#[tokio::test]
	async fn failures_are_not_cached() {
		let idp = Arc::new(ScriptedIdentityProvider::new());
		let clock = ManualClock::new(START);
		let cache = cache(&idp, &clock);
		let ctx = RequestContext::new();
		let config = config("vault", "s");
		let err = cache.get_valid_token(&ctx, &config).await.expect_err("Unknown account.");

		assert!(matches!(err, Error::AuthenticationFailed { .. }));

		idp.register_account("m", "vault", "s", 60);

		cache.get_valid_token(&ctx, &config).await.expect("Retry should log in.");

		assert_eq!(idp.call_count(Operation::Authenticate), 2);
	}

	#[tokio::test]
	async fn secret_rotation_forces_login() {
		let idp = Arc::new(ScriptedIdentityProvider::new());
		let clock = ManualClock::new(START);
		let cache = cache(&idp, &clock);
		let ctx = RequestContext::new();

		idp.register_account("m", "vault", "s", 60);
		cache.get_valid_token(&ctx, &config("vault", "s")).await.expect("Login should succeed.");
		idp.register_account("m", "vault", "rotated", 60);
		cache
			.get_valid_token(&ctx, &config("vault", "rotated"))
			.await
			.expect("Rotated secret should log in.");

		assert_eq!(idp.call_count(Operation::Authenticate), 2);
		assert_eq!(cache.len(), 2);
	}

	#[tokio::test]
	async fn invalidate_drops_identity() {
		let idp = Arc::new(ScriptedIdentityProvider::new());
		let clock = ManualClock::new(START);
		let cache = cache(&idp, &clock);
		let ctx = RequestContext::new();
		let config = config("vault", "s");

		idp.register_account("m", "vault", "s", 60);
		cache.get_valid_token(&ctx, &config).await.expect("Login should succeed.");
		cache.invalidate(&config);

		assert!(cache.is_empty());

		cache.get_valid_token(&ctx, &config).await.expect("Login should succeed.");

		assert_eq!(idp.call_count(Operation::Authenticate), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn invalidate_during_refresh_keeps_single_login() {
		let idp = Arc::new(ScriptedIdentityProvider::new());
		let clock = ManualClock::new(START);
		let cache = cache(&idp, &clock);
		let config = config("vault", "s");

		idp.register_account("m", "vault", "s", 60).set_login_delay(StdDuration::from_secs(10));

		let in_flight = tokio::spawn({
			let cache = cache.clone();
			let config = config.clone();

			async move { cache.get_valid_token(&RequestContext::new(), &config).await }
		});

		tokio::time::sleep(StdDuration::from_secs(1)).await;
		cache.invalidate(&config);

		assert_eq!(cache.len(), 1);

		let late = cache
			.get_valid_token(&RequestContext::new(), &config)
			.await
			.expect("Late caller should join the running refresh.");
		let early = in_flight
			.await
			.expect("Refresh task should not panic.")
			.expect("Login should succeed.");

		assert_eq!(early, late);
		assert_eq!(idp.call_count(Operation::Authenticate), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn slow_logins_are_bounded() {
		let idp = Arc::new(ScriptedIdentityProvider::new());
		let clock = ManualClock::new(START);
		let cache = cache(&idp, &clock).with_login_timeout(Duration::seconds(1));

		idp.register_account("m", "vault", "s", 60);
		idp.set_login_delay(StdDuration::from_secs(10));

		let err = cache
			.get_valid_token(&RequestContext::new(), &config("vault", "s"))
			.await
			.expect_err("Login should time out.");

		assert!(matches!(err, Error::AuthenticationFailed { .. }));
	}
}
