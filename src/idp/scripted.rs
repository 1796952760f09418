//! In-process [`IdentityProviderClient`] driven by registered fixtures.
//!
//! Hosts use it for dry runs and the test suites use it to count logins and lookups without a
//! network. Admin calls only accept bearer values this provider issued, so a stale or foreign
//! token surfaces as an HTTP 401 just like on a real server.

// std
use std::{collections::HashSet, time::Duration as StdDuration};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, RealmId, Secret},
	error::ProviderError,
	idp::{
		ClientRecord, CredentialRecord, DiscoveryDocument, IdentityProviderClient, IdpFuture,
		ServerEndpoint, TokenGrant,
	},
	obs::Operation,
};

/// Call observed by a [`ScriptedIdentityProvider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
	/// Operation invoked.
	pub operation: Operation,
	/// Realm the call targeted.
	pub realm: String,
}

#[derive(Debug)]
struct Account {
	secret: Secret,
	expires_in: u64,
}

#[derive(Debug, Default)]
struct ScriptState {
	accounts: HashMap<(String, String), Account>,
	clients: HashMap<(String, String), Vec<ClientRecord>>,
	credentials: HashMap<(String, String), CredentialRecord>,
	issuers: HashMap<String, Result<String, u16>>,
	issued: HashSet<String>,
	calls: Vec<RecordedCall>,
	login_delay: Option<StdDuration>,
}

/// Scripted identity provider with call recording.
#[derive(Debug, Default)]
pub struct ScriptedIdentityProvider {
	state: Mutex<ScriptState>,
}
impl ScriptedIdentityProvider {
	/// Creates a provider with no accounts, clients, or issuers.
	pub fn new() -> Self {
		Self::default()
	}

	/// Accepts logins to `realm` by `client_id` with `secret`, issuing tokens valid for
	/// `expires_in` seconds.
	pub fn register_account(
		&self,
		realm: &str,
		client_id: &str,
		secret: &str,
		expires_in: u64,
	) -> &Self {
		self.state.lock().accounts.insert(
			(realm.to_owned(), client_id.to_owned()),
			Account { secret: Secret::new(secret), expires_in },
		);

		self
	}

	/// Adds a client registration to `realm`; registering the same `client_id` twice makes the
	/// lookup ambiguous.
	pub fn register_client(
		&self,
		realm: &str,
		client_id: &str,
		internal_id: &str,
		secret: Option<&str>,
	) -> &Self {
		let mut state = self.state.lock();

		let record =
			ClientRecord { internal_id: internal_id.to_owned(), client_id: client_id.to_owned() };

		state.clients.entry((realm.to_owned(), client_id.to_owned())).or_default().push(record);
		state.credentials.insert(
			(realm.to_owned(), internal_id.to_owned()),
			CredentialRecord { secret: secret.map(Secret::new) },
		);

		self
	}

	/// Publishes a discovery document for `realm`.
	pub fn register_issuer(&self, realm: &str, issuer: &str) -> &Self {
		self.state.lock().issuers.insert(realm.to_owned(), Ok(issuer.to_owned()));

		self
	}

	/// Makes discovery for `realm` answer with the provided HTTP status.
	pub fn fail_discovery(&self, realm: &str, status: u16) -> &Self {
		self.state.lock().issuers.insert(realm.to_owned(), Err(status));

		self
	}

	/// Delays every login by `delay` before answering.
	pub fn set_login_delay(&self, delay: StdDuration) -> &Self {
		self.state.lock().login_delay = Some(delay);

		self
	}

	/// Every call observed so far, in order.
	pub fn calls(&self) -> Vec<RecordedCall> {
		self.state.lock().calls.clone()
	}

	/// Number of observed calls of `operation`.
	pub fn call_count(&self, operation: Operation) -> usize {
		self.state.lock().calls.iter().filter(|call| call.operation == operation).count()
	}

	/// Number of observed calls of `operation` that targeted `realm`.
	pub fn call_count_for(&self, operation: Operation, realm: &str) -> usize {
		self.state
			.lock()
			.calls
			.iter()
			.filter(|call| call.operation == operation && call.realm == realm)
			.count()
	}

	fn record(&self, operation: Operation, realm: &RealmId) {
		self.state.lock().calls.push(RecordedCall { operation, realm: realm.to_string() });
	}

	fn authorize(&self, token: &AccessToken) -> Result<(), ProviderError> {
		if self.state.lock().issued.contains(token.value.expose()) {
			Ok(())
		} else {
			Err(ProviderError::Status { status: 401, retry_after: None })
		}
	}
}
impl IdentityProviderClient for ScriptedIdentityProvider {
	fn authenticate<'a>(
		&'a self,
		_server: &'a ServerEndpoint,
		realm: &'a RealmId,
		client_id: &'a ClientId,
		client_secret: &'a Secret,
	) -> IdpFuture<'a, TokenGrant> {
		Box::pin(async move {
			self.record(Operation::Authenticate, realm);

			let delay = self.state.lock().login_delay;

			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}

			let mut state = self.state.lock();
			let expires_in = state
				.accounts
				.get(&(realm.to_string(), client_id.to_string()))
				.filter(|account| account.secret == *client_secret)
				.map(|account| account.expires_in)
				.ok_or_else(|| ProviderError::Rejected {
					error: "unauthorized_client".into(),
					status: Some(401),
				})?;
			let value = format!("token-{realm}-{}", state.issued.len() + 1);

			state.issued.insert(value.clone());

			Ok(TokenGrant { access_token: Secret::new(value), expires_in })
		})
	}

	fn list_clients<'a>(
		&'a self,
		_server: &'a ServerEndpoint,
		token: &'a AccessToken,
		realm: &'a RealmId,
		client_id: &'a ClientId,
	) -> IdpFuture<'a, Vec<ClientRecord>> {
		Box::pin(async move {
			self.record(Operation::ListClients, realm);
			self.authorize(token)?;

			Ok(self
				.state
				.lock()
				.clients
				.get(&(realm.to_string(), client_id.to_string()))
				.cloned()
				.unwrap_or_default())
		})
	}

	fn fetch_client_credential<'a>(
		&'a self,
		_server: &'a ServerEndpoint,
		token: &'a AccessToken,
		realm: &'a RealmId,
		internal_id: &'a str,
	) -> IdpFuture<'a, CredentialRecord> {
		Box::pin(async move {
			self.record(Operation::FetchClientCredential, realm);
			self.authorize(token)?;

			self.state
				.lock()
				.credentials
				.get(&(realm.to_string(), internal_id.to_owned()))
				.cloned()
				.ok_or(ProviderError::Status { status: 404, retry_after: None })
		})
	}

	fn fetch_discovery_document<'a>(
		&'a self,
		_server: &'a ServerEndpoint,
		realm: &'a RealmId,
	) -> IdpFuture<'a, DiscoveryDocument> {
		Box::pin(async move {
			self.record(Operation::FetchDiscoveryDocument, realm);

			match self.state.lock().issuers.get(realm.as_ref()) {
				Some(Ok(issuer)) => Ok(DiscoveryDocument { issuer: issuer.clone() }),
				Some(Err(status)) =>
					Err(ProviderError::Status { status: *status, retry_after: None }),
				None => Err(ProviderError::Status { status: 404, retry_after: None }),
			}
		})
	}
}
