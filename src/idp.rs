//! Identity provider capability consumed by the session cache and the resolver.
//!
//! [`IdentityProviderClient`] is the broker's only dependency on the IAM server. The
//! Keycloak-compatible HTTP adapter lives in [`keycloak`] (feature `reqwest`); the
//! [`ScriptedIdentityProvider`] double lets hosts and tests drive every branch without a network.

#[cfg(feature = "reqwest")] pub mod keycloak;
pub mod scripted;

#[cfg(feature = "reqwest")] pub use keycloak::KeycloakIdentityProvider;
pub use scripted::ScriptedIdentityProvider;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, RealmId, Secret},
	error::ProviderError,
};

/// Boxed future returned by [`IdentityProviderClient`] operations.
pub type IdpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + 'a + Send>>;

/// Server coordinates shared by every identity provider call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
	/// Base IAM URL.
	pub server_url: String,
	/// Optional path prefix inserted before `/realms` and `/admin`.
	pub base_path: Option<String>,
}
impl ServerEndpoint {
	/// Creates an endpoint without a base path.
	pub fn new(server_url: impl Into<String>) -> Self {
		Self { server_url: server_url.into(), base_path: None }
	}

	/// Builds `{server_url}{base_path}/{segments..}`, percent-encoding each segment.
	pub fn url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
		let mut url =
			Url::parse(&self.server_url).map_err(|source| ProviderError::InvalidUrl { source })?;

		{
			let mut path = url.path_segments_mut().map_err(|_| ProviderError::InvalidUrl {
				source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
			})?;

			path.pop_if_empty();

			for prefix in
				self.base_path.iter().flat_map(|base| base.split('/')).filter(|s| !s.is_empty())
			{
				path.push(prefix);
			}

			path.extend(segments);
		}

		url.set_query(None);

		Ok(url)
	}
}

/// Successful token endpoint response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
	/// Bearer value.
	pub access_token: Secret,
	/// Lifetime in seconds; `0` when the provider omitted it.
	pub expires_in: u64,
}

/// Client registration returned by the lookup endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ClientRecord {
	/// Server-assigned internal id used by credential lookups.
	#[serde(rename = "id")]
	pub internal_id: String,
	/// Public `clientId`.
	#[serde(rename = "clientId")]
	pub client_id: String,
}

/// Client credential returned by the secret endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize)]
pub struct CredentialRecord {
	/// Secret value; absent for public clients or clients without a generated secret.
	#[serde(default, rename = "value")]
	pub secret: Option<Secret>,
}

/// Subset of a realm's OpenID discovery document.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DiscoveryDocument {
	/// Canonical issuer identifier of the realm.
	pub issuer: String,
}

/// Operations the broker needs from the IAM server.
///
/// Every admin call is authorized with a bearer token obtained from
/// [`authenticate`](Self::authenticate); discovery is anonymous.
pub trait IdentityProviderClient
where
	Self: Send + Sync,
{
	/// Performs a client-credentials login against `realm`.
	fn authenticate<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		realm: &'a RealmId,
		client_id: &'a ClientId,
		client_secret: &'a Secret,
	) -> IdpFuture<'a, TokenGrant>;

	/// Lists client registrations in `realm` whose public id equals `client_id`.
	fn list_clients<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		token: &'a AccessToken,
		realm: &'a RealmId,
		client_id: &'a ClientId,
	) -> IdpFuture<'a, Vec<ClientRecord>>;

	/// Fetches the credential of the client with the provided internal id.
	fn fetch_client_credential<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		token: &'a AccessToken,
		realm: &'a RealmId,
		internal_id: &'a str,
	) -> IdpFuture<'a, CredentialRecord>;

	/// Fetches the OpenID discovery document of `realm`.
	fn fetch_discovery_document<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		realm: &'a RealmId,
	) -> IdpFuture<'a, DiscoveryDocument>;
}
