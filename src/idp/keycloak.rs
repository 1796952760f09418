//! Keycloak-compatible [`IdentityProviderClient`] over reqwest.
//!
//! Logins use the `oauth2` client-credentials exchange with `client_secret_post`
//! authentication. Admin lookups and discovery are plain JSON `GET`s whose bodies are parsed
//! with `serde_path_to_error`, so malformed payloads report the offending field.

// crates.io
use oauth2::{
	AuthType, ClientId as OAuthClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicRequestTokenError},
};
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ClientId, RealmId, Secret},
	error::{ProviderError, TransientError, TransportError},
	http::{self, ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
	idp::{
		ClientRecord, CredentialRecord, DiscoveryDocument, IdentityProviderClient, IdpFuture,
		ServerEndpoint, TokenGrant,
	},
	settings::BrokerSettings,
};

type TokenClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// HTTP adapter for Keycloak's token, admin, and discovery endpoints.
#[derive(Clone, Debug, Default)]
pub struct KeycloakIdentityProvider {
	http: ReqwestHttpClient,
}
impl KeycloakIdentityProvider {
	/// Creates an adapter backed by a default reqwest client.
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds an adapter whose client applies the settings' per-call timeout and never follows
	/// redirects.
	pub fn from_settings(settings: &BrokerSettings) -> Result<Self, ProviderError> {
		let client = ReqwestClient::builder()
			.timeout(settings.call_timeout().unsigned_abs())
			.redirect(Policy::none())
			.build()
			.map_err(TransportError::from)?;

		Ok(Self::with_http_client(ReqwestHttpClient::with_client(client)))
	}

	/// Uses the provided HTTP client for every call.
	pub fn with_http_client(http: ReqwestHttpClient) -> Self {
		Self { http }
	}

	fn token_client(
		server: &ServerEndpoint,
		realm: &RealmId,
		client_id: &ClientId,
		client_secret: &Secret,
	) -> Result<TokenClient, ProviderError> {
		let token_url =
			server.url(&["realms", realm.as_ref(), "protocol", "openid-connect", "token"])?;

		Ok(BasicClient::new(OAuthClientId::new(client_id.to_string()))
			.set_client_secret(ClientSecret::new(client_secret.expose().to_owned()))
			.set_token_uri(TokenUrl::from_url(token_url))
			.set_auth_type(AuthType::RequestBody))
	}

	async fn get_json<T>(&self, url: Url, bearer: Option<&AccessToken>) -> Result<T, ProviderError>
	where
		T: DeserializeOwned,
	{
		let mut request = self.http.get(url);

		if let Some(token) = bearer {
			request = request.bearer_auth(token.value.expose());
		}

		let response = request.send().await.map_err(|e| map_reqwest_error(None, e))?;
		let status = response.status();

		if !status.is_success() {
			return Err(ProviderError::Status {
				status: status.as_u16(),
				retry_after: http::parse_retry_after(response.headers()),
			});
		}

		let bytes = response.bytes().await.map_err(|e| map_reqwest_error(None, e))?;
		let mut deserializer = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
			TransientError::ResponseParse { source, status: Some(status.as_u16()) }.into()
		})
	}
}
impl IdentityProviderClient for KeycloakIdentityProvider {
	fn authenticate<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		realm: &'a RealmId,
		client_id: &'a ClientId,
		client_secret: &'a Secret,
	) -> IdpFuture<'a, TokenGrant> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let client = Self::token_client(server, realm, client_id, client_secret)?;
			let instrumented = self.http.instrumented(meta.clone());
			let response = client
				.exchange_client_credentials()
				.request_async(&instrumented)
				.await
				.map_err(|e| map_request_error(meta.take(), e))?;

			Ok(TokenGrant {
				access_token: Secret::new(response.access_token().secret().to_owned()),
				expires_in: response.expires_in().map(|lifetime| lifetime.as_secs()).unwrap_or(0),
			})
		})
	}

	fn list_clients<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		token: &'a AccessToken,
		realm: &'a RealmId,
		client_id: &'a ClientId,
	) -> IdpFuture<'a, Vec<ClientRecord>> {
		Box::pin(async move {
			let mut url = server.url(&["admin", "realms", realm.as_ref(), "clients"])?;

			url.query_pairs_mut()
				.append_pair("clientId", client_id.as_ref())
				.append_pair("search", "false");

			let records: Vec<ClientRecord> = self.get_json(url, Some(token)).await?;

			Ok(records
				.into_iter()
				.filter(|record| record.client_id == client_id.as_str())
				.collect())
		})
	}

	fn fetch_client_credential<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		token: &'a AccessToken,
		realm: &'a RealmId,
		internal_id: &'a str,
	) -> IdpFuture<'a, CredentialRecord> {
		Box::pin(async move {
			let url = server.url(&[
				"admin",
				"realms",
				realm.as_ref(),
				"clients",
				internal_id,
				"client-secret",
			])?;

			self.get_json(url, Some(token)).await
		})
	}

	fn fetch_discovery_document<'a>(
		&'a self,
		server: &'a ServerEndpoint,
		realm: &'a RealmId,
	) -> IdpFuture<'a, DiscoveryDocument> {
		Box::pin(async move {
			let url =
				server.url(&["realms", realm.as_ref(), ".well-known", "openid-configuration"])?;

			self.get_json(url, None).await
		})
	}
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> ProviderError {
	let meta = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => ProviderError::Rejected {
			error: response.error().as_ref().to_owned(),
			status: meta_status(meta),
		},
		RequestTokenError::Request(error) => map_transport_error(meta, error),
		RequestTokenError::Parse(source, _body) =>
			TransientError::ResponseParse { source, status: meta_status(meta) }.into(),
		RequestTokenError::Other(message) => TransientError::Endpoint {
			message: format!("Token endpoint returned an unexpected response: {message}"),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_transport_error(
	meta: Option<&ResponseMetadata>,
	err: HttpClientError<ReqwestError>,
) -> ProviderError {
	match err {
		HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
		HttpClientError::Http(inner) => ProviderError::HttpRequest(inner),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::Endpoint {
			message: format!("HTTP client error: {message}"),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
		_ => TransientError::Endpoint {
			message: "Unknown HTTP client error".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> ProviderError {
	if err.is_timeout() {
		return TransientError::Endpoint {
			message: "Request timed out while calling the identity provider".into(),
			status: meta_status(meta).or_else(|| err.status().map(|status| status.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|meta| meta.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|meta| meta.retry_after)
}
