#![cfg(feature = "reqwest")]

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use time::Duration;
// self
use iam_secret_broker::{
	auth::{AccessToken, ClientId, RealmId, Secret},
	broker::Broker,
	config::{ConnectionConfigInput, Scope},
	context::RequestContext,
	error::{Error, ProviderError, TransientError},
	http::ReqwestHttpClient,
	idp::{IdentityProviderClient, KeycloakIdentityProvider, ServerEndpoint},
	reqwest::{Client, redirect::Policy},
	settings::BrokerSettings,
	store::MemoryStorage,
};

fn realm(value: &str) -> RealmId {
	RealmId::new(value).expect("Realm fixture should be valid.")
}

fn client(value: &str) -> ClientId {
	ClientId::new(value).expect("Client fixture should be valid.")
}

fn endpoint(server: &MockServer) -> ServerEndpoint {
	ServerEndpoint { server_url: server.base_url(), base_path: Some("/auth".into()) }
}

// The mock server terminates TLS with a self-signed certificate.
fn idp() -> KeycloakIdentityProvider {
	let client = Client::builder()
		.danger_accept_invalid_certs(true)
		.redirect(Policy::none())
		.build()
		.expect("Test reqwest client should build.");

	KeycloakIdentityProvider::with_http_client(ReqwestHttpClient::with_client(client))
}

#[test]
fn adapter_builds_from_settings() {
	KeycloakIdentityProvider::from_settings(&BrokerSettings::default())
		.expect("Adapter should build from default settings.");
}

#[tokio::test]
async fn broker_resolves_secret_over_http() {
	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/auth/realms/m/protocol/openid-connect/token")
				.form_urlencoded_tuple("grant_type", "client_credentials")
				.form_urlencoded_tuple("client_id", "vault")
				.form_urlencoded_tuple("client_secret", "s");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"T\",\"token_type\":\"Bearer\",\"expires_in\":60,\"refresh_expires_in\":0}",
			);
		})
		.await;
	let clients_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/auth/admin/realms/m/clients")
				.query_param("clientId", "target")
				.query_param("search", "false")
				.header("authorization", "Bearer T");
			then.status(200)
				.header("content-type", "application/json")
				.body("[{\"id\":\"123\",\"clientId\":\"target\",\"enabled\":true}]");
		})
		.await;
	let secret_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/auth/admin/realms/m/clients/123/client-secret")
				.header("authorization", "Bearer T");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"type\":\"secret\",\"value\":\"secretValue\"}");
		})
		.await;
	let discovery_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/auth/realms/m/.well-known/openid-configuration");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"issuer\":\"http://x/auth/realms/m\",\"jwks_uri\":\"http://x/certs\"}");
		})
		.await;
	let broker =
		Broker::new(Arc::new(MemoryStorage::default()), Arc::new(idp()), BrokerSettings::default());
	let ctx = RequestContext::new();

	broker
		.write_config(&ctx, &Scope::Default, ConnectionConfigInput {
			server_url: Some(server.base_url()),
			realm: Some("m".into()),
			client_id: Some("vault".into()),
			client_secret: Some(Secret::new("s")),
			base_path: Some("/auth".into()),
			ignore_connectivity_check: true,
		})
		.await
		.expect("Configuration write should succeed.");

	for _ in 0..2 {
		let resolved = broker
			.client_secret(&ctx, &client("target"))
			.await
			.expect("Resolution should succeed.");

		assert_eq!(resolved.client_secret.expose(), "secretValue");
		assert_eq!(resolved.issuer, "http://x/auth/realms/m");
	}

	token_mock.assert_calls_async(1).await;
	clients_mock.assert_calls_async(2).await;
	secret_mock.assert_calls_async(2).await;
	discovery_mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn rejected_login_keeps_provider_detail_out_of_message() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/realms/m/protocol/openid-connect/token");
			then.status(401).header("content-type", "application/json").body(
				"{\"error\":\"unauthorized_client\",\"error_description\":\"Invalid client secret\"}",
			);
		})
		.await;
	let broker =
		Broker::new(Arc::new(MemoryStorage::default()), Arc::new(idp()), BrokerSettings::default());
	let err = broker
		.write_config(&RequestContext::new(), &Scope::Default, ConnectionConfigInput {
			server_url: Some(server.base_url()),
			realm: Some("m".into()),
			client_id: Some("vault".into()),
			client_secret: Some(Secret::new("wrong")),
			base_path: Some("/auth".into()),
			ignore_connectivity_check: false,
		})
		.await
		.expect_err("Probe should fail against a rejecting server.");

	assert!(matches!(
		&err,
		Error::ConnectivityCheckFailed { source: ProviderError::Rejected { error, status: Some(401) } }
			if error == "unauthorized_client"
	));
	assert!(!err.to_string().contains("unauthorized_client"));
	assert_eq!(broker.read_config(&Scope::Default).await.expect("Read should succeed."), None);

	mock.assert_async().await;
}

#[tokio::test]
async fn missing_lifetime_reads_as_zero() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/realms/m/protocol/openid-connect/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"T\",\"token_type\":\"bearer\"}");
		})
		.await;

	let grant = idp()
		.authenticate(&endpoint(&server), &realm("m"), &client("vault"), &Secret::new("s"))
		.await
		.expect("Login should succeed.");

	assert_eq!(grant.access_token.expose(), "T");
	assert_eq!(grant.expires_in, 0);
}

#[tokio::test]
async fn lookups_filter_to_exact_client_ids() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/auth/admin/realms/m/clients");
			then.status(200).header("content-type", "application/json").body(
				"[{\"id\":\"1\",\"clientId\":\"app\"},{\"id\":\"2\",\"clientId\":\"app-admin\"}]",
			);
		})
		.await;

	let token = AccessToken::new("T", time::OffsetDateTime::now_utc(), 60);
	let records = idp()
		.list_clients(&endpoint(&server), &token, &realm("m"), &client("app"))
		.await
		.expect("Lookup should succeed.");

	assert_eq!(records.len(), 1);
	assert_eq!(records[0].internal_id, "1");
}

#[tokio::test]
async fn discovery_errors_carry_status_and_retry_hint() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/auth/realms/m/.well-known/openid-configuration");
			then.status(503).header("retry-after", "30");
		})
		.await;

	let err = idp()
		.fetch_discovery_document(&endpoint(&server), &realm("m"))
		.await
		.expect_err("Unavailable discovery must fail.");

	assert!(matches!(
		err,
		ProviderError::Status { status: 503, retry_after: Some(retry) } if retry == Duration::seconds(30)
	));
}

#[tokio::test]
async fn malformed_payloads_report_the_field_path() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/auth/realms/m/.well-known/openid-configuration");
			then.status(200).header("content-type", "application/json").body("{\"issuer\":42}");
		})
		.await;

	let err = idp()
		.fetch_discovery_document(&endpoint(&server), &realm("m"))
		.await
		.expect_err("Malformed discovery must fail.");
	let ProviderError::Transient(TransientError::ResponseParse { source, status }) = err else {
		panic!("Malformed discovery should surface as a parse failure.");
	};

	assert_eq!(source.path().to_string(), "issuer");
	assert_eq!(status, Some(200));
}
