// std
use std::{env, fs, process, sync::Arc};
// crates.io
use time::{OffsetDateTime, macros};
// self
use iam_secret_broker::{
	auth::{ClientId, RealmId, Secret},
	broker::Broker,
	clock::ManualClock,
	config::{ConnectionConfigInput, Scope},
	context::RequestContext,
	error::{Error, ValidationError},
	idp::ScriptedIdentityProvider,
	obs::Operation,
	settings::BrokerSettings,
	store::{FileStorage, MemoryStorage},
};

const START: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

fn broker(idp: &Arc<ScriptedIdentityProvider>, storage: Arc<MemoryStorage>) -> Broker {
	Broker::with_clock(
		storage,
		idp.clone(),
		Arc::new(ManualClock::new(START)),
		BrokerSettings::default(),
	)
}

fn input(realm: Option<&str>, client: &str, secret: &str) -> ConnectionConfigInput {
	ConnectionConfigInput {
		server_url: Some("http://x".into()),
		realm: realm.map(Into::into),
		client_id: Some(client.into()),
		client_secret: Some(Secret::new(secret)),
		..Default::default()
	}
}

fn unchecked(realm: Option<&str>, client: &str, secret: &str) -> ConnectionConfigInput {
	ConnectionConfigInput { ignore_connectivity_check: true, ..input(realm, client, secret) }
}

fn realm_scope(value: &str) -> Scope {
	Scope::Realm(RealmId::new(value).expect("Realm fixture should be valid."))
}

#[tokio::test]
async fn missing_fields_reject_the_write() {
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let storage = Arc::new(MemoryStorage::default());
	let broker = broker(&idp, storage.clone());
	let mut payload = unchecked(Some("m"), "vault", "s");

	payload.client_secret = None;

	let err = broker
		.write_config(&RequestContext::new(), &Scope::Default, payload)
		.await
		.expect_err("Missing secret must be rejected.");

	assert!(matches!(
		err,
		Error::Validation(ValidationError::MissingField { field: "client_secret" })
	));
	assert_eq!(err.to_string(), "Missing client_secret.");
	assert!(storage.is_empty());
	assert_eq!(idp.call_count(Operation::Authenticate), 0);
}

#[tokio::test]
async fn failed_probe_rejects_the_write_unless_bypassed() {
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let storage = Arc::new(MemoryStorage::default());
	let broker = broker(&idp, storage.clone());
	let ctx = RequestContext::new();
	let err = broker
		.write_config(&ctx, &Scope::Default, input(Some("m"), "vault", "wrong"))
		.await
		.expect_err("Probe failure must reject the write.");

	assert!(matches!(err, Error::ConnectivityCheckFailed { .. }));
	assert!(storage.is_empty());

	broker
		.write_config(&ctx, &Scope::Default, unchecked(Some("m"), "vault", "wrong"))
		.await
		.expect("Bypassed probe should allow the write.");

	assert!(storage.contains("config/connection"));
	assert_eq!(idp.call_count(Operation::Authenticate), 1);
}

#[tokio::test]
async fn probe_login_is_not_cached() {
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let broker = broker(&idp, Arc::new(MemoryStorage::default()));
	let ctx = RequestContext::new();

	idp.register_account("m", "vault", "s", 60)
		.register_client("m", "target", "1", Some("v"))
		.register_issuer("m", "http://x/realms/m");
	broker
		.write_config(&ctx, &Scope::Default, input(Some("m"), "vault", "s"))
		.await
		.expect("Probe should succeed.");

	assert!(broker.sessions().is_empty());

	broker
		.client_secret(&ctx, &ClientId::new("target").expect("Client fixture should be valid."))
		.await
		.expect("Resolution should succeed.");

	assert_eq!(idp.call_count(Operation::Authenticate), 2);
}

#[tokio::test]
async fn realm_scopes_are_isolated() {
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let broker = broker(&idp, Arc::new(MemoryStorage::default()));
	let ctx = RequestContext::new();
	let realm_a = realm_scope("realm-a");
	let realm_b = realm_scope("realm-b");

	broker
		.write_config(&ctx, &realm_a, unchecked(None, "client-a", "secret-a"))
		.await
		.expect("realm-a write should succeed.");
	broker
		.write_config(&ctx, &realm_b, unchecked(None, "client-b", "secret-b"))
		.await
		.expect("realm-b write should succeed.");

	let a = broker
		.read_config(&realm_a)
		.await
		.expect("Read should succeed.")
		.expect("realm-a configuration expected.");
	let b = broker
		.read_config(&realm_b)
		.await
		.expect("Read should succeed.")
		.expect("realm-b configuration expected.");

	assert_eq!((a.realm.as_ref(), a.client_id.as_ref(), a.client_secret.expose()), (
		"realm-a", "client-a", "secret-a"
	));
	assert_eq!((b.realm.as_ref(), b.client_id.as_ref(), b.client_secret.expose()), (
		"realm-b", "client-b", "secret-b"
	));
	assert_eq!(broker.read_config(&Scope::Default).await.expect("Read should succeed."), None);
}

#[tokio::test]
async fn realm_scope_rejects_conflicting_payload_realm() {
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let storage = Arc::new(MemoryStorage::default());
	let broker = broker(&idp, storage.clone());
	let payload = unchecked(Some("realm-b"), "c", "s");
	let err = broker
		.write_config(&RequestContext::new(), &realm_scope("realm-a"), payload)
		.await
		.expect_err("Conflicting realm must be rejected.");

	assert!(matches!(err, Error::Validation(ValidationError::RealmMismatch { .. })));
	assert!(storage.is_empty());
}

#[tokio::test]
async fn overwrite_and_delete_drop_cached_sessions() {
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let broker = broker(&idp, Arc::new(MemoryStorage::default()));
	let ctx = RequestContext::new();
	let target = ClientId::new("target").expect("Client fixture should be valid.");

	idp.register_account("m", "vault", "s", 60)
		.register_client("m", "target", "1", Some("v"))
		.register_issuer("m", "http://x/realms/m");
	broker
		.write_config(&ctx, &Scope::Default, unchecked(Some("m"), "vault", "s"))
		.await
		.expect("Write should succeed.");
	broker.client_secret(&ctx, &target).await.expect("Resolution should succeed.");

	assert_eq!(broker.sessions().len(), 1);

	idp.register_account("m", "vault", "rotated", 60);
	broker
		.write_config(&ctx, &Scope::Default, unchecked(Some("m"), "vault", "rotated"))
		.await
		.expect("Overwrite should succeed.");

	assert!(broker.sessions().is_empty());

	broker.client_secret(&ctx, &target).await.expect("Resolution should succeed.");
	broker.delete_config(&Scope::Default).await.expect("Delete should succeed.");

	assert!(broker.sessions().is_empty());
	assert_eq!(broker.read_config(&Scope::Default).await.expect("Read should succeed."), None);
	assert!(matches!(
		broker.client_secret(&ctx, &target).await,
		Err(Error::ConfigurationMissing { .. })
	));
	assert_eq!(idp.call_count(Operation::Authenticate), 2);
}

#[tokio::test]
async fn file_storage_survives_restart() {
	let path = env::temp_dir().join(format!(
		"iam_secret_broker_config_it_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	));
	let idp = Arc::new(ScriptedIdentityProvider::new());
	let ctx = RequestContext::new();

	{
		let storage = FileStorage::open(&path).expect("File storage should open.");
		let broker = Broker::new(Arc::new(storage), idp.clone(), BrokerSettings::default());

		broker
			.write_config(&ctx, &Scope::Default, unchecked(Some("m"), "vault", "s"))
			.await
			.expect("Write should succeed.");
	}

	let storage = FileStorage::open(&path).expect("File storage should reopen.");
	let broker = Broker::new(Arc::new(storage), idp, BrokerSettings::default());
	let config = broker
		.read_config(&Scope::Default)
		.await
		.expect("Read should succeed.")
		.expect("Configuration should survive reopen.");

	assert_eq!(config.client_secret.expose(), "s");

	fs::remove_file(&path).expect("Temporary snapshot should be removable.");
}
