//! Registry dispatch: authorization gate, success/failure routing, replies
//! and the standard action catalogue.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use action_protocol::core::envelope::Envelope;
use action_protocol::core::packet::{Packet, PacketInstance};
use action_protocol::core::schema::FieldDecl;
use action_protocol::error::{ProtocolError, Result};
use action_protocol::protocol::actions::authorize::CredentialStore;
use action_protocol::protocol::actions::info::StaticInfo;
use action_protocol::protocol::actions::updater::UpdateHandler;
use action_protocol::protocol::actions::Catalogue;
use action_protocol::protocol::{
    AccessLevel, ActionBehavior, ActionDescriptor, ActionRegistry, AuthItem, AuthState, Session,
};
use action_protocol::transport::memory::MemorySession;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

fn envelope(doc: Value) -> Envelope {
    Envelope::from_document(doc).unwrap()
}

async fn next_document(registry: &ActionRegistry, outbound: &mut UnboundedReceiver<Packet>) -> Value {
    match outbound.recv().await.expect("reply expected") {
        Packet::Action(instance) => registry.encode(instance).await.unwrap(),
        Packet::Unrecognized(raw) => raw.into_data(),
    }
}

fn standard_registry() -> ActionRegistry {
    let registry = ActionRegistry::new();
    Catalogue::new()
        .with_info(Arc::new(StaticInfo::new("1.2.3").with_commit("abc123")))
        .with_credentials(Arc::new(FixedCredentials))
        .with_updates(Arc::new(AcceptUpdates))
        .register(&registry)
        .unwrap();
    registry
}

struct FixedCredentials;

#[async_trait]
impl CredentialStore for FixedCredentials {
    async fn authenticate(&self, username: &str, key: &str) -> Result<Option<AuthItem>> {
        Ok((username == "ops" && key == "secret")
            .then(|| AuthItem::new("ops", AccessLevel::AuthorizedUser).with_id("1")))
    }

    async fn retrieve_by_credentials(&self, credentials: &Value) -> Result<Option<AuthItem>> {
        Ok(AuthItem::from_map(credentials))
    }
}

struct AcceptUpdates;

#[async_trait]
impl UpdateHandler for AcceptUpdates {
    async fn request_update(&self, _session: &Arc<dyn Session>) -> Result<Option<String>> {
        Ok(Some("update scheduled".to_string()))
    }
}

#[tokio::test]
async fn test_gated_action_rejects_guest_before_fields() {
    let touched = Arc::new(AtomicBool::new(false));
    let flag = touched.clone();

    let registry = ActionRegistry::new();
    registry
        .register(
            ActionDescriptor::builder("secret.read")
                .access(AccessLevel::AuthorizedUser)
                .field_decl(FieldDecl::new("path", "string|required").deserialize_with(
                    move |value, _packet| {
                        flag.store(true, Ordering::SeqCst);
                        async move { Ok(value) }.boxed()
                    },
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let (session, mut outbound) = MemorySession::new("guest");
    let err = registry
        .dispatch(session, envelope(json!({"action": "secret.read", "data": {"path": "/etc"}})))
        .await
        .unwrap_err();

    assert!(matches!(err, ProtocolError::AuthorizationRequired));
    assert!(!touched.load(Ordering::SeqCst));
    assert!(outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_insufficient_level_names_required_level() {
    let registry = ActionRegistry::new();
    registry
        .register(
            ActionDescriptor::builder("system.halt")
                .access(AccessLevel::AuthorizedSystem)
                .build()
                .unwrap(),
        )
        .unwrap();

    let (session, _outbound) = MemorySession::authorized(
        "user",
        AuthState::authorized(AuthItem::new("ops", AccessLevel::AuthorizedUser)),
    );
    let err = registry
        .dispatch(session, envelope(json!({"action": "system.halt", "data": {}})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::AuthorizationInsufficient(AccessLevel::AuthorizedSystem)
    ));
}

#[tokio::test]
async fn test_ping_replies_with_pong_echoing_time() {
    let registry = standard_registry();
    let (session, mut outbound) = MemorySession::new("s1");

    let packet = registry
        .dispatch(session, envelope(json!({"action": "ping", "data": {"time": "12.5"}})))
        .await
        .unwrap();
    assert!(packet.is_handled_successfully());
    assert!(packet.errors().is_empty());

    let reply = next_document(&registry, &mut outbound).await;
    assert_eq!(reply, json!({"action": "pong", "data": {"time": 12.5}}));
}

#[tokio::test]
async fn test_missing_required_field_takes_failure_branch() {
    let registry = standard_registry();
    let (session, mut outbound) = MemorySession::new("s1");

    let mut packet = registry
        .dispatch(session, envelope(json!({"action": "ping"})))
        .await
        .unwrap();

    assert!(!packet.is_handled_successfully());
    match packet.take_handle_error() {
        Some(ProtocolError::Validation { field, rule }) => {
            assert_eq!(field, "time");
            assert_eq!(rule, "required");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(outbound.try_recv().is_err());
}

struct Flaky {
    fail_in_failure_branch: bool,
}

#[async_trait]
impl ActionBehavior for Flaky {
    async fn on_success(&self, _packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        Err(ProtocolError::Custom("success branch broke".to_string()))
    }

    async fn on_failure(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        if self.fail_in_failure_branch {
            return Err(ProtocolError::Custom("failure branch broke".to_string()));
        }
        let mut pong = packet.reply("pong")?;
        pong.set_field("time", json!(1.0))?;
        Ok(Some(pong))
    }
}

fn flaky_registry(fail_in_failure_branch: bool) -> ActionRegistry {
    let registry = standard_registry();
    registry
        .register(
            ActionDescriptor::builder("flaky")
                .behavior(Flaky {
                    fail_in_failure_branch,
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn test_success_error_reroutes_to_failure_branch() {
    let registry = flaky_registry(false);
    let (session, mut outbound) = MemorySession::new("s1");

    let packet = registry
        .dispatch(session, envelope(json!({"action": "flaky", "data": {}})))
        .await
        .unwrap();

    assert!(!packet.is_handled_successfully());
    assert_eq!(packet.errors().len(), 1);
    let reply = next_document(&registry, &mut outbound).await;
    assert_eq!(reply["action"], "pong");
}

#[tokio::test]
async fn test_failure_branch_error_is_recorded_and_swallowed() {
    let registry = flaky_registry(true);
    let (session, mut outbound) = MemorySession::new("s1");

    let mut packet = registry
        .dispatch(session, envelope(json!({"action": "flaky", "data": {}})))
        .await
        .unwrap();

    match packet.take_handle_error() {
        Some(ProtocolError::Multiple(causes)) => {
            assert_eq!(causes.len(), 2);
            assert!(causes[0].to_string().contains("success branch broke"));
            assert!(causes[1].to_string().contains("failure branch broke"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_reply_send_failure_attaches_to_packet() {
    let registry = standard_registry();
    let (session, _outbound) = MemorySession::new("s1");
    session.disconnect();

    let packet = registry
        .dispatch(session, envelope(json!({"action": "ping", "data": {"time": 3.0}})))
        .await
        .unwrap();

    assert!(packet.is_handled_successfully());
    assert!(matches!(packet.errors(), [ProtocolError::ConnectionClosed]));
}

#[tokio::test]
async fn test_info_request_replies_with_local_identity() {
    let registry = standard_registry();
    let (session, mut outbound) = MemorySession::new("s1");

    registry
        .dispatch(
            session,
            envelope(json!({"action": "info.request", "data": {"version": "0.9.0", "git_commit_hash": null}})),
        )
        .await
        .unwrap();

    let reply = next_document(&registry, &mut outbound).await;
    assert_eq!(
        reply,
        json!({"action": "info.response", "data": {"version": "1.2.3", "git_commit_hash": "abc123"}})
    );
}

#[tokio::test]
async fn test_info_without_version_sends_undefined() {
    let registry = ActionRegistry::new();
    Catalogue::new().register(&registry).unwrap();
    let (session, _outbound) = MemorySession::new("s1");

    let request = registry.create_packet(session, "info.request").unwrap();
    let doc = registry.encode(request).await.unwrap();
    assert_eq!(doc["data"]["version"], "UNDEFINED");
    assert_eq!(doc["data"]["git_commit_hash"], Value::Null);
}

#[tokio::test]
async fn test_authorize_marks_session_and_unlocks_gated_actions() {
    let registry = standard_registry();
    let (session, mut outbound) = MemorySession::new("s1");

    let err = registry
        .dispatch(session.clone(), envelope(json!({"action": "updater.request", "data": {}})))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::AuthorizationRequired));

    registry
        .dispatch(
            session.clone(),
            envelope(json!({"action": "authorize.request", "data": {"username": "ops", "key": "secret"}})),
        )
        .await
        .unwrap();
    assert!(session.auth_state().is_authorized());

    let reply = next_document(&registry, &mut outbound).await;
    assert_eq!(reply["action"], "authorize.response");
    assert_eq!(reply["data"]["authItem"]["username"], "ops");
    assert_eq!(reply["data"]["authItem"]["accessLevel"], "authorized_user");

    registry
        .dispatch(session, envelope(json!({"action": "updater.request", "data": {}})))
        .await
        .unwrap();
    let reply = next_document(&registry, &mut outbound).await;
    assert_eq!(
        reply,
        json!({"action": "updater.response", "data": {"status": true, "message": "update scheduled"}})
    );
}

#[tokio::test]
async fn test_rejected_credentials_reply_null_item() {
    let registry = standard_registry();
    let (session, mut outbound) = MemorySession::new("s1");

    registry
        .dispatch(
            session.clone(),
            envelope(json!({"action": "authorize.request", "data": {"username": "ops", "key": "wrong"}})),
        )
        .await
        .unwrap();

    assert!(!session.auth_state().is_authorized());
    let reply = next_document(&registry, &mut outbound).await;
    assert_eq!(reply["data"]["authItem"], Value::Null);
}

#[tokio::test]
async fn test_authorize_response_resolves_item_through_store() {
    let registry = standard_registry();
    let (session, _outbound) = MemorySession::new("s1");

    let packet = registry
        .dispatch(
            session,
            envelope(json!({
                "action": "authorize.response",
                "data": {"authItem": {"id": "1", "username": "ops", "accessLevel": "authorized_user"}}
            })),
        )
        .await
        .unwrap();

    assert!(packet.is_handled_successfully());
    let item = AuthItem::from_map(packet.value("authItem").unwrap()).unwrap();
    assert_eq!(item.access_level, AccessLevel::AuthorizedUser);
}

#[test]
fn test_catalogue_registered_twice_is_fatal() {
    let registry = ActionRegistry::new();
    Catalogue::new().register(&registry).unwrap();
    let err = Catalogue::new().register(&registry).unwrap_err();
    assert!(err.is_configuration());
    assert!(registry.contains("updater.response"));
}

#[tokio::test]
async fn test_remote_packet_must_be_cloned_before_sending() {
    let registry = standard_registry();
    let (session, mut outbound) = MemorySession::new("s1");

    let packet = registry
        .dispatch(session, envelope(json!({"action": "pong", "data": {"time": 9.0}})))
        .await
        .unwrap();
    let local = packet.to_local();

    assert!(matches!(
        packet.send().await,
        Err(ProtocolError::RemotePacket(_))
    ));
    local.send().await.unwrap();
    let doc = next_document(&registry, &mut outbound).await;
    assert_eq!(doc, json!({"action": "pong", "data": {"time": 9.0}}));
}
