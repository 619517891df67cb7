//! Client lifecycle: lazy initialization, close and the instance registry.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pgkit::{ClientConfig, ClientEvent, ClientState, Dialect, PgKitError, Schema};

use common::{client_with, ScriptedBackend};

#[tokio::test]
async fn test_concurrent_first_queries_initialize_once() {
    let backend = ScriptedBackend::new();
    backend.set_init_delay(Duration::from_millis(20));
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.execute_query(&format!("SELECT {}", i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.query_count(), 8);
    assert_eq!(client.state(), ClientState::Initialized);
}

#[tokio::test]
async fn test_failed_initialization_returns_to_new() {
    let backend = ScriptedBackend::new();
    backend.fail_next_inits(1);
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    let err = client.execute_query("SELECT 1").await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(client.state(), ClientState::New);
    assert_eq!(backend.query_count(), 0);

    client.execute_query("SELECT 1").await.unwrap();
    assert_eq!(backend.init_calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.state(), ClientState::Initialized);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    client.execute_query("SELECT 1").await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();

    assert_eq!(backend.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn test_close_before_any_query_is_a_noop() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    client.close().await.unwrap();

    assert_eq!(backend.close_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.init_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_after_close_fails() {
    let backend = ScriptedBackend::new();
    let (client, _registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());

    client.execute_query("SELECT 1").await.unwrap();
    client.close().await.unwrap();

    let err = client.execute_query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, PgKitError::Connection { .. }));
    assert_eq!(backend.query_count(), 1);
}

#[tokio::test]
async fn test_registry_tracks_and_closes_clients() {
    let backend = ScriptedBackend::new();
    let (client, registry) = client_with(backend.clone(), Dialect::Postgres, Schema::new(), ClientConfig::new());
    let id = client.registry_id().unwrap();
    assert!(registry.contains(id));

    client.execute_query("SELECT 1").await.unwrap();
    assert_eq!(registry.close_all().await, 1);

    assert_eq!(backend.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ClientState::Closed);
    assert!(!registry.contains(id));
}

#[tokio::test]
async fn test_explicit_close_unregisters() {
    let backend = ScriptedBackend::new();
    let (client, registry) = client_with(backend, Dialect::Postgres, Schema::new(), ClientConfig::new());
    let id = client.registry_id().unwrap();

    client.close().await.unwrap();

    assert!(!registry.contains(id));
    assert_eq!(registry.close_all().await, 0);
}

#[tokio::test]
async fn test_dropped_client_leaves_registry() {
    let backend = ScriptedBackend::new();
    let (client, registry) = client_with(backend, Dialect::Postgres, Schema::new(), ClientConfig::new());
    assert_eq!(registry.len(), 1);

    drop(client);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_backend_close_event_reaches_subscribers() {
    let backend = ScriptedBackend::new();
    let events = pgkit::EventBus::new();
    let registry = std::sync::Arc::new(pgkit::InstanceRegistry::new());
    let client = pgkit::Client::with_backend(
        Schema::new(),
        Dialect::Postgres,
        ClientConfig::new(),
        backend,
        events.clone(),
        registry,
    );
    let mut receiver = client.events();

    events.emit(ClientEvent::End);
    assert!(matches!(receiver.recv().await.unwrap(), ClientEvent::End));
}
