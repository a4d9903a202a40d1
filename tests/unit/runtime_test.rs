//! Tests for the scenario runtime

use distress_bridge::builders::RuntimeBuilder;
use distress_bridge::config::BridgeConfig;
use distress_bridge::core::{BridgeError, Connection, PoolError};
use distress_bridge::infra::{InMemoryTelemetrySink, ScriptedTransport};

fn runtime() -> distress_bridge::runtime::ScenarioRuntime {
    RuntimeBuilder::new(BridgeConfig::default())
        .with_worker_count(2)
        .with_guard("websocket", 4)
        .with_sink(InMemoryTelemetrySink::new(64))
        .build()
        .unwrap()
}

#[test]
fn test_contexts_are_distinct() {
    let rt = runtime();
    let a = rt.new_context();
    let b = rt.new_context();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_missing_guard_is_reported() {
    let rt = runtime();
    assert!(rt.guard("udp").is_none());
    assert!(matches!(rt.require_guard("udp"), Err(PoolError::InvalidConfig(_))));
}

#[test]
fn test_spawned_script_returns_value() {
    let rt = runtime();
    let guard = rt.require_guard("websocket").unwrap().clone();
    let task = rt
        .spawn("echo", move |ctx| {
            let (transport, server) = ScriptedTransport::pair();
            server.push_message("pong");
            let conn = ctx.wait(Connection::dial(ctx, &guard, "ws://echo", move |_| Ok(transport)))?;
            ctx.wait(conn.write(ctx, "ping"))?;
            let reply = ctx.wait(conn.read(ctx))?;
            ctx.wait(conn.close(ctx))?;
            Ok(reply)
        })
        .unwrap();
    assert_eq!(task.join().unwrap(), b"pong");
    assert_eq!(rt.guard("websocket").unwrap().held(), 0);
    rt.shutdown();
}

#[test]
fn test_script_panic_is_reported() {
    let rt = runtime();
    let task = rt
        .spawn("boom", |_ctx| -> Result<(), BridgeError> { panic!("script bug") })
        .unwrap();
    assert!(matches!(task.join(), Err(BridgeError::Panicked(_))));
    rt.shutdown();
}

#[test]
fn test_operations_after_shutdown_fail() {
    let rt = runtime();
    let ctx = rt.new_context();
    let pool = rt.pool().clone();
    rt.shutdown();
    assert!(pool.is_shutdown());
    assert!(matches!(
        ctx.wait(ctx.schedule(|| Ok(1))),
        Err(BridgeError::Pool(PoolError::PoolShutdown))
    ));
}
