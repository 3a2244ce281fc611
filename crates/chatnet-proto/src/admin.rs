//! Admin control plane: a second length-prefixed listener speaking JSON
//! `{command, params, timestamp}` requests against the registry and the
//! fault injector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::fault_injector::FaultInjector;
use crate::message::{Message, MessageType};
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::utils::{generate_msg_id, unix_timestamp};

#[derive(Debug, Deserialize)]
pub struct AdminRequest {
    pub command: String,
    #[serde(default)]
    pub params: Value,
    #[allow(dead_code)]
    pub timestamp: f64,
}

#[derive(Clone)]
pub struct AdminState {
    pub registry: Registry,
    pub dispatcher: Dispatcher,
    pub injector: Arc<FaultInjector>,
    pub metrics: Arc<Metrics>,
    pub shutdown: tokio::sync::watch::Sender<bool>,
}

/// Dispatches one decoded admin request to its handler, returning the
/// response payload. Never panics on malformed `params`: unknown shapes map
/// to `{"error": ...}` rather than a connection-closing failure.
pub async fn handle(state: &AdminState, req: AdminRequest) -> Value {
    match req.command.as_str() {
        "get_stats" => get_stats(state).await,
        "get_clients" => get_clients(state).await,
        "kick_client" => kick_client(state, &req.params).await,
        "broadcast" => broadcast(state, &req.params).await,
        "set_network_sim" => set_network_sim(state, &req.params),
        "shutdown" => shutdown(state),
        other => json!({ "error": format!("unknown command: {other}") }),
    }
}

async fn get_stats(state: &AdminState) -> Value {
    let mut client_details = HashMap::new();
    for conn in state.registry.snapshot() {
        let snap = conn.controller_snapshot();
        client_details.insert(
            conn.client_id.clone(),
            json!({
                "username": conn.username().await,
                "address": conn.remote_addr.to_string(),
                "congestion_window": snap.cwnd,
                "rto": snap.rto_secs,
                "pending_messages": snap.pending_messages,
                "state": format!("{:?}", snap.state),
            }),
        );
    }
    json!({
        "connected_clients": state.registry.len(),
        "total_messages": state.metrics.total_messages.load(std::sync::atomic::Ordering::Relaxed),
        "uptime": state.metrics.uptime_secs(),
        "bytes_transferred": state.metrics.bytes_transferred.load(std::sync::atomic::Ordering::Relaxed),
        "client_details": client_details,
    })
}

async fn get_clients(state: &AdminState) -> Value {
    let mut clients = Vec::new();
    for conn in state.registry.snapshot() {
        clients.push(json!({
            "id": conn.client_id,
            "username": conn.username().await,
            "address": conn.remote_addr.to_string(),
        }));
    }
    json!({ "clients": clients })
}

async fn kick_client(state: &AdminState, params: &Value) -> Value {
    let Some(client_id) = params.get("client_id").and_then(Value::as_str) else {
        return json!({ "error": "missing client_id" });
    };
    match state.registry.get(client_id) {
        Some(conn) => {
            let username = conn.username().await;
            state.registry.remove(client_id);
            conn.close().await;
            state.dispatcher.announce_departure(client_id, &username).await;
            info!(target: "chatnet::admin", "kicked {client_id}");
            json!({ "ok": true })
        }
        None => json!({ "error": format!("no such client: {client_id}") }),
    }
}

async fn broadcast(state: &AdminState, params: &Value) -> Value {
    let Some(message) = params.get("message").and_then(Value::as_str) else {
        return json!({ "error": "missing message" });
    };
    for conn in state.registry.others(None) {
        let msg = Message::new(
            generate_msg_id("admin"),
            MessageType::ServerInfo,
            "server",
            message.to_string(),
            unix_timestamp(),
            conn.next_sequence(),
        );
        conn.enqueue(msg).await;
    }
    json!({ "ok": true })
}

fn set_network_sim(state: &AdminState, params: &Value) -> Value {
    if let Some(rate) = params.get("packet_loss_rate").and_then(Value::as_f64) {
        state.injector.set_packet_loss_rate(rate);
    }
    if let Some(delay) = params.get("delay").and_then(Value::as_f64) {
        state
            .injector
            .set_artificial_delay(Duration::from_secs_f64(delay.max(0.0)));
    }
    json!({ "ok": true })
}

fn shutdown(state: &AdminState) -> Value {
    warn!(target: "chatnet::admin", "shutdown requested via admin surface");
    let _ = state.shutdown.send(true);
    json!({ "ok": true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AdminState {
        let registry = Registry::new();
        AdminState {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            injector: Arc::new(FaultInjector::default()),
            metrics: Arc::new(Metrics::default()),
            shutdown: tokio::sync::watch::channel(false).0,
        }
    }

    #[tokio::test]
    async fn unknown_command_reports_an_error() {
        let s = state();
        let resp = handle(
            &s,
            AdminRequest {
                command: "explode".into(),
                params: Value::Null,
                timestamp: 0.0,
            },
        )
        .await;
        assert!(resp.get("error").is_some());
    }

    #[tokio::test]
    async fn get_stats_reports_zero_clients_on_an_empty_registry() {
        let s = state();
        let resp = handle(
            &s,
            AdminRequest {
                command: "get_stats".into(),
                params: Value::Null,
                timestamp: 0.0,
            },
        )
        .await;
        assert_eq!(resp["connected_clients"], 0);
    }

    #[tokio::test]
    async fn set_network_sim_mutates_the_injector() {
        let s = state();
        let resp = handle(
            &s,
            AdminRequest {
                command: "set_network_sim".into(),
                params: json!({ "packet_loss_rate": 0.5, "delay": 0.25 }),
                timestamp: 0.0,
            },
        )
        .await;
        assert_eq!(resp["ok"], true);
        assert_eq!(s.injector.packet_loss_rate(), 0.5);
        assert_eq!(s.injector.artificial_delay(), Duration::from_millis(250));
    }
}
