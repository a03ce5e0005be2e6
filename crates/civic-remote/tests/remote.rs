//! The remote transport against an in-process platform server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use civic_remote::{RemoteConfig, RemoteTransport};
use civic_sync::{
    ConnectionStatus, SendMetadata, Subscription, SubscriptionEvent, SubscriptionFilter,
    SyncConfig, SyncEngine, TableQuery, Transport, TransportError,
};
use civic_types::api::RpcEnvelope;
use civic_types::events::{RealtimeCommand, RealtimeEvent};
use civic_types::models::{AuthorRole, Identity};

// -- Test server --

#[derive(Clone)]
struct Platform {
    inner: Arc<PlatformInner>,
}

struct PlatformInner {
    rows: Mutex<Vec<(String, Value)>>,
    inserts: broadcast::Sender<(String, Value)>,
    kicks: broadcast::Sender<()>,
    joins: AtomicUsize,
    next_id: AtomicUsize,
    auth: Mutex<Vec<String>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
    unavailable: AtomicBool,
}

impl Platform {
    fn new() -> Self {
        Self {
            inner: Arc::new(PlatformInner {
                rows: Mutex::new(Vec::new()),
                inserts: broadcast::channel(64).0,
                kicks: broadcast::channel(4).0,
                joins: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                auth: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Store a row the way the platform would and notify the socket.
    fn store(&self, table: &str, mut row: Value) {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        row["id"] = json!(format!("r{}", n));
        row["created_at"] = json!(format!("2026-01-01T10:00:{:02}Z", n));
        self.inner.rows.lock().unwrap().push((table.to_string(), row.clone()));
        let _ = self.inner.inserts.send((table.to_string(), row));
    }

    fn rows(&self, table: &str, column: &str, value: &str) -> Vec<Value> {
        self.inner
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, r)| t == table && r[column] == value)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        self.inner.auth.lock().unwrap().push(value);
    }
}

async fn rpc(
    State(platform): State<Platform>,
    Path(procedure): Path<String>,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> Json<RpcEnvelope> {
    platform.record_auth(&headers);
    let channel = params["channelId"].as_str().unwrap_or_default().to_string();
    let envelope = match procedure.as_str() {
        "get_complaint_messages" => RpcEnvelope::ok(Value::Array(platform.rows(
            "complaint_messages",
            "complaint_id",
            &channel,
        ))),
        "post_complaint_message" => {
            platform.store(
                "complaint_messages",
                json!({
                    "complaint_id": channel,
                    "message": params["content"],
                    "is_internal": params["isInternal"],
                    "sender_id": "u1",
                    "sender_name": "Uma Citizen",
                    "sender_role": "citizen",
                }),
            );
            RpcEnvelope::ok(json!({ "ok": true }))
        }
        other => RpcEnvelope::failed(format!("unknown procedure: {}", other)),
    };
    Json(envelope)
}

async fn rest_select(
    State(platform): State<Platform>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    platform.record_auth(&headers);
    if platform.inner.unavailable.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }
    platform.inner.queries.lock().unwrap().push(query.clone());

    let filter = query
        .iter()
        .find_map(|(k, v)| v.strip_prefix("eq.").map(|v| (k.clone(), v.to_string())));
    let rows = match filter {
        Some((column, value)) => platform.rows(&table, &column, &value),
        None => Vec::new(),
    };
    Json(Value::Array(rows)).into_response()
}

async fn rest_insert(
    State(platform): State<Platform>,
    Path(table): Path<String>,
    Json(row): Json<Value>,
) -> StatusCode {
    platform.store(&table, row);
    StatusCode::CREATED
}

async fn realtime(ws: WebSocketUpgrade, State(platform): State<Platform>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, platform))
}

async fn serve_socket(socket: WebSocket, platform: Platform) {
    let (mut tx, mut rx) = socket.split();
    let mut inserts = platform.inner.inserts.subscribe();
    let mut kicks = platform.inner.kicks.subscribe();
    let mut joined: HashMap<String, (String, String, String)> = HashMap::new();

    async fn send(
        tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
        event: &RealtimeEvent,
    ) -> bool {
        let text = serde_json::to_string(event).unwrap();
        tx.send(Message::Text(text.into())).await.is_ok()
    }

    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<RealtimeCommand>(text.as_str()) {
                        Ok(RealtimeCommand::Join { topic, table, filter_column, filter_value }) => {
                            platform.inner.joins.fetch_add(1, Ordering::SeqCst);
                            joined.insert(topic.clone(), (table, filter_column, filter_value));
                            Some(RealtimeEvent::JoinAck { topic })
                        }
                        Ok(RealtimeCommand::Leave { topic }) => {
                            joined.remove(&topic);
                            None
                        }
                        Ok(RealtimeCommand::Heartbeat) => Some(RealtimeEvent::HeartbeatAck),
                        Err(_) => None,
                    };
                    if let Some(reply) = reply {
                        if !send(&mut tx, &reply).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            Ok((table, record)) = inserts.recv() => {
                for (topic, (t, column, value)) in &joined {
                    if *t == table && record[column.as_str()] == value.as_str() {
                        let event = RealtimeEvent::Insert {
                            topic: topic.clone(),
                            table: table.clone(),
                            record: Some(record.clone()),
                        };
                        if !send(&mut tx, &event).await {
                            return;
                        }
                    }
                }
            }
            Ok(()) = kicks.recv() => break,
        }
    }
}

async fn start() -> (Platform, RemoteConfig) {
    let platform = Platform::new();
    let app = Router::new()
        .route("/rpc/{procedure}", post(rpc))
        .route("/rest/{table}", get(rest_select).post(rest_insert))
        .route("/realtime", get(realtime))
        .with_state(platform.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = RemoteConfig::new(&format!("http://{}", addr));
    config.api_key = Some("test-key".into());
    config.reconnect_base = Duration::from_millis(20);
    config.reconnect_max = Duration::from_millis(100);
    (platform, config)
}

async fn next_event(sub: &mut Subscription) -> SubscriptionEvent {
    tokio::time::timeout(Duration::from_secs(2), sub.events.recv())
        .await
        .expect("no event within 2s")
        .expect("subscription ended")
}

fn dm_filter(conversation: &str) -> SubscriptionFilter {
    SubscriptionFilter {
        table: "direct_messages".into(),
        column: "conversation_id".into(),
        value: conversation.into(),
    }
}

// -- Tests --

#[tokio::test]
async fn procedure_calls_carry_the_bearer_token() {
    let (platform, config) = start().await;
    let transport = RemoteTransport::new(config);

    let envelope = transport
        .call("get_complaint_messages", json!({ "channelId": "C-1" }))
        .await
        .unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.data, Some(json!([])));

    let refused = transport.call("close_complaint", json!({})).await.unwrap();
    assert!(!refused.success);

    assert_eq!(platform.inner.auth.lock().unwrap()[0], "Bearer test-key");
}

#[tokio::test]
async fn select_filters_and_orders_by_query_string() {
    let (platform, config) = start().await;
    platform.store("direct_messages", json!({ "conversation_id": "D-1", "content": "one" }));
    platform.store("direct_messages", json!({ "conversation_id": "D-2", "content": "two" }));
    let transport = RemoteTransport::new(config);

    let rows = transport
        .select(&TableQuery {
            table: "direct_messages".into(),
            select: "*".into(),
            filter_column: "conversation_id".into(),
            filter_value: "D-1".into(),
            order_column: "created_at".into(),
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["content"], "one");

    let queries = platform.inner.queries.lock().unwrap();
    assert_eq!(queries[0]["order"], "created_at.asc");
    assert_eq!(queries[0]["select"], "*");
}

#[tokio::test]
async fn http_failures_become_status_errors() {
    let (platform, config) = start().await;
    platform.inner.unavailable.store(true, Ordering::SeqCst);
    let transport = RemoteTransport::new(config);

    let err = transport
        .select(&TableQuery {
            table: "official_notes".into(),
            select: "*".into(),
            filter_column: "complaint_id".into(),
            filter_value: "C-1".into(),
            order_column: "created_at".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TransportError::Status {
            status: 503,
            body: "maintenance".into()
        }
    );
}

#[tokio::test]
async fn unreachable_platform_is_a_network_error() {
    let transport = RemoteTransport::new(RemoteConfig::new("http://127.0.0.1:9"));
    let err = transport
        .call("get_complaint_messages", json!({ "channelId": "C-1" }))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
}

#[tokio::test]
async fn subscription_delivers_matching_inserts() {
    let (_platform, config) = start().await;
    let transport = RemoteTransport::new(config);

    let mut sub = transport.subscribe(dm_filter("D-1")).await.unwrap();
    assert_eq!(next_event(&mut sub).await, SubscriptionEvent::Established);

    transport
        .insert("direct_messages", json!({ "conversation_id": "D-2", "content": "elsewhere" }))
        .await
        .unwrap();
    transport
        .insert("direct_messages", json!({ "conversation_id": "D-1", "content": "hi" }))
        .await
        .unwrap();

    match next_event(&mut sub).await {
        SubscriptionEvent::Insert { table, record } => {
            assert_eq!(table, "direct_messages");
            assert_eq!(record.unwrap()["content"], "hi");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn dropped_socket_reconnects_and_rejoins() {
    let (platform, config) = start().await;
    let transport = RemoteTransport::new(config);

    let mut sub = transport.subscribe(dm_filter("D-1")).await.unwrap();
    assert_eq!(next_event(&mut sub).await, SubscriptionEvent::Established);

    platform.inner.kicks.send(()).unwrap();
    assert!(matches!(next_event(&mut sub).await, SubscriptionEvent::Closed { .. }));
    assert_eq!(next_event(&mut sub).await, SubscriptionEvent::Reconnecting);
    assert_eq!(next_event(&mut sub).await, SubscriptionEvent::Established);
    assert_eq!(platform.inner.joins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unsubscribe_ends_the_event_stream() {
    let (_platform, config) = start().await;
    let transport = RemoteTransport::new(config);

    let mut sub = transport.subscribe(dm_filter("D-1")).await.unwrap();
    assert_eq!(next_event(&mut sub).await, SubscriptionEvent::Established);

    transport.unsubscribe(sub.id).await.unwrap();
    let ended = tokio::time::timeout(Duration::from_secs(2), sub.events.recv())
        .await
        .unwrap();
    assert!(ended.is_none());
}

#[tokio::test]
async fn engine_syncs_over_the_network() {
    let (platform, config) = start().await;
    let transport = Arc::new(RemoteTransport::new(config));
    let engine = SyncEngine::new(
        transport,
        Identity {
            user_id: "u1".into(),
            display_name: "Uma Citizen".into(),
            role: AuthorRole::Citizen,
            avatar: None,
        },
        SyncConfig::default(),
    );

    engine.attach("COMPLAINT_PUBLIC", "C-1").await.unwrap();
    engine.send("Pothole on 5th", SendMetadata::default()).await.unwrap();
    assert_eq!(engine.messages().len(), 1);
    assert_eq!(engine.messages()[0].author_name, "Uma Citizen");

    let mut rx = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(2), async {
        while rx.borrow_and_update().status != ConnectionStatus::Connected {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    // A reply written by someone else arrives by push
    platform.store(
        "complaint_messages",
        json!({
            "complaint_id": "C-1",
            "message": "Crew on the way",
            "sender_id": "s1",
            "sender_name": "Sam Staff",
            "sender_role": "staff",
        }),
    );
    tokio::time::timeout(Duration::from_secs(2), async {
        while rx.borrow_and_update().messages.len() < 2 {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let messages = engine.messages();
    assert_eq!(messages[1].content, "Crew on the way");
    assert_eq!(messages[1].author_role, AuthorRole::Staff);
}
