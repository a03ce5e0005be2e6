//! One realtime socket shared by every subscription of a transport.
//!
//! The socket task owns the topic table. It reconnects forever with capped
//! exponential backoff and rejoins every live topic on each new connection.
//! Subscribers only ever see `Reconnecting`, `Established`, `Insert` and
//! `Closed`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use civic_sync::{Subscription, SubscriptionEvent, SubscriptionFilter, SubscriptionId, TransportError};
use civic_types::events::{RealtimeCommand, RealtimeEvent};

use crate::config::{RemoteConfig, compute_backoff};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;

/// Handle to the socket task. Dropping it shuts the task down.
pub struct RealtimeClient {
    control: mpsc::UnboundedSender<Control>,
    next_id: AtomicU64,
}

enum Control {
    Join {
        id: u64,
        filter: SubscriptionFilter,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
    },
    Leave {
        id: u64,
    },
}

impl RealtimeClient {
    /// Spawn the socket task. Must be called inside a tokio runtime.
    pub fn start(config: RemoteConfig) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(config, control_rx));
        Self {
            control,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn join(&self, filter: SubscriptionFilter) -> Result<Subscription, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (events, rx) = mpsc::unbounded_channel();
        self.control
            .send(Control::Join { id, filter, events })
            .map_err(|_| TransportError::Closed)?;
        Ok(Subscription {
            id: SubscriptionId(id),
            events: rx,
        })
    }

    pub fn leave(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.control
            .send(Control::Leave { id: id.0 })
            .map_err(|_| TransportError::Closed)
    }
}

/// Live subscriptions, grouped by topic so a topic is joined once.
#[derive(Default)]
struct Topics {
    subscribers: HashMap<u64, Subscriber>,
    /// Topics the server has acknowledged on the current socket.
    acked: HashSet<String>,
}

struct Subscriber {
    topic: String,
    filter: SubscriptionFilter,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl Topics {
    /// Adds a subscriber. Returns true if its topic was not joined yet.
    fn add(&mut self, id: u64, filter: SubscriptionFilter, events: mpsc::UnboundedSender<SubscriptionEvent>) -> bool {
        let topic = filter.topic();
        let fresh = !self.has_topic(&topic);
        self.subscribers.insert(id, Subscriber { topic, filter, events });
        fresh
    }

    /// Adds a subscriber and returns the join to send if its topic is new.
    /// A subscriber joining a topic the server already acknowledged is told
    /// straight away; otherwise it waits for the ack with the others.
    fn join(
        &mut self,
        id: u64,
        filter: SubscriptionFilter,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Option<RealtimeCommand> {
        let join = join_command(&filter);
        let topic = filter.topic();
        if self.add(id, filter, events) {
            return Some(join);
        }
        if self.acked.contains(&topic) {
            self.notify_one(id, SubscriptionEvent::Established);
        }
        None
    }

    /// Removes a subscriber. Returns its topic if nobody else listens to it.
    fn remove(&mut self, id: u64) -> Option<String> {
        let gone = self.subscribers.remove(&id)?;
        if self.has_topic(&gone.topic) {
            return None;
        }
        self.acked.remove(&gone.topic);
        Some(gone.topic)
    }

    fn acknowledge(&mut self, topic: &str) {
        self.acked.insert(topic.to_string());
    }

    fn forget_ack(&mut self, topic: &str) {
        self.acked.remove(topic);
    }

    /// A new socket starts with nothing acknowledged.
    fn reset_acks(&mut self) {
        self.acked.clear();
    }

    fn has_topic(&self, topic: &str) -> bool {
        self.subscribers.values().any(|s| s.topic == topic)
    }

    /// One join command per distinct topic.
    fn joins(&self) -> Vec<RealtimeCommand> {
        let mut seen = HashMap::new();
        for s in self.subscribers.values() {
            seen.entry(s.topic.clone()).or_insert_with(|| join_command(&s.filter));
        }
        seen.into_values().collect()
    }

    fn notify_one(&self, id: u64, event: SubscriptionEvent) {
        if let Some(s) = self.subscribers.get(&id) {
            let _ = s.events.send(event);
        }
    }

    fn notify_topic(&self, topic: &str, event: SubscriptionEvent) {
        for s in self.subscribers.values().filter(|s| s.topic == topic) {
            let _ = s.events.send(event.clone());
        }
    }

    fn notify_all(&self, event: SubscriptionEvent) {
        for s in self.subscribers.values() {
            let _ = s.events.send(event.clone());
        }
    }
}

fn join_command(filter: &SubscriptionFilter) -> RealtimeCommand {
    RealtimeCommand::Join {
        topic: filter.topic(),
        table: filter.table.clone(),
        filter_column: filter.column.clone(),
        filter_value: filter.value.clone(),
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Dropped(String),
}

async fn run(config: RemoteConfig, mut control: mpsc::UnboundedReceiver<Control>) {
    let mut topics = Topics::default();
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            topics.notify_all(SubscriptionEvent::Reconnecting);
        }

        match tokio_tungstenite::connect_async(config.realtime_url.as_str()).await {
            Ok((socket, _)) => {
                info!("Realtime connected to {}", config.realtime_url);
                attempt = 0;
                match session(socket, &mut topics, &mut control, config.heartbeat).await {
                    SessionEnd::Shutdown => {
                        debug!("Realtime client shut down");
                        return;
                    }
                    SessionEnd::Dropped(reason) => {
                        warn!("Realtime connection dropped: {}", reason);
                        topics.notify_all(SubscriptionEvent::Closed { reason: Some(reason) });
                    }
                }
            }
            Err(e) => {
                warn!("Realtime connect to {} failed: {}", config.realtime_url, e);
                topics.notify_all(SubscriptionEvent::Closed {
                    reason: Some(e.to_string()),
                });
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = compute_backoff(attempt, config.reconnect_base, config.reconnect_max);
        debug!("Realtime reconnect attempt {} in {:?}", attempt, delay);
        if !wait_offline(delay, &mut topics, &mut control).await {
            debug!("Realtime client shut down while reconnecting");
            return;
        }
    }
}

/// Sleep out the backoff while still taking joins and leaves. Returns false
/// once the handle is gone.
async fn wait_offline(
    delay: Duration,
    topics: &mut Topics,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = control.recv() => match cmd {
                Some(Control::Join { id, filter, events }) => {
                    topics.add(id, filter, events);
                }
                Some(Control::Leave { id }) => {
                    topics.remove(id);
                }
                None => return false,
            }
        }
    }
}

async fn session(
    socket: Socket,
    topics: &mut Topics,
    control: &mut mpsc::UnboundedReceiver<Control>,
    heartbeat_every: Duration,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    topics.reset_acks();
    for join in topics.joins() {
        if let Err(reason) = send_command(&mut sink, &join).await {
            return SessionEnd::Dropped(reason);
        }
    }

    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;
    let mut acked = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            cmd = control.recv() => {
                let outcome = match cmd {
                    Some(Control::Join { id, filter, events }) => match topics.join(id, filter, events) {
                        Some(join) => send_command(&mut sink, &join).await,
                        None => Ok(()),
                    },
                    Some(Control::Leave { id }) => match topics.remove(id) {
                        Some(topic) => send_command(&mut sink, &RealtimeCommand::Leave { topic }).await,
                        None => Ok(()),
                    },
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                };
                if let Err(reason) = outcome {
                    return SessionEnd::Dropped(reason);
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<RealtimeEvent>(text.as_str()) {
                        Ok(RealtimeEvent::HeartbeatAck) => acked = true,
                        Ok(event) => dispatch(topics, event),
                        Err(e) => warn!("Unreadable realtime frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return SessionEnd::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("connection lost".to_string()),
            },
            _ = heartbeat.tick() => {
                if acked {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        return SessionEnd::Dropped(format!("missed {} heartbeats", missed_heartbeats));
                    }
                }
                acked = false;
                if let Err(reason) = send_command(&mut sink, &RealtimeCommand::Heartbeat).await {
                    return SessionEnd::Dropped(reason);
                }
            }
        }
    }
}

fn dispatch(topics: &mut Topics, event: RealtimeEvent) {
    match event {
        RealtimeEvent::JoinAck { topic } => {
            debug!("Joined {}", topic);
            topics.acknowledge(&topic);
            topics.notify_topic(&topic, SubscriptionEvent::Established);
        }
        RealtimeEvent::JoinError { topic, reason } => {
            error!("Join of {} refused: {}", topic, reason);
            topics.forget_ack(&topic);
            topics.notify_topic(&topic, SubscriptionEvent::Closed { reason: Some(reason) });
        }
        RealtimeEvent::Insert { topic, table, record } => {
            trace!("Insert on {}", topic);
            topics.notify_topic(&topic, SubscriptionEvent::Insert { table, record });
        }
        RealtimeEvent::TopicClosed { topic, reason } => {
            warn!("Server closed {}", topic);
            topics.forget_ack(&topic);
            topics.notify_topic(&topic, SubscriptionEvent::Closed { reason });
        }
        RealtimeEvent::HeartbeatAck => {}
    }
}

async fn send_command(sink: &mut SocketSink, command: &RealtimeCommand) -> Result<(), String> {
    let text = serde_json::to_string(command).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into())).await.map_err(|e| e.to_string())
}
