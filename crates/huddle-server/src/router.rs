//! Per-connection event dispatcher.
//!
//! Each connection's events are handled one at a time, in order, by its
//! session task. Different connections interleave freely; all shared state
//! lives in the [`Hub`] and the [`RateLimiter`].

use std::sync::Arc;

use huddle_shared::constants::RATE_LIMIT_NOTICE;
use huddle_shared::mention::mentions_agent;
use huddle_shared::protocol::{
    AgentRequest, ChatMessage, ClientEvent, DmError, Presence, Reaction, ServerEvent, StartDm,
    TypingSignal,
};
use huddle_shared::room::{is_general, resolve_room};
use huddle_shared::types::ConnectionId;
use tracing::{debug, info, warn};

use crate::agent::AgentDispatch;
use crate::clock;
use crate::hub::Hub;
use crate::rate_limit::RateLimiter;

pub struct MessageRouter {
    hub: Hub,
    limiter: RateLimiter,
    agent: Arc<dyn AgentDispatch>,
    window_ms: u64,
}

impl MessageRouter {
    pub fn new(
        hub: Hub,
        limiter: RateLimiter,
        agent: Arc<dyn AgentDispatch>,
        window_ms: u64,
    ) -> Self {
        Self {
            hub,
            limiter,
            agent,
            window_ms,
        }
    }

    pub async fn handle(&self, connection: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::UserJoined(presence) => self.user_joined(connection, presence).await,
            ClientEvent::StartDm(request) => self.start_dm(connection, request).await,
            ClientEvent::SendMessage(message) => self.send_message(connection, message).await,
            ClientEvent::Typing(signal) => self.typing(connection, signal).await,
            ClientEvent::ReactToMessage(reaction) => self.react(connection, reaction).await,
            ClientEvent::UserLeft(presence) => self.user_left(connection, presence).await,
        }
    }

    async fn user_joined(&self, connection: ConnectionId, presence: Presence) {
        info!(
            user = presence.user_name.as_deref().unwrap_or("unknown"),
            "User joined the chat"
        );
        self.hub
            .broadcast_all(Some(connection), ServerEvent::UserJoined(presence))
            .await;
    }

    async fn user_left(&self, connection: ConnectionId, presence: Presence) {
        info!(
            user = presence.user_name.as_deref().unwrap_or("unknown"),
            "User left the chat"
        );
        self.hub
            .broadcast_all(Some(connection), ServerEvent::UserLeft(presence))
            .await;
    }

    async fn start_dm(&self, connection: ConnectionId, request: StartDm) {
        if let Err(e) = self
            .hub
            .start_dm(connection, request.target_user_id.as_deref())
            .await
        {
            warn!(connection = %connection.short(), error = %e, "Rejected DM request");
            self.hub
                .send_to(
                    connection,
                    ServerEvent::DmError(DmError {
                        message: e.to_string(),
                    }),
                )
                .await;
        }
    }

    /// Relay first, then consider the agent. A rate-limited trigger still
    /// delivers the message to the room.
    async fn send_message(&self, connection: ConnectionId, message: ChatMessage) {
        let room = resolve_room(message.conversation_id.as_deref()).to_string();
        let identity = self.hub.identity_of(connection).await;

        let relayed = ChatMessage {
            id: identity.clone(),
            timestamp: Some(clock::timestamp()),
            ..message.clone()
        };
        let delivered = self
            .hub
            .broadcast_room(&room, Some(connection), ServerEvent::ReceiveMessage(relayed))
            .await;
        debug!(room = %room, delivered, "Relayed message");

        if !is_general(&room) || !mentions_agent(&message.message) {
            return;
        }

        let key = identity
            .as_deref()
            .or(message.author_id.as_deref())
            .unwrap_or_default();
        if !self
            .limiter
            .try_acquire(key, clock::now_millis(), self.window_ms)
            .await
        {
            warn!(identity = key, "Rate limit exceeded for agent trigger");
            let notice = ChatMessage::system(RATE_LIMIT_NOTICE, clock::timestamp());
            self.hub
                .send_to(connection, ServerEvent::ReceiveMessage(notice))
                .await;
            return;
        }

        info!(identity = key, "Agent mention detected");
        self.hub
            .send_to(connection, ServerEvent::AgentThinking)
            .await;
        self.agent
            .dispatch(AgentRequest::for_message(&message, identity.as_deref()));
    }

    async fn typing(&self, connection: ConnectionId, mut signal: TypingSignal) {
        let room = resolve_room(signal.conversation_id.as_deref()).to_string();
        if let Some(identity) = self.hub.identity_of(connection).await {
            signal.user_id = Some(identity);
        }
        self.hub
            .broadcast_room(&room, Some(connection), ServerEvent::UserTyping(signal))
            .await;
    }

    async fn react(&self, connection: ConnectionId, reaction: Reaction) {
        let room = resolve_room(reaction.conversation_id.as_deref()).to_string();
        debug!(
            room = %room,
            message_id = ?reaction.message_id,
            kind = ?reaction.reaction_type,
            "Relaying reaction"
        );
        self.hub
            .broadcast_room(&room, Some(connection), ServerEvent::MessageReacted(reaction))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use huddle_shared::constants::{GENERAL_ROOM, SYSTEM_AUTHOR_ID};
    use serde_json::json;

    use super::*;
    use crate::hub::{drain, Outbox};

    const WINDOW: u64 = 100_000;

    #[derive(Default)]
    struct RecordingAgent {
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl AgentDispatch for RecordingAgent {
        fn dispatch(&self, request: AgentRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    impl RecordingAgent {
        fn count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    struct Harness {
        hub: Hub,
        router: MessageRouter,
        agent: Arc<RecordingAgent>,
    }

    impl Harness {
        fn new() -> Self {
            let hub = Hub::new();
            let agent = Arc::new(RecordingAgent::default());
            let router = MessageRouter::new(hub.clone(), RateLimiter::new(), agent.clone(), WINDOW);
            Self { hub, router, agent }
        }

        async fn connect(&self, identity: Option<&str>) -> (ConnectionId, Outbox) {
            let (conn, mut rx) = self.hub.connect(identity.map(str::to_string)).await;
            drain(&mut rx);
            (conn, rx)
        }
    }

    fn text(message: &str) -> ChatMessage {
        ChatMessage {
            message: message.into(),
            author_id: Some("0xaaa".into()),
            author: Some("alice".into()),
            message_id: Some("1700000000000".into()),
            likes: Some(json!([])),
            upvotes: Some(json!(0)),
            downvotes: Some(json!(0)),
            ..Default::default()
        }
    }

    fn only_message(events: Vec<ServerEvent>) -> ChatMessage {
        match events.as_slice() {
            [ServerEvent::ReceiveMessage(msg)] => msg.clone(),
            other => panic!("expected a single receive_message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_mention_relays_and_signals_sender() {
        let h = Harness::new();
        let (x, mut rx_x) = h.connect(Some("0xaaa")).await;
        let (_y, mut rx_y) = h.connect(Some("0xbbb")).await;
        let (_z, mut rx_z) = h.connect(None).await;
        drain(&mut rx_x);
        drain(&mut rx_y);

        h.router
            .handle(x, ClientEvent::SendMessage(text("hello @agent")))
            .await;

        for rx in [&mut rx_y, &mut rx_z] {
            let msg = only_message(drain(rx));
            assert_eq!(msg.id.as_deref(), Some("0xaaa"));
            assert_eq!(msg.message, "hello @agent");
            assert_eq!(msg.upvotes, Some(json!(0)));
            assert!(msg.timestamp.is_some());
        }
        assert_eq!(drain(&mut rx_x), vec![ServerEvent::AgentThinking]);

        let requests = h.agent.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query, "hello");
        assert_eq!(requests[0].user_id.as_deref(), Some("0xaaa"));
    }

    #[tokio::test]
    async fn test_rate_limited_mention_is_still_delivered() {
        let h = Harness::new();
        let (x, mut rx_x) = h.connect(Some("0xaaa")).await;
        let (_y, mut rx_y) = h.connect(Some("0xbbb")).await;
        drain(&mut rx_x);

        h.router
            .handle(x, ClientEvent::SendMessage(text("@agent one")))
            .await;
        h.router
            .handle(x, ClientEvent::SendMessage(text("@AGENT two")))
            .await;

        assert_eq!(h.agent.count(), 1);

        let delivered: Vec<String> = drain(&mut rx_y)
            .into_iter()
            .map(|event| match event {
                ServerEvent::ReceiveMessage(msg) => msg.message,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(delivered, vec!["@agent one", "@AGENT two"]);

        let events = drain(&mut rx_x);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ServerEvent::AgentThinking);
        let ServerEvent::ReceiveMessage(notice) = &events[1] else {
            panic!("expected rate limit notice");
        };
        assert_eq!(notice.message, RATE_LIMIT_NOTICE);
        assert_eq!(notice.author_id.as_deref(), Some(SYSTEM_AUTHOR_ID));
    }

    #[tokio::test]
    async fn test_plain_and_dm_messages_skip_agent() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(Some("0xaaa")).await;
        let (b, mut rx_b) = h.connect(Some("0xbbb")).await;
        drain(&mut rx_a);

        h.router
            .handle(a, ClientEvent::SendMessage(text("no mention here")))
            .await;
        h.router
            .handle(a, ClientEvent::SendMessage(text("@agentic is not a mention")))
            .await;

        let ready = h.hub.start_dm(a, Some("0xbbb")).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let mut dm = text("@agent in private");
        dm.conversation_id = Some(ready.room_id.clone());
        h.router.handle(a, ClientEvent::SendMessage(dm)).await;

        assert_eq!(h.agent.count(), 0);
        assert!(drain(&mut rx_a).is_empty());
        let msg = only_message(drain(&mut rx_b));
        assert_eq!(msg.conversation_id.as_deref(), Some(ready.room_id.as_str()));
        assert!(h.hub.is_member(b, &ready.room_id).await);
    }

    #[tokio::test]
    async fn test_dm_messages_stay_in_room() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(Some("0xaaa")).await;
        let (_b, mut rx_b) = h.connect(Some("0xbbb")).await;
        let (_c, mut rx_c) = h.connect(Some("0xccc")).await;

        h.router
            .handle(
                a,
                ClientEvent::StartDm(StartDm {
                    target_user_id: Some("0xbbb".into()),
                }),
            )
            .await;
        drain(&mut rx_b);
        drain(&mut rx_c);

        let mut dm = text("psst");
        dm.conversation_id = Some("dm:0xaaa:0xbbb".into());
        h.router.handle(a, ClientEvent::SendMessage(dm)).await;

        assert_eq!(only_message(drain(&mut rx_b)).message, "psst");
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn test_start_dm_reaches_all_target_tabs() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(Some("0xaaa")).await;
        let (b1, mut rx_b1) = h.connect(Some("0xbbb")).await;
        let (b2, mut rx_b2) = h.connect(Some("0xbbb")).await;
        for rx in [&mut rx_a, &mut rx_b1, &mut rx_b2] {
            drain(rx);
        }

        h.router
            .handle(
                a,
                ClientEvent::StartDm(StartDm {
                    target_user_id: Some("0xbbb".into()),
                }),
            )
            .await;

        for (conn, rx) in [(a, &mut rx_a), (b1, &mut rx_b1), (b2, &mut rx_b2)] {
            let events = drain(rx);
            let [ServerEvent::DmReady(ready)] = events.as_slice() else {
                panic!("expected dm_ready, got {events:?}");
            };
            assert_eq!(ready.room_id, "dm:0xaaa:0xbbb");
            assert!(h.hub.is_member(conn, "dm:0xaaa:0xbbb").await);
        }
    }

    #[tokio::test]
    async fn test_invalid_dm_reports_only_to_requester() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(Some("0xaaa")).await;
        let (_b, mut rx_b) = h.connect(Some("0xbbb")).await;
        drain(&mut rx_a);

        for target in [Some("0xaaa".to_string()), None] {
            h.router
                .handle(a, ClientEvent::StartDm(StartDm { target_user_id: target }))
                .await;
            let events = drain(&mut rx_a);
            assert!(matches!(events.as_slice(), [ServerEvent::DmError(_)]));
        }
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_typing_is_room_scoped_and_identity_stamped() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(Some("0xaaa")).await;
        let (_b, mut rx_b) = h.connect(Some("0xbbb")).await;
        drain(&mut rx_a);

        let signal = TypingSignal {
            user_id: Some("spoofed".into()),
            is_typing: true,
            conversation_id: None,
            ..Default::default()
        };
        h.router.handle(a, ClientEvent::Typing(signal)).await;

        assert!(drain(&mut rx_a).is_empty());
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::UserTyping(t)] => {
                assert_eq!(t.user_id.as_deref(), Some("0xaaa"));
                assert!(t.is_typing);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reaction_tallies_are_forwarded_verbatim() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(Some("0xaaa")).await;
        let (_b, mut rx_b) = h.connect(Some("0xbbb")).await;
        drain(&mut rx_a);

        let mut reaction = Reaction {
            message_id: Some("1700000000000".into()),
            reaction_type: Some("upvote".into()),
            conversation_id: Some(GENERAL_ROOM.into()),
            upvotes: Some(json!(7)),
            ..Default::default()
        };
        reaction.extra.insert("client".into(), json!("web"));
        h.router
            .handle(a, ClientEvent::ReactToMessage(reaction.clone()))
            .await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::MessageReacted(reaction)]);
    }

    #[tokio::test]
    async fn test_join_and_leave_announcements_reach_everyone_else() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(Some("0xaaa")).await;
        let (_b, mut rx_b) = h.connect(None).await;
        drain(&mut rx_a);

        let presence = Presence {
            user_id: Some("0xaaa".into()),
            user_name: Some("alice".into()),
            ..Default::default()
        };
        h.router
            .handle(a, ClientEvent::UserJoined(presence.clone()))
            .await;
        h.router
            .handle(a, ClientEvent::UserLeft(presence.clone()))
            .await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::UserJoined(presence.clone()),
                ServerEvent::UserLeft(presence)
            ]
        );
    }

    #[tokio::test]
    async fn test_anonymous_sender_uses_author_id_for_cooldown() {
        let h = Harness::new();
        let (anon, mut rx_anon) = h.connect(None).await;

        h.router
            .handle(anon, ClientEvent::SendMessage(text("@agent hi")))
            .await;
        h.router
            .handle(anon, ClientEvent::SendMessage(text("@agent again")))
            .await;

        assert_eq!(h.agent.count(), 1);
        let events = drain(&mut rx_anon);
        assert_eq!(events[0], ServerEvent::AgentThinking);
        assert!(
            matches!(&events[1], ServerEvent::ReceiveMessage(m) if m.message == RATE_LIMIT_NOTICE)
        );
    }
}
