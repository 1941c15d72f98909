/// Name of the singleton room every connection joins on connect.
pub const GENERAL_ROOM: &str = "general";

/// Prefix of direct-message room names (`dm:<a>:<b>`).
pub const DM_ROOM_PREFIX: &str = "dm";

/// Thread identifier sent to the agent service. Replies always land in the
/// general room.
pub const AGENT_THREAD_ID: &str = GENERAL_ROOM;

/// Display name stamped on messages injected by the agent callback.
pub const AGENT_AUTHOR: &str = "AI Agent";

/// Author fields of relay-generated notices.
pub const SYSTEM_AUTHOR: &str = "System";
pub const SYSTEM_AUTHOR_ID: &str = "system";

/// Notice sent to a sender whose agent mention hit the cooldown.
pub const RATE_LIMIT_NOTICE: &str = "Please wait a moment before asking the agent again.";

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default cooldown between agent triggers for one identity (100 s)
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 100_000;
