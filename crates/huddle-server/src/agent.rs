//! Bridge to the external agent service.
//!
//! Two independent one-way flows: an outbound webhook fired when a general
//! room message mentions `@agent`, and an inbound authenticated callback that
//! injects the agent's answer into the general room. Replies are not
//! correlated with requests; the general room is the only thread.

use std::sync::Arc;

use huddle_shared::constants::GENERAL_ROOM;
use huddle_shared::protocol::{AgentReply, AgentRequest, ChatMessage, ServerEvent};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::error::{AgentError, ServerError};
use crate::hub::Hub;

/// Where the router sends agent triggers. Implementations must return
/// immediately; the router never waits on the agent.
pub trait AgentDispatch: Send + Sync {
    fn dispatch(&self, request: AgentRequest);
}

#[derive(Clone)]
pub struct AgentBridge {
    client: reqwest::Client,
    url: Arc<str>,
    secret: Arc<str>,
}

impl AgentBridge {
    pub fn new(url: &str, secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: Arc::from(url),
            secret: Arc::from(secret),
        }
    }

    /// POST the request to the agent service. A non-2xx answer counts as a
    /// failure. No timeout or retry is applied here.
    pub async fn notify(&self, request: &AgentRequest) -> Result<(), AgentError> {
        let response = self
            .client
            .post(self.url.as_ref())
            .bearer_auth(self.secret.as_ref())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Status(status));
        }
        Ok(())
    }
}

impl AgentDispatch for AgentBridge {
    fn dispatch(&self, request: AgentRequest) {
        let bridge = self.clone();
        tokio::spawn(async move {
            debug!(message_id = %request.message_id, "Sending webhook to agent service");
            match bridge.notify(&request).await {
                Ok(()) => info!(
                    message_id = %request.message_id,
                    "Agent service acknowledged request"
                ),
                Err(e) => error!(
                    message_id = %request.message_id,
                    error = %e,
                    "Error calling agent service"
                ),
            }
        });
    }
}

/// Compare an `Authorization` header against `Bearer <secret>` in constant time.
pub fn authorize_bearer(header: Option<&str>, secret: &str) -> Result<(), ServerError> {
    let presented = header.unwrap_or("").as_bytes();
    let expected = format!("Bearer {secret}");
    let expected = expected.as_bytes();

    if presented.len() != expected.len() || presented.ct_eq(expected).unwrap_u8() != 1 {
        return Err(ServerError::Unauthorized);
    }
    Ok(())
}

/// Handle the agent service's callback: authenticate, then broadcast the
/// reply to every member of the general room. Returns how many connections
/// the reply was queued for.
///
/// Authentication happens before the body is looked at, so a bad token is
/// rejected with no side effects regardless of payload.
pub async fn receive_agent_callback(
    hub: &Hub,
    secret: &str,
    auth_header: Option<&str>,
    body: &[u8],
) -> Result<usize, ServerError> {
    if let Err(e) = authorize_bearer(auth_header, secret) {
        warn!("Rejected agent callback with invalid token");
        return Err(e);
    }

    let reply: AgentReply = if body.iter().all(u8::is_ascii_whitespace) {
        AgentReply::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ServerError::BadRequest(format!("Invalid JSON body: {e}")))?
    };

    let text = reply.text.unwrap_or_default();
    info!(
        agent = reply.agent_id.as_deref().unwrap_or(""),
        len = text.len(),
        "Received response from agent"
    );

    let message = ChatMessage::from_agent(text, reply.agent_id, clock::timestamp());
    let delivered = hub
        .broadcast_room(GENERAL_ROOM, None, ServerEvent::ReceiveMessage(message))
        .await;
    Ok(delivered)
}
