use std::sync::Arc;

use crate::config::SessionConfig;
use crate::events::EventSender;
use crate::session::SessionHandle;

/// Transport-agnostic context shared by the API routes.
#[derive(Clone)]
pub struct ServiceContext {
    pub session: SessionHandle,
    pub event_tx: EventSender,
    pub config: Arc<SessionConfig>,
}
