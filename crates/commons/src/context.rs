use uuid::Uuid;

/// Request-scoped metadata threaded explicitly through handlers and workers.
///
/// The correlation id ties together every log line, audit row and outbox
/// event produced while handling one inbound request or bus event. The
/// causation id is the event id of the inbound event that triggered the
/// current work, if any.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub causation_id: Option<String>,
    /// Reference id of the acting principal, if authenticated.
    pub actor: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            actor: None,
        }
    }

    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            causation_id: None,
            actor: None,
        }
    }

    pub fn caused_by(mut self, event_id: impl Into<String>) -> Self {
        self.causation_id = Some(event_id.into());
        self
    }

    pub fn acting_as(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
