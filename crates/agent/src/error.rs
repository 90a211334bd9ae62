//! Errors returned by the chat loop.

use toolchat_core::error::EngineError;

/// Why a `send` did not produce a reply.
///
/// Tool failures never appear here; they are folded into the conversation
/// as tool messages.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("A message is already being processed")]
    Busy,

    #[error("Generation cancelled")]
    Cancelled,

    /// The engine failed mid-send. `partial` holds the text generated for
    /// the failed turn before the error.
    #[error("Engine error: {source}")]
    Engine {
        #[source]
        source: EngineError,
        partial: String,
    },
}

impl AgentError {
    /// Text generated before the failure, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            Self::Engine { partial, .. } if !partial.is_empty() => Some(partial),
            _ => None,
        }
    }
}

impl From<EngineError> for AgentError {
    fn from(source: EngineError) -> Self {
        Self::Engine {
            source,
            partial: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_keeps_partial_text() {
        let err = AgentError::Engine {
            source: EngineError::Decode("bad token".into()),
            partial: "Hel".into(),
        };
        assert_eq!(err.partial_text(), Some("Hel"));
        assert!(err.to_string().contains("bad token"));
    }

    #[test]
    fn from_engine_error_has_no_partial() {
        let err: AgentError = EngineError::NotLoaded("x".into()).into();
        assert!(err.partial_text().is_none());
        assert_eq!(AgentError::Busy.partial_text(), None);
    }
}
