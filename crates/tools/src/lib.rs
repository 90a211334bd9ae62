//! Mail tools for toolchat.
//!
//! Tools give the assistant the ability to act on a mailbox: send an
//! email, list labels and messages, read the profile, trash a message.
//! Every tool talks to a [`MailService`]; [`InMemoryMailbox`] is the
//! bundled implementation used for demos and tests.

pub mod mail;
pub mod mailbox;
pub mod prompt;

use std::sync::Arc;
use toolchat_core::tool::{ToolRegistry, Typed};

pub use mail::{
    GetProfileTool, ListLabelsTool, ListMessagesTool, SendEmailTool, TrashMessageTool,
    LIST_MESSAGES_CAP,
};
pub use mailbox::{InMemoryMailbox, Label, MailError, MailService, MessageSummary, Profile};
pub use prompt::default_system_prompt;

/// Create a registry holding every mail tool, all backed by `service`.
pub fn mail_registry(service: Arc<dyn MailService>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_tool(Typed(SendEmailTool::new(service.clone())));
    registry.register_tool(Typed(ListLabelsTool::new(service.clone())));
    registry.register_tool(Typed(GetProfileTool::new(service.clone())));
    registry.register_tool(Typed(TrashMessageTool::new(service.clone())));
    registry.register_tool(Typed(ListMessagesTool::new(service)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_all_mail_tools() {
        let registry = mail_registry(Arc::new(InMemoryMailbox::new("me@example.com")));
        assert_eq!(
            registry.names(),
            vec![
                "get_profile",
                "list_labels",
                "list_messages",
                "send_email",
                "trash_message"
            ]
        );
    }
}
