//! Chat templates — how messages are framed for the model.
//!
//! Every message renders as `header(role) + content + terminator`, and the
//! assistant header doubles as the generation cue. That keeps the transcript
//! a plain concatenation of per-message segments, which is what makes
//! incremental rendering exact.

use serde::{Deserialize, Serialize};
use toolchat_core::message::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// `<|im_start|>{role}\n{content}<|im_end|>\n`
    #[default]
    ChatMl,
    /// `<|{role}|>\n{content}</s>\n`
    TinyLlama,
    /// `<|start_header_id|>{role}<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
}

impl ChatTemplate {
    /// Look up a template by its config name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "chatml" => Some(Self::ChatMl),
            "tinyllama" => Some(Self::TinyLlama),
            "llama3" => Some(Self::Llama3),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMl => "chatml",
            Self::TinyLlama => "tinyllama",
            Self::Llama3 => "llama3",
        }
    }

    /// Framing that opens a message from `role`.
    pub fn header(&self, role: Role) -> &'static str {
        match (*self, role) {
            (Self::ChatMl, Role::System) => "<|im_start|>system\n",
            (Self::ChatMl, Role::User) => "<|im_start|>user\n",
            (Self::ChatMl, Role::Assistant) => "<|im_start|>assistant\n",
            (Self::ChatMl, Role::Tool) => "<|im_start|>tool\n",

            (Self::TinyLlama, Role::System) => "<|system|>\n",
            (Self::TinyLlama, Role::User) => "<|user|>\n",
            (Self::TinyLlama, Role::Assistant) => "<|assistant|>\n",
            // No tool role; results become user messages
            (Self::TinyLlama, Role::Tool) => "<|user|>\n[Tool Result] ",

            (Self::Llama3, Role::System) => "<|start_header_id|>system<|end_header_id|>\n\n",
            (Self::Llama3, Role::User) => "<|start_header_id|>user<|end_header_id|>\n\n",
            (Self::Llama3, Role::Assistant) => {
                "<|start_header_id|>assistant<|end_header_id|>\n\n"
            }
            (Self::Llama3, Role::Tool) => {
                "<|start_header_id|>user<|end_header_id|>\n\n[Tool Result] "
            }
        }
    }

    /// Framing that closes every message.
    pub fn turn_terminator(&self) -> &'static str {
        match self {
            Self::ChatMl => "<|im_end|>\n",
            Self::TinyLlama => "</s>\n",
            Self::Llama3 => "<|eot_id|>",
        }
    }

    /// Submitted after each prompt so the model answers as the assistant.
    pub fn generation_cue(&self) -> &'static str {
        self.header(Role::Assistant)
    }

    /// Render one message.
    pub fn segment(&self, role: Role, content: &str) -> String {
        let header = self.header(role);
        let terminator = self.turn_terminator();
        let mut out = String::with_capacity(header.len() + content.len() + terminator.len());
        out.push_str(header);
        out.push_str(content);
        out.push_str(terminator);
        out
    }
}

impl std::fmt::Display for ChatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolchat_core::message::Message;

    /// A whole message list followed by the generation cue.
    fn format(template: ChatTemplate, messages: &[Message]) -> String {
        let mut prompt: String = messages
            .iter()
            .map(|m| template.segment(m.role, &m.content))
            .collect();
        prompt.push_str(template.generation_cue());
        prompt
    }

    #[test]
    fn chatml_format() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hi")];
        let prompt = format(ChatTemplate::ChatMl, &messages);
        assert_eq!(
            prompt,
            "<|im_start|>system\nYou are helpful.<|im_end|>\n\
             <|im_start|>user\nHi<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn tinyllama_tool_results_become_user_turns() {
        let messages = vec![Message::tool("Result from get_profile: {}")];
        let prompt = format(ChatTemplate::TinyLlama, &messages);
        assert!(prompt.starts_with("<|user|>\n[Tool Result] Result from get_profile"));
        assert!(prompt.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn llama3_headers() {
        let prompt = format(ChatTemplate::Llama3, &[Message::user("Hello")]);
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>\n\nHello<|eot_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn assistant_segment_is_cue_content_terminator() {
        for template in [ChatTemplate::ChatMl, ChatTemplate::TinyLlama, ChatTemplate::Llama3] {
            let segment = template.segment(Role::Assistant, "ok");
            assert_eq!(
                segment,
                format!("{}ok{}", template.generation_cue(), template.turn_terminator())
            );
        }
    }

    #[test]
    fn names_round_trip() {
        for template in [ChatTemplate::ChatMl, ChatTemplate::TinyLlama, ChatTemplate::Llama3] {
            assert_eq!(ChatTemplate::from_name(template.name()), Some(template));
        }
        assert_eq!(ChatTemplate::from_name("ChatML"), Some(ChatTemplate::ChatMl));
        assert_eq!(ChatTemplate::from_name("llama2"), None);
    }
}
