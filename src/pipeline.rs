//! Reply generation: history, the capped tool-call loop, output hygiene,
//! and the fixed fallback texts.
//!
//! Generation never fails outward. Any error on the AI path, including
//! exceeding the tool iteration cap, is logged and mapped to a fixed
//! fallback text in the user's language.

use crate::language::{self, Lang};
use crate::providers::{ChatMessage, Provider};
use crate::store::{ConversationStore, TurnRole};
use crate::tools::{self, Tool, ToolResult};
use crate::util::truncate_with_ellipsis;
use crate::webhook::InboundMessage;
use std::sync::Arc;

pub struct ResponseGenerator {
    provider: Arc<dyn Provider>,
    store: Arc<dyn ConversationStore>,
    tools: Vec<Arc<dyn Tool>>,
    temperature: f64,
    max_tool_iterations: usize,
    history_limit: usize,
    reply_max_chars: usize,
}

impl ResponseGenerator {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn ConversationStore>,
        tools: Vec<Arc<dyn Tool>>,
        temperature: f64,
        max_tool_iterations: usize,
        history_limit: usize,
        reply_max_chars: usize,
    ) -> Self {
        Self {
            provider,
            store,
            tools,
            temperature,
            max_tool_iterations,
            history_limit,
            reply_max_chars,
        }
    }

    /// Produce the reply text for one inbound message. Infallible by
    /// contract: AI failures become the per-language fallback text.
    pub async fn generate(&self, message: &InboundMessage) -> String {
        let lang = language::detect(&message.text);

        if let Err(e) = self
            .store
            .append_turn(&message.sender, TurnRole::User, &message.text)
            .await
        {
            tracing::warn!(sender = %message.sender, "failed to persist user turn: {e:#}");
        }

        let reply = match self.run_loop(message, lang).await {
            Ok(text) => sanitize_reply(&text, self.reply_max_chars),
            Err(e) => {
                tracing::error!(
                    sender = %message.sender,
                    message_id = %message.message_id,
                    "reply generation failed: {e:#}"
                );
                fallback_text(lang).to_string()
            }
        };

        if let Err(e) = self
            .store
            .append_turn(&message.sender, TurnRole::Assistant, &reply)
            .await
        {
            tracing::warn!(sender = %message.sender, "failed to persist assistant turn: {e:#}");
        }

        reply
    }

    async fn run_loop(&self, message: &InboundMessage, lang: Lang) -> anyhow::Result<String> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(message, lang))];

        // History is best-effort too: an unreadable store costs context,
        // not the reply.
        let history = self
            .store
            .recent_turns(&message.sender, self.history_limit)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(sender = %message.sender, "failed to restore history: {e:#}");
                Vec::new()
            });
        for turn in &history {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(&turn.text),
                TurnRole::Assistant => ChatMessage::assistant(&turn.text),
            });
        }

        // If the user turn failed to persist it is absent from history.
        let current_present = history
            .last()
            .is_some_and(|t| t.role == TurnRole::User && t.text == message.text);
        if !current_present {
            messages.push(ChatMessage::user(&message.text));
        }

        for _iteration in 0..self.max_tool_iterations {
            let response = self
                .provider
                .chat_with_history(&messages, self.temperature)
                .await?;

            let (text, calls) = tools::parse_tool_calls(&response);
            if calls.is_empty() {
                return Ok(text);
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let mut args = call.arguments;
                // The sender's identity always comes from the webhook, never
                // from the model.
                if let Some(obj) = args.as_object_mut() {
                    obj.insert(
                        "user_id".to_string(),
                        serde_json::Value::String(message.sender.clone()),
                    );
                }

                let result = match self.tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => {
                        tracing::debug!(tool = %call.name, sender = %message.sender, "executing tool");
                        tool.execute(args)
                            .await
                            .unwrap_or_else(|e| ToolResult::err(format!("tool failed: {e:#}")))
                    }
                    None => ToolResult::err(format!("unknown tool: {}", call.name)),
                };
                results.push((call.name, result));
            }

            messages.push(ChatMessage::assistant(&response));
            messages.push(ChatMessage::user(tools::format_tool_results(&results)));
        }

        anyhow::bail!(
            "exceeded maximum tool iterations ({})",
            self.max_tool_iterations
        )
    }

    fn system_prompt(&self, message: &InboundMessage, lang: Lang) -> String {
        let name_line = message
            .sender_name
            .as_deref()
            .map(|n| format!("The user's name is {n}. "))
            .unwrap_or_default();
        format!(
            "You are the enrollment assistant of a coding bootcamp, chatting over WhatsApp. \
             You help prospective students learn about programs and guide them through \
             enrollment step by step. Be warm and concise; WhatsApp messages are short. \
             {name_line}Always answer in {}.\n\n{}",
            lang.display_name(),
            tools::prompt_instructions(&self.tools)
        )
    }
}

/// Fixed reply used whenever generation fails.
pub fn fallback_text(lang: Lang) -> &'static str {
    match lang {
        Lang::Fr => "Désolé, j'ai rencontré un problème technique. Pouvez-vous reformuler votre question ?",
        Lang::Ar => "عذراً، واجهت مشكلة تقنية. هل يمكنك إعادة صياغة سؤالك؟",
        Lang::En => "Sorry, I encountered a technical issue. Could you please rephrase your question?",
    }
}

/// Clean model output for WhatsApp: drop citation brackets, convert markdown
/// bold to WhatsApp bold, strip control characters, bound the length.
pub fn sanitize_reply(text: &str, max_chars: usize) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut in_citation = false;
    for c in text.chars() {
        match c {
            '【' => in_citation = true,
            '】' => in_citation = false,
            _ if in_citation => {}
            c if c.is_control() && c != '\n' => {}
            c => cleaned.push(c),
        }
    }
    let cleaned = cleaned.replace("**", "*");
    truncate_with_ellipsis(cleaned.trim(), max_chars)
}
