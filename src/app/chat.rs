//! Terminal chat over a local [`ConversationContext`].
//!
//! The shell has no signed-in identity, so nothing it sends is persisted.

use crate::config::Config;
use crate::conversation::{
    ConversationContext, InMemorySessionStore, Message, MessageLifecycle, MessageStatus,
    SendOutcome,
};
use crate::llm::{CompletionProvider, OpenRouterCompletion};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  /new               start a new session
  /list              list sessions, most recent first
  /switch <n|id>     switch to a session by list number or id
  /rename <name>     rename the active session
  /clear             remove every message from the active session
  /delete            delete the active session
  /why               show the error behind the last failed reply
  /help              show this help
  /quit              leave";

/// What the input loop should do after a line was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Print(String),
    Quit,
}

pub struct ChatShell {
    context: ConversationContext,
}

impl ChatShell {
    pub fn new(context: ConversationContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Handle one line of input: a slash command or a message to send.
    pub async fn handle(&self, line: &str) -> Step {
        let line = line.trim();
        if line.is_empty() {
            return Step::Print(String::new());
        }
        let Some(command) = line.strip_prefix('/') else {
            return Step::Print(self.send(line).await);
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        let output = match name {
            "quit" | "exit" | "q" => return Step::Quit,
            "help" | "?" => HELP.to_string(),
            "new" => {
                self.context.create_session();
                format!("Started {}", self.active_name())
            }
            "list" => self.list(),
            "switch" => self.switch(arg),
            "rename" => self.rename(arg),
            "clear" => self.on_active(|id| self.context.clear(id), "Cleared"),
            "delete" => {
                let deleted = self.active_name();
                match self.context.active_session_id() {
                    Some(id) if self.context.delete(&id) => {
                        format!("Deleted {deleted}; now in {}", self.active_name())
                    }
                    _ => "No active session".to_string(),
                }
            }
            "why" => self.last_failure(),
            _ => format!("Unknown command /{name}. Type /help for the list."),
        };
        Step::Print(output)
    }

    /// Send `text` and render the assistant's resolution.
    pub async fn send(&self, text: &str) -> String {
        match self.context.send(text).await {
            SendOutcome::Completed(reply) => render_reply(&reply),
            SendOutcome::EmptyMessage => String::new(),
            SendOutcome::Busy => "Still waiting for the previous reply".to_string(),
            SendOutcome::NoActiveSession => "No active session; type /new".to_string(),
        }
    }

    fn active_name(&self) -> String {
        let snapshot = self.context.snapshot();
        snapshot
            .active_session_id
            .as_deref()
            .and_then(|id| snapshot.sessions.iter().find(|s| s.id == id))
            .map_or_else(|| "no session".to_string(), |s| format!("\"{}\"", s.name))
    }

    fn on_active(&self, op: impl FnOnce(&str) -> bool, verb: &str) -> String {
        let name = self.active_name();
        match self.context.active_session_id() {
            Some(id) if op(&id) => format!("{verb} {name}"),
            _ => "No active session".to_string(),
        }
    }

    fn list(&self) -> String {
        let snapshot = self.context.snapshot();
        snapshot
            .sessions
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let marker = if snapshot.active_session_id.as_deref() == Some(s.id.as_str()) {
                    '*'
                } else {
                    ' '
                };
                format!(
                    "{marker} {}. {} ({} messages) {}",
                    i + 1,
                    s.name,
                    s.message_count,
                    s.id
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn switch(&self, target: &str) -> String {
        if target.is_empty() {
            return "Usage: /switch <n|id>".to_string();
        }
        let sessions = self.context.snapshot().sessions;
        let id = target
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| sessions.get(i))
            .map_or(target, |s| s.id.as_str());

        if self.context.select_session(id) {
            format!("Switched to {}", self.active_name())
        } else {
            format!("No session {target}")
        }
    }

    fn rename(&self, name: &str) -> String {
        if name.is_empty() {
            return "Usage: /rename <name>".to_string();
        }
        match self.context.active_session_id() {
            Some(id) if self.context.rename(&id, name) => format!("Renamed to \"{name}\""),
            _ => "No active session".to_string(),
        }
    }

    fn last_failure(&self) -> String {
        self.context
            .snapshot()
            .messages
            .iter()
            .rev()
            .find_map(Message::error_detail)
            .map_or_else(
                || "No failed replies in this session".to_string(),
                str::to_string,
            )
    }
}

fn render_reply(reply: &Message) -> String {
    match reply.status() {
        MessageStatus::Error => format!("{}\n(type /why for details)", reply.text()),
        _ => reply.text().to_string(),
    }
}

fn build_context(config: &Config) -> ConversationContext {
    let completion: Arc<dyn CompletionProvider> =
        Arc::new(OpenRouterCompletion::from_config(config));
    let lifecycle = MessageLifecycle::new(
        Arc::new(InMemorySessionStore::new()),
        completion,
        Duration::from_secs(config.conversation.send_timeout_secs),
    );
    ConversationContext::new(lifecycle)
}

/// Run the terminal chat. With `message`, send it once and exit.
pub async fn run(config: &Config, message: Option<String>) -> Result<()> {
    if config.api_key.is_none() {
        tracing::warn!("No API key configured; set OPENROUTER_API_KEY or api_key in config.toml");
    }
    let shell = ChatShell::new(build_context(config));

    if let Some(message) = message {
        let outcome = shell.context().send(&message).await;
        return match outcome {
            SendOutcome::Completed(reply) => match reply.error_detail() {
                Some(detail) => anyhow::bail!("{detail}"),
                None => {
                    println!("{}", reply.text());
                    Ok(())
                }
            },
            SendOutcome::EmptyMessage => anyhow::bail!("message is empty"),
            other => anyhow::bail!("message was not sent: {other:?}"),
        };
    }

    println!("ClubLLM chat ({}). Type /help for commands.", config.model);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("flush stdout")?;
        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        match shell.handle(&line).await {
            Step::Print(output) if output.is_empty() => {}
            Step::Print(output) => println!("{output}"),
            Step::Quit => break,
        }
    }
    Ok(())
}
