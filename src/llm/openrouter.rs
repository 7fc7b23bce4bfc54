use super::http_client::build_provider_client_with_timeout;
use super::scrub::api_error;
use super::traits::CompletionProvider;
use crate::config::{Config, ProviderConfig};
use crate::conversation::Role;
use crate::error::LlmError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

const PROVIDER_NAME: &str = "openrouter";

/// OpenAI-compatible chat-completions client with per-conversation memory.
pub struct OpenRouterCompletion {
    /// Pre-computed `"Bearer <key>"` header value.
    cached_auth_header: Option<String>,
    client: Client,
    endpoint: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    system_prompt: String,
    site_url: String,
    app_title: String,
    max_history_messages: usize,
    max_conversations: usize,
    histories: Mutex<HistoryBook>,
}

#[derive(Debug, Clone)]
struct HistoryTurn {
    role: &'static str,
    content: String,
}

struct HistoryEntry {
    turns: Vec<HistoryTurn>,
    /// Book clock value at creation. A forgotten conversation comes back with
    /// a new generation, so replies to requests made before `forget` are dropped.
    generation: u64,
    last_used: u64,
}

/// Per-conversation transcripts, bounded in count by least-recent use.
#[derive(Default)]
struct HistoryBook {
    entries: HashMap<String, HistoryEntry>,
    clock: u64,
}

impl HistoryBook {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Turns to replay for `conversation_id` and the generation a later
    /// commit has to match.
    fn checkout(
        &mut self,
        conversation_id: &str,
        max_conversations: usize,
    ) -> (Vec<HistoryTurn>, u64) {
        let now = self.tick();
        if !self.entries.contains_key(conversation_id) {
            self.evict_to(max_conversations.saturating_sub(1));
        }
        let entry = self
            .entries
            .entry(conversation_id.to_string())
            .or_insert_with(|| HistoryEntry {
                turns: Vec::new(),
                generation: now,
                last_used: now,
            });
        entry.last_used = now;
        (entry.turns.clone(), entry.generation)
    }

    /// Append one exchange unless the conversation was forgotten or evicted
    /// since `generation` was handed out.
    fn commit(
        &mut self,
        conversation_id: &str,
        generation: u64,
        turns: [HistoryTurn; 2],
        max_turns: usize,
    ) -> bool {
        let now = self.tick();
        let Some(entry) = self
            .entries
            .get_mut(conversation_id)
            .filter(|entry| entry.generation == generation)
        else {
            return false;
        };
        entry.turns.extend(turns);
        if entry.turns.len() > max_turns {
            let excess = entry.turns.len() - max_turns;
            entry.turns.drain(..excess);
        }
        entry.last_used = now;
        true
    }

    fn evict_to(&mut self, limit: usize) {
        while self.entries.len() > limit {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(
                conversation_id = oldest.as_str(),
                "Evicted least recently used completion history"
            );
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenRouterCompletion {
    pub fn new(
        api_key: Option<&str>,
        model: &str,
        temperature: f64,
        provider: &ProviderConfig,
    ) -> Self {
        Self {
            cached_auth_header: api_key
                .filter(|key| !key.trim().is_empty())
                .map(|key| format!("Bearer {key}")),
            client: build_provider_client_with_timeout(provider.request_timeout_secs),
            endpoint: format!(
                "{}/chat/completions",
                provider.base_url.trim_end_matches('/')
            ),
            model: model.to_string(),
            temperature,
            max_tokens: provider.max_tokens,
            system_prompt: provider.system_prompt.clone(),
            site_url: provider.site_url.clone(),
            app_title: provider.app_title.clone(),
            max_history_messages: provider.max_history_messages,
            max_conversations: provider.max_conversations,
            histories: Mutex::new(HistoryBook::default()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_key.as_deref(),
            &config.model,
            config.temperature,
            &config.provider,
        )
    }

    fn book(&self) -> std::sync::MutexGuard<'_, HistoryBook> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a completed exchange, dropping the oldest turns past the cap.
    fn commit_turn(&self, conversation_id: &str, generation: u64, user_text: &str, reply: &str) {
        let turns = [
            HistoryTurn {
                role: Role::User.as_str(),
                content: user_text.to_string(),
            },
            HistoryTurn {
                role: Role::Assistant.as_str(),
                content: reply.to_string(),
            },
        ];
        if !self
            .book()
            .commit(conversation_id, generation, turns, self.max_history_messages)
        {
            tracing::debug!(
                conversation_id,
                "Conversation forgotten while the reply was pending, turn not kept"
            );
        }
    }

    #[cfg(test)]
    fn history_len(&self, conversation_id: &str) -> usize {
        self.book()
            .entries
            .get(conversation_id)
            .map_or(0, |entry| entry.turns.len())
    }

    #[cfg(test)]
    fn conversation_count(&self) -> usize {
        self.book().entries.len()
    }

    fn build_request<'a>(
        &'a self,
        history: &'a [HistoryTurn],
        user_text: &'a str,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage {
            role: "system",
            content: &self.system_prompt,
        });
        messages.extend(history.iter().map(|turn| WireMessage {
            role: turn.role,
            content: &turn.content,
        }));
        messages.push(WireMessage {
            role: "user",
            content: user_text,
        });

        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn extract_text(response: ChatResponse) -> anyhow::Result<String> {
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                LlmError::EmptyResponse {
                    provider: PROVIDER_NAME.to_string(),
                }
                .into()
            })
    }
}

impl CompletionProvider for OpenRouterCompletion {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn complete<'a>(
        &'a self,
        conversation_id: &'a str,
        user_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let auth_header = self.cached_auth_header.as_ref().ok_or_else(|| {
                LlmError::MissingApiKey {
                    provider: PROVIDER_NAME.to_string(),
                }
            })?;

            let (history, generation) = self
                .book()
                .checkout(conversation_id, self.max_conversations);
            let request = self.build_request(&history, user_text);

            tracing::debug!(
                conversation_id,
                model = self.model.as_str(),
                history_turns = history.len(),
                "Sending completion request"
            );

            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", auth_header)
                .header("HTTP-Referer", &self.site_url)
                .header("X-Title", &self.app_title)
                .json(&request)
                .send()
                .await
                .map_err(|e| LlmError::Request {
                    provider: PROVIDER_NAME.to_string(),
                    message: e.to_string(),
                })?;

            if !response.status().is_success() {
                return Err(api_error(PROVIDER_NAME, response).await);
            }

            let chat_response: ChatResponse = response.json().await?;
            let reply = Self::extract_text(chat_response)?;
            self.commit_turn(conversation_id, generation, user_text, &reply);
            Ok(reply)
        })
    }

    fn forget(&self, conversation_id: &str) {
        let removed = self.book().entries.remove(conversation_id).is_some();
        if removed {
            tracing::debug!(conversation_id, "Cleared completion history");
        }
    }
}
