// ABOUTME: Scripted completion provider for chat pipeline tests
// ABOUTME: Replays queued replies or failures and records every request it receives

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use persona_chat_server::errors::AppError;
use persona_chat_server::llm::{
    ChatRequest, ChatResponse, ChatStream, LlmCapabilities, LlmProvider, StreamChunk,
};

/// What the provider does for one call
#[derive(Clone)]
pub enum Script {
    /// Stream these chunks, then finish
    Reply(Vec<String>),
    /// Fail before any chunk arrives
    FailOpen(fn() -> AppError),
    /// Stream these chunks, then fail
    FailMidStream(Vec<String>, fn() -> AppError),
}

impl Script {
    /// Reply with the given chunks
    pub fn reply(chunks: &[&str]) -> Self {
        Self::Reply(chunks.iter().map(|c| (*c).to_owned()).collect())
    }
}

/// Completion provider that follows a queue of scripts
///
/// When the queue is empty every call answers "Hey you".
#[derive(Clone)]
pub struct FakeProvider {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    streaming: bool,
    chunk_delay: Option<Duration>,
}

impl FakeProvider {
    /// Streaming provider with an empty script queue
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            streaming: true,
            chunk_delay: None,
        }
    }

    /// Sleep for `delay` before yielding each streamed item
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn paced(&self, items: Vec<Result<StreamChunk, AppError>>) -> ChatStream {
        match self.chunk_delay {
            Some(delay) => Box::pin(stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })),
            None => Box::pin(stream::iter(items)),
        }
    }

    /// Provider without the streaming capability
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Queue the behavior of the next call
    pub fn push(&self, script: Script) -> &Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> ChatRequest {
        self.requests().pop().expect("provider was never called")
    }

    fn next_script(&self, request: &ChatRequest) -> Script {
        self.requests.lock().unwrap().push(request.clone());
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::reply(&["Hey ", "you"]))
    }
}

fn chunk(delta: String, is_final: bool) -> Result<StreamChunk, AppError> {
    Ok(StreamChunk {
        delta,
        is_final,
        finish_reason: is_final.then(|| "stop".to_owned()),
    })
}

#[async_trait]
impl LlmProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn display_name(&self) -> &'static str {
        "Fake"
    }

    fn capabilities(&self) -> LlmCapabilities {
        if self.streaming {
            LlmCapabilities::STREAMING | LlmCapabilities::SYSTEM_MESSAGES
        } else {
            LlmCapabilities::SYSTEM_MESSAGES
        }
    }

    fn default_model(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        match self.next_script(request) {
            Script::Reply(chunks) => Ok(ChatResponse {
                content: chunks.concat(),
                model: "fake-model".to_owned(),
                usage: None,
                finish_reason: Some("stop".to_owned()),
            }),
            Script::FailOpen(make) | Script::FailMidStream(_, make) => Err(make()),
        }
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        match self.next_script(request) {
            Script::Reply(chunks) => {
                let last = chunks.len().saturating_sub(1);
                let items: Vec<_> = chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, delta)| chunk(delta, i == last))
                    .collect();
                Ok(self.paced(items))
            }
            Script::FailOpen(make) => Err(make()),
            Script::FailMidStream(chunks, make) => {
                let mut items: Vec<_> = chunks.into_iter().map(|d| chunk(d, false)).collect();
                items.push(Err(make()));
                Ok(self.paced(items))
            }
        }
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}
