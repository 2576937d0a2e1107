//! Mock implementations for testing
//!
//! These mocks enable routing and runtime tests without real I/O.

use super::traits::*;
use crate::flow::{Flow, FlowGraph};
use crate::llm::{LlmError, LlmRequest, LlmResponse};
use crate::routing::Language;
use crate::session::{ChatTurn, Session};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    delay: Option<Duration>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering, to widen race windows in tests
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
#[derive(Default)]
pub struct InMemoryStorage {
    sessions: Mutex<HashMap<String, Session>>,
    turns: Mutex<HashMap<String, Vec<ChatTurn>>>,
    bots: Mutex<HashMap<String, PublishedBot>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a flow; panics on an invalid one
    pub fn with_bot(self, bot_id: &str, language: Language, flow: Flow) -> Self {
        let graph = FlowGraph::new(flow).expect("test flow must be valid");
        self.bots.lock().unwrap().insert(
            bot_id.to_string(),
            PublishedBot {
                language,
                graph: Arc::new(graph),
            },
        );
        self
    }

    /// Get all turns of a conversation
    pub fn get_all_turns(&self, conversation_id: &str) -> Vec<ChatTurn> {
        self.turns
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_session(&self, conversation_id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(conversation_id).cloned()
    }

    /// Store a session directly, bypassing the runtime
    pub fn put_session(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.conversation_id.clone(), session);
    }
}

#[async_trait]
impl SessionStore for InMemoryStorage {
    async fn load_session(&self, conversation_id: &str) -> Result<Option<Session>, String> {
        Ok(self.get_session(conversation_id))
    }

    async fn save_session(&self, session: &Session) -> Result<(), String> {
        self.put_session(session.clone());
        Ok(())
    }

    async fn append_turn(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), String> {
        self.turns
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn recent_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatTurn>, String> {
        let turns = self.get_all_turns(conversation_id);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }

    async fn reset_session(&self, conversation_id: &str) -> Result<bool, String> {
        self.turns.lock().unwrap().remove(conversation_id);
        Ok(self.sessions.lock().unwrap().remove(conversation_id).is_some())
    }
}

#[async_trait]
impl FlowStore for InMemoryStorage {
    async fn load_bot(&self, bot_id: &str) -> Result<Option<PublishedBot>, String> {
        Ok(self.bots.lock().unwrap().get(bot_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowStep;

    #[tokio::test]
    async fn test_mock_llm_client() {
        let client = MockLlmClient::new("test-model");
        client.queue_response(LlmResponse::text("book"));

        let request = LlmRequest::new("classify");
        let response = client.complete(&request).await.unwrap();
        assert_eq!(response.text, "book");
        assert_eq!(client.recorded_requests().len(), 1);

        // Queue exhausted: network error
        let err = client.complete(&request).await.unwrap_err();
        assert!(err.kind.is_retryable());
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryStorage::new().with_bot(
            "bot",
            Language::Hebrew,
            Flow {
                steps: vec![FlowStep::new("start", "hi")],
                edges: vec![],
            },
        );
        assert!(storage.load_bot("bot").await.unwrap().is_some());
        assert!(storage.load_bot("other").await.unwrap().is_none());

        for i in 0..4 {
            storage
                .append_turn("c", &ChatTurn::user(format!("m{i}"), None))
                .await
                .unwrap();
        }
        let recent = storage.recent_turns("c", 2).await.unwrap();
        assert_eq!(recent[0].text, "m2");
        assert_eq!(recent[1].text, "m3");

        storage.save_session(&Session::new("c", "bot")).await.unwrap();
        assert!(storage.reset_session("c").await.unwrap());
        assert!(storage.get_all_turns("c").is_empty());
        assert!(!storage.reset_session("c").await.unwrap());
    }
}
