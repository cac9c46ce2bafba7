use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::base::{ForwardInput, Forwarder};
use crate::errors::ProviderError;
use crate::models::message::{FinishReason, Message};

/// A mock forwarder that returns pre-configured responses for testing
pub struct MockForwarder {
    responses: Arc<Mutex<Vec<Message>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockForwarder {
    /// Create a new mock forwarder with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every history the mock was asked to complete, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for MockForwarder {
    async fn complete(
        &self,
        _input: &ForwardInput,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.requests.lock().unwrap().push(history.to_vec());

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return an empty stop if no more pre-configured responses
            Ok(Message::assistant().with_finish_reason(FinishReason::Stop))
        } else {
            Ok(responses.remove(0))
        }
    }
}
