//! Caller-facing wrapper around a live task's chunk stream and its
//! back-channel sender, so embedding code doesn't have to construct
//! [`CommunicatorMessage`] variants by hand. Grounded on the
//! request/response pairing `icc.rs` establishes for container<->runtime
//! traffic, generalized here to an in-process channel pair.

use futures::StreamExt;

use crate::contracts::{CommunicatorMessage, InteractionResponse, InteractionType, TaskStreamChunk};
use crate::facade::{ChunkStream, CommunicatorSender};

/// Pairs a live task's outbound chunk stream with the inbound channel used
/// to approve tool calls, send follow-up user messages, or close the
/// session early.
pub struct StreamSession {
    chunks: ChunkStream,
    communicator: CommunicatorSender,
}

impl StreamSession {
    pub fn new(chunks: ChunkStream, communicator: CommunicatorSender) -> Self {
        Self { chunks, communicator }
    }

    /// Pulls the next chunk, or `None` once the stream is exhausted.
    pub async fn next_chunk(&mut self) -> Option<TaskStreamChunk> {
        self.chunks.next().await
    }

    /// Drains the remaining chunks into a `Vec`, for callers that don't
    /// need incremental delivery.
    pub async fn collect_remaining(mut self) -> Vec<TaskStreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.chunks.next().await {
            chunks.push(chunk);
        }
        chunks
    }

    pub async fn approve_tool(&self, interaction_id: impl Into<String>) -> Result<(), SendError> {
        self.respond(interaction_id, true, None).await
    }

    pub async fn reject_tool(&self, interaction_id: impl Into<String>) -> Result<(), SendError> {
        self.respond(interaction_id, false, None).await
    }

    async fn respond(&self, interaction_id: impl Into<String>, approved: bool, response_data: Option<serde_json::Value>) -> Result<(), SendError> {
        let response = InteractionResponse {
            interaction_id: interaction_id.into(),
            interaction_type: InteractionType::ToolApproval,
            approved,
            response_data,
            user_message: None,
            metadata: Default::default(),
            timestamp: chrono::Utc::now(),
        };
        self.communicator
            .send(CommunicatorMessage::InteractionResponse(response))
            .await
            .map_err(|_| SendError::Closed)
    }

    pub async fn send_user_message(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.communicator
            .send(CommunicatorMessage::UserMessage(text.into()))
            .await
            .map_err(|_| SendError::Closed)
    }

    pub async fn close(&self) -> Result<(), SendError> {
        self.communicator.send(CommunicatorMessage::Close).await.map_err(|_| SendError::Closed)
    }

    /// Splits into the raw stream/sender pair, for callers that want to
    /// drive them independently (e.g. one task polling chunks, another
    /// posting approvals).
    pub fn into_parts(self) -> (ChunkStream, CommunicatorSender) {
        (self.chunks, self.communicator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The live task's receiving end has already dropped — the task
    /// finished or errored before the caller's message arrived.
    Closed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "communicator channel closed")
    }
}

impl std::error::Error for SendError {}
