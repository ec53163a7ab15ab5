//! OpenAI Chat Completion streaming wire types.
//!
//! These are the entities C3 (the chunk shaper) produces and C4 (the
//! driver) serializes one-per-line into an SSE body. Field order matches
//! the OpenAI API so a byte-for-byte diff against a real server's output
//! stays readable; `serde_json`'s `preserve_order` feature keeps
//! `arguments` (a `Value` built incrementally) serializing with its keys
//! in insertion order, which downstream invariant 2 in the data model
//! depends on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// One fully-extracted tool call, as returned by `extract_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Result of running the complete (non-streaming) extraction path over a
/// full model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedToolCalls {
    pub tools_called: bool,
    pub tool_calls: Vec<ToolCall>,
    pub content: Option<String>,
}

/// A tool call as it exists mid-stream: fields fill in independently and
/// `arguments` is a growing `Value`, not yet stringified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialToolCall {
    pub name: Option<String>,
    pub arguments: Option<serde_json::Value>,
}

/// Delta payload for one streamed tool-call slot.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaFunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaToolCall {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<DeltaFunctionCall>,
}

/// The `delta` field of a streaming choice.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeltaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionLogProb {
    pub token: String,
    pub logprob: f64,
    pub bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<Vec<ChatCompletionLogProb>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChoiceLogProbs {
    pub content: Vec<ChatCompletionLogProb>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamChoice {
    pub index: usize,
    pub delta: DeltaMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<ChoiceLogProbs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// The literal stop string/token id that ended generation, when the
    /// engine stopped on a user-supplied stop criterion rather than EOS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single `data: ...` SSE payload in an OpenAI-compatible stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk",
            created,
            model: model.into(),
            choices: Vec::new(),
            usage: None,
        }
    }

    /// Serializes to the exact `data: {...}` line the sink should write,
    /// without the trailing blank line SSE framing requires.
    pub fn to_sse_data(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}", serde_json::to_string(self)?))
    }
}

/// The terminal `data: [DONE]` sentinel line.
pub const DONE_LINE: &str = "data: [DONE]";
