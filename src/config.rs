//! Configuration surface for the parser and the stream driver.
//!
//! Follows the teacher's plain-struct-with-`Default` pattern rather than a
//! builder: every field is public, callers construct with
//! `..Default::default()` when they only need to override one or two
//! values.

use crate::parser::ToolCallDialect;

/// Configuration for a single tool-call parser instance.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Which wire dialect the model emits tool calls in.
    pub dialect: ToolCallDialect,
    /// Token id of the dialect's trigger token (e.g. Mistral's
    /// `[TOOL_CALLS]`), when the tokenizer assigns one. `None` falls back
    /// to detecting the literal text instead.
    pub trigger_token_id: Option<u32>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            dialect: ToolCallDialect::Mistral,
            trigger_token_id: Some(5),
        }
    }
}

/// Configuration for the stream driver shaping SSE chunks for one request.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Model name echoed into every chunk's `model` field.
    pub model: String,
    /// `role` value sent in the first chunk of each choice (normally
    /// `"assistant"`).
    pub response_role: String,
    /// Whether every chunk (not just the final one) carries a running
    /// usage snapshot (`continuous_usage_stats`). Whether a usage chunk is
    /// sent at all is a per-request choice (`DriverRequest::include_usage`);
    /// this only controls the mid-stream chunks once that's decided.
    pub continuous_usage_stats: bool,
    /// Render logprob tokens as `"token_id:N"` instead of decoded text.
    pub return_tokens_as_token_ids: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            response_role: "assistant".to_string(),
            continuous_usage_stats: false,
            return_tokens_as_token_ids: false,
        }
    }
}
