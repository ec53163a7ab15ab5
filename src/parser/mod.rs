//! Tool-call extraction: the component that turns a linear token stream
//! interleaved with dialect-specific markup into structured tool calls.
//!
//! Two dialects are supported, modeled as tagged variants rather than an
//! inheritance hierarchy (there is no dynamic dispatch need -- the dialect
//! is fixed once per request, at construction time).

pub mod hermes;
pub mod mistral;

use crate::collaborators::Tokenizer;
use crate::config::ParserConfig;
use crate::error::StreamError;
use crate::protocol::{DeltaMessage, ExtractedToolCalls, PartialToolCall};
use serde_json::Value;

pub use hermes::HermesParser;
pub use mistral::MistralParser;

const MISTRAL_BOT_TOKEN: &str = "[TOOL_CALLS]";
const HERMES_START_TAG: &str = "<tool_call>";
const HERMES_END_TAG: &str = "</tool_call>";

/// Which wire dialect a model emits tool calls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallDialect {
    Mistral,
    Hermes2Pro,
}

/// One step of token production, as handed to the streaming extraction
/// entry point. Mirrors exactly what the (out-of-scope) inference engine
/// accumulates per iteration: the running text/token-id history plus the
/// slice newly produced this step.
#[derive(Debug, Clone, Default)]
pub struct TokenStep {
    pub previous_text: String,
    pub current_text: String,
    pub delta_text: String,
    pub previous_token_ids: Vec<u32>,
    pub current_token_ids: Vec<u32>,
    pub delta_token_ids: Vec<u32>,
}

/// Shared contract both dialects implement.
pub trait ToolCallParser {
    /// Parses a complete, final model output in one shot.
    fn extract_complete(&self, model_output: &str) -> ExtractedToolCalls;

    /// Advances parser state by one token step, returning the delta to
    /// forward to the client, or `None` if this step produces nothing to
    /// send (e.g. only structural JSON punctuation appeared).
    fn extract_streaming(&mut self, step: &TokenStep) -> Option<DeltaMessage>;

    /// Tool calls fully resolved so far, in the order they were opened.
    fn prev_tool_call_arr(&self) -> &[PartialToolCall];

    /// The JSON-stringified `arguments` text already streamed to the
    /// client for each tool call, indexed the same as `prev_tool_call_arr`.
    /// Used by the driver to flush any trailing characters that partial
    /// JSON parsing resolved but never got to emit as their own delta.
    fn streamed_args_for_tool(&self) -> &[String];
}

/// Converts one parsed JSON object in the tool-call array into its typed
/// partial form. Non-object values (shouldn't occur in well-formed
/// dialects) become an empty partial call rather than panicking.
pub(crate) fn value_to_partial(v: &Value) -> PartialToolCall {
    PartialToolCall {
        name: v.get("name").and_then(Value::as_str).map(String::from),
        arguments: v.get("arguments").cloned(),
    }
}

/// Dispatches to the dialect selected at construction time.
#[derive(Debug)]
pub enum ToolCallParserKind {
    Mistral(MistralParser),
    Hermes2Pro(HermesParser),
}

impl ToolCallParserKind {
    pub fn mistral(trigger_token_id: u32) -> Self {
        ToolCallParserKind::Mistral(MistralParser::new(trigger_token_id))
    }

    pub fn hermes2pro(start_token_id: u32, end_token_id: u32) -> Self {
        ToolCallParserKind::Hermes2Pro(HermesParser::new(start_token_id, end_token_id))
    }

    /// Builds the configured dialect's parser, resolving trigger token ids
    /// against `tokenizer`. Fails with [`StreamError::Configuration`] when
    /// a dialect's required tag tokens aren't in the tokenizer's
    /// vocabulary under their exact literal spelling -- the server should
    /// surface this as an HTTP 400 before streaming begins, never mid-stream.
    pub fn from_config(
        config: &ParserConfig,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Self, StreamError> {
        match config.dialect {
            ToolCallDialect::Mistral => {
                let trigger = config
                    .trigger_token_id
                    .or_else(|| tokenizer.token_id(MISTRAL_BOT_TOKEN))
                    .ok_or_else(|| {
                        StreamError::Configuration(format!(
                            "mistral tool parser requires a token id for {MISTRAL_BOT_TOKEN}"
                        ))
                    })?;
                Ok(Self::mistral(trigger))
            }
            ToolCallDialect::Hermes2Pro => {
                let start = tokenizer.token_id(HERMES_START_TAG).ok_or_else(|| {
                    StreamError::Configuration(format!(
                        "hermes tool parser requires a token id for {HERMES_START_TAG}"
                    ))
                })?;
                let end = tokenizer.token_id(HERMES_END_TAG).ok_or_else(|| {
                    StreamError::Configuration(format!(
                        "hermes tool parser requires a token id for {HERMES_END_TAG}"
                    ))
                })?;
                Ok(Self::hermes2pro(start, end))
            }
        }
    }
}

impl ToolCallParser for ToolCallParserKind {
    fn extract_complete(&self, model_output: &str) -> ExtractedToolCalls {
        match self {
            ToolCallParserKind::Mistral(p) => p.extract_complete(model_output),
            ToolCallParserKind::Hermes2Pro(p) => p.extract_complete(model_output),
        }
    }

    fn extract_streaming(&mut self, step: &TokenStep) -> Option<DeltaMessage> {
        match self {
            ToolCallParserKind::Mistral(p) => p.extract_streaming(step),
            ToolCallParserKind::Hermes2Pro(p) => p.extract_streaming(step),
        }
    }

    fn prev_tool_call_arr(&self) -> &[PartialToolCall] {
        match self {
            ToolCallParserKind::Mistral(p) => p.prev_tool_call_arr(),
            ToolCallParserKind::Hermes2Pro(p) => p.prev_tool_call_arr(),
        }
    }

    fn streamed_args_for_tool(&self) -> &[String] {
        match self {
            ToolCallParserKind::Mistral(p) => p.streamed_args_for_tool(),
            ToolCallParserKind::Hermes2Pro(p) => p.streamed_args_for_tool(),
        }
    }
}
