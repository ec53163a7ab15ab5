//! Chunk shaper (C3): pure functions turning driver state into the SSE
//! envelopes of the OpenAI Chat Completion streaming contract. None of
//! these functions hold state or await anything -- every decision the
//! driver needs (continuous usage vs. final-only, role vs. content vs.
//! terminal) is a parameter.

use crate::collaborators::{RawTokenLogprob, Tokenizer};
use crate::protocol::{
    ChatCompletionLogProb, ChoiceLogProbs, DeltaMessage, FinishReason, StreamChoice, StreamChunk,
    Usage,
};

/// The very first chunk sent for a choice: a bare `role` delta, no
/// content yet.
pub fn role_chunk(
    id: &str,
    model: &str,
    created: i64,
    index: usize,
    role: &str,
    usage: Option<Usage>,
) -> StreamChunk {
    let mut chunk = StreamChunk::new(id, model, created);
    chunk.choices.push(StreamChoice {
        index,
        delta: DeltaMessage {
            role: Some(role.to_string()),
            ..Default::default()
        },
        logprobs: None,
        finish_reason: None,
        stop_reason: None,
    });
    chunk.usage = usage;
    chunk
}

/// The echo chunk mirroring the final user message back to the client,
/// sent once per choice right after the role chunk when the request asks
/// for it.
pub fn echo_chunk(
    id: &str,
    model: &str,
    created: i64,
    index: usize,
    content: &str,
    usage: Option<Usage>,
) -> StreamChunk {
    let mut chunk = StreamChunk::new(id, model, created);
    chunk.choices.push(StreamChoice {
        index,
        delta: DeltaMessage {
            content: Some(content.to_string()),
            ..Default::default()
        },
        logprobs: None,
        finish_reason: None,
        stop_reason: None,
    });
    chunk.usage = usage;
    chunk
}

/// A mid-stream content/tool-call delta chunk, sent with no
/// `finish_reason` yet.
pub fn content_chunk(
    id: &str,
    model: &str,
    created: i64,
    index: usize,
    delta: DeltaMessage,
    logprobs: Option<ChoiceLogProbs>,
    usage: Option<Usage>,
) -> StreamChunk {
    let mut chunk = StreamChunk::new(id, model, created);
    chunk.choices.push(StreamChoice {
        index,
        delta,
        logprobs,
        finish_reason: None,
        stop_reason: None,
    });
    chunk.usage = usage;
    chunk
}

/// The terminal chunk for a choice, carrying the (possibly overridden)
/// finish reason. Sent exactly once per choice.
pub fn terminal_chunk(
    id: &str,
    model: &str,
    created: i64,
    index: usize,
    delta: DeltaMessage,
    logprobs: Option<ChoiceLogProbs>,
    finish_reason: FinishReason,
    stop_reason: Option<String>,
    usage: Option<Usage>,
) -> StreamChunk {
    let mut chunk = StreamChunk::new(id, model, created);
    chunk.choices.push(StreamChoice {
        index,
        delta,
        logprobs,
        finish_reason: Some(finish_reason),
        stop_reason,
    });
    chunk.usage = usage;
    chunk
}

/// The final, choiceless usage-only chunk sent right before `[DONE]`
/// when the request asked for usage but not continuous usage stats.
pub fn final_usage_chunk(id: &str, model: &str, created: i64, usage: Usage) -> StreamChunk {
    let mut chunk = StreamChunk::new(id, model, created);
    chunk.usage = Some(usage);
    chunk
}

/// If a tool call's `finish_reason` is being overridden (because the
/// parser knows tool calls were opened, regardless of what the engine's
/// own finish reason was), this is the one substitution rule spec.md
/// names: `ToolCalls` whenever any tool call is open, full stop.
pub fn effective_finish_reason(
    engine_finish_reason: FinishReason,
    any_tool_call_open: bool,
) -> FinishReason {
    if any_tool_call_open {
        FinishReason::ToolCalls
    } else {
        engine_finish_reason
    }
}

/// Decodes one token id through `tokenizer`, or renders it as
/// `"token_id:N"` when `return_tokens_as_token_ids` is set -- the two
/// presentations the wire format allows for a single token.
fn decode_token(tokenizer: &dyn Tokenizer, token_id: u32, return_tokens_as_token_ids: bool) -> String {
    if return_tokens_as_token_ids {
        format!("token_id:{token_id}")
    } else {
        tokenizer.decode(&[token_id])
    }
}

/// Turns one step's raw per-token logprobs into the wire-shaped
/// `ChoiceLogProbs` the OpenAI streaming contract expects, decoding every
/// token id (including alternates) through `tokenizer`.
pub fn render_logprobs(
    raw: &[RawTokenLogprob],
    tokenizer: &dyn Tokenizer,
    return_tokens_as_token_ids: bool,
) -> ChoiceLogProbs {
    let content = raw
        .iter()
        .map(|entry| {
            let token = decode_token(tokenizer, entry.token_id, return_tokens_as_token_ids);
            let top_logprobs = if entry.top_logprobs.is_empty() {
                None
            } else {
                Some(
                    entry
                        .top_logprobs
                        .iter()
                        .map(|(id, logprob)| {
                            let token = decode_token(tokenizer, *id, return_tokens_as_token_ids);
                            ChatCompletionLogProb {
                                bytes: Some(token.clone().into_bytes()),
                                token,
                                logprob: logprob.max(-9999.0),
                                top_logprobs: None,
                            }
                        })
                        .collect(),
                )
            };
            ChatCompletionLogProb {
                bytes: Some(token.clone().into_bytes()),
                token,
                logprob: entry.logprob.max(-9999.0),
                top_logprobs,
            }
        })
        .collect();
    ChoiceLogProbs { content }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticTokenizer;

    #[test]
    fn role_chunk_has_no_content_or_finish_reason() {
        let c = role_chunk("id1", "m", 0, 0, "assistant", None);
        assert_eq!(c.choices[0].delta.role.as_deref(), Some("assistant"));
        assert!(c.choices[0].delta.content.is_none());
        assert!(c.choices[0].finish_reason.is_none());
    }

    #[test]
    fn effective_finish_reason_overrides_to_tool_calls() {
        assert_eq!(
            effective_finish_reason(FinishReason::Stop, true),
            FinishReason::ToolCalls
        );
        assert_eq!(
            effective_finish_reason(FinishReason::Stop, false),
            FinishReason::Stop
        );
    }

    #[test]
    fn terminal_chunk_carries_stop_reason_through() {
        let c = terminal_chunk(
            "id1",
            "m",
            0,
            0,
            DeltaMessage::default(),
            None,
            FinishReason::Stop,
            Some("</s>".to_string()),
            None,
        );
        assert_eq!(c.choices[0].stop_reason.as_deref(), Some("</s>"));
    }

    #[test]
    fn to_sse_data_has_data_prefix_and_no_trailing_newline() {
        let c = role_chunk("id1", "m", 0, 0, "assistant", None);
        let line = c.to_sse_data().unwrap();
        assert!(line.starts_with("data: {"));
        assert!(!line.ends_with('\n'));
    }

    #[test]
    fn render_logprobs_decodes_tokens_and_alternates() {
        let tokenizer = StaticTokenizer::default();
        let raw = vec![RawTokenLogprob {
            token_id: 7,
            logprob: -0.1,
            top_logprobs: vec![(7, -0.1), (9, -2.5)],
        }];
        let rendered = render_logprobs(&raw, &tokenizer, false);
        assert_eq!(rendered.content[0].token, "tok7");
        let top = rendered.content[0].top_logprobs.as_ref().unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].token, "tok9");
    }

    #[test]
    fn render_logprobs_respects_return_tokens_as_token_ids() {
        let tokenizer = StaticTokenizer::default();
        let raw = vec![RawTokenLogprob {
            token_id: 7,
            logprob: -0.1,
            top_logprobs: vec![],
        }];
        let rendered = render_logprobs(&raw, &tokenizer, true);
        assert_eq!(rendered.content[0].token, "token_id:7");
        assert!(rendered.content[0].top_logprobs.is_none());
    }

    #[test]
    fn render_logprobs_clamps_logprob_floor() {
        let tokenizer = StaticTokenizer::default();
        let raw = vec![RawTokenLogprob {
            token_id: 1,
            logprob: -50000.0,
            top_logprobs: vec![],
        }];
        let rendered = render_logprobs(&raw, &tokenizer, false);
        assert_eq!(rendered.content[0].logprob, -9999.0);
    }
}
