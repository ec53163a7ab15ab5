//! Stream driver (C4): the only component in this crate that awaits
//! anything. Pulls engine steps from a [`TokenSource`], dispatches each
//! step's per-choice delta through either a named-tool-choice bypass, the
//! auto-tool-choice parser, or plain content passthrough, shapes the
//! result into SSE chunks via [`crate::shaper`], and writes them to an
//! [`SseSink`]. Mirrors the teacher's `chat_loop` in spirit: a single
//! async task per request, reading from one channel-like source and
//! writing to another.

use std::collections::HashMap;

use futures::StreamExt;

use crate::collaborators::{DisconnectWatcher, EngineStepOutput, SseSink, TokenSource, Tokenizer};
use crate::config::ServerConfig;
use crate::error::{StreamError, StreamResult};
use crate::parser::{TokenStep, ToolCallParser};
use crate::protocol::{
    DeltaFunctionCall, DeltaMessage, DeltaToolCall, FinishReason, Usage, DONE_LINE,
};
use crate::shaper;

/// How the request asked for tool calls to be handled; resolved by the
/// out-of-scope HTTP layer before the driver is invoked.
pub enum ToolChoiceMode {
    /// No tools in play; every delta is plain content.
    None,
    /// Dispatch through the configured [`ToolCallParser`].
    Auto,
    /// The caller pinned a single function name; every delta_text is
    /// forwarded verbatim as that function's arguments, bypassing the
    /// parser entirely.
    Named(String),
}

/// Everything the driver needs for one request beyond the token source
/// itself, gathered up front by the out-of-scope HTTP layer.
pub struct DriverRequest<P> {
    pub request_id: String,
    pub created: i64,
    pub config: ServerConfig,
    pub tool_choice: ToolChoiceMode,
    pub parser: Option<P>,
    /// Resolved echo content, when the request set `echo: true`; `None`
    /// means either `echo` was false or the last message was empty.
    pub echo_content: Option<String>,
    pub include_usage: bool,
    /// Decodes token ids for logprob rendering; `None` when the request
    /// didn't ask for logprobs, in which case any `logprobs` an engine
    /// step carries are ignored rather than causing an error.
    pub tokenizer: Option<Box<dyn Tokenizer + Send>>,
}

#[derive(Default)]
struct ChoiceState {
    previous_text: String,
    previous_token_len: usize,
    finish_reason_sent: bool,
}

/// Runs the streaming loop for one request to completion, writing every
/// chunk (including the terminal `[DONE]` line) to `sink`.
pub async fn drive<P, TS, DW, SK>(
    mut req: DriverRequest<P>,
    mut source: TS,
    mut disconnect: DW,
    sink: &mut SK,
) -> StreamResult<()>
where
    P: ToolCallParser,
    TS: TokenSource + Unpin,
    DW: DisconnectWatcher,
    SK: SseSink,
{
    let mut first_iteration = true;
    let mut choice_states: HashMap<usize, ChoiceState> = HashMap::new();
    let mut last_prompt_tokens = 0u32;
    let mut last_completion_tokens = 0u32;

    loop {
        let step = tokio::select! {
            _ = disconnect.disconnected() => {
                crate::logger::log(format!("client disconnected, aborting {}", req.request_id));
                return Err(StreamError::ClientDisconnect);
            }
            next = source.next() => next,
        };

        let step = match step {
            None => break,
            Some(Err(e)) => {
                crate::logger::log(format!("engine error, terminating stream: {e}"));
                log::error!("engine error, terminating stream: {e}");
                sink.send_line(&error_chunk_line(&e)).await?;
                sink.send_line(DONE_LINE).await?;
                return Err(e);
            }
            Some(Ok(step)) => step,
        };

        last_prompt_tokens = step.prompt_tokens;

        if first_iteration {
            emit_preamble(&req, &step, sink).await?;
            first_iteration = false;
        }

        for choice in &step.outputs {
            let state = choice_states.entry(choice.index).or_default();
            if state.finish_reason_sent {
                continue;
            }

            let delta_text = choice.text[state.previous_text.len()..].to_string();
            let delta_token_ids = choice.token_ids[state.previous_token_len..].to_vec();

            let token_step = TokenStep {
                previous_text: state.previous_text.clone(),
                current_text: choice.text.clone(),
                delta_text: delta_text.clone(),
                previous_token_ids: choice.token_ids[..state.previous_token_len].to_vec(),
                current_token_ids: choice.token_ids.clone(),
                delta_token_ids,
            };

            let delta_message = match &req.tool_choice {
                ToolChoiceMode::Named(name) => Some(named_choice_delta(name, &delta_text)),
                ToolChoiceMode::Auto => req
                    .parser
                    .as_mut()
                    .and_then(|p| p.extract_streaming(&token_step)),
                ToolChoiceMode::None => Some(DeltaMessage {
                    content: Some(delta_text.clone()),
                    ..Default::default()
                }),
            };

            state.previous_text = choice.text.clone();
            state.previous_token_len = choice.token_ids.len();
            last_completion_tokens = choice.token_ids.len() as u32;

            let logprobs = choice.logprobs.as_ref().and_then(|raw| {
                req.tokenizer.as_deref().map(|tokenizer| {
                    shaper::render_logprobs(raw, tokenizer, req.config.return_tokens_as_token_ids)
                })
            });

            let Some(mut delta_message) = delta_message else {
                continue;
            };

            match choice.finish_reason {
                None => {
                    let usage = usage_for(&req, step.prompt_tokens, choice.token_ids.len() as u32);
                    let chunk = shaper::content_chunk(
                        &req.request_id,
                        &req.config.model,
                        req.created,
                        choice.index,
                        delta_message,
                        logprobs,
                        usage,
                    );
                    sink.send_line(&chunk.to_sse_data()?).await?;
                }
                Some(engine_finish_reason) => {
                    if let Some(parser) = &req.parser {
                        if should_flush_remaining(&delta_message, engine_finish_reason) {
                            delta_message = flush_remaining(parser);
                        }
                    }

                    let any_tool_call_open = req
                        .parser
                        .as_ref()
                        .map(|p| !p.prev_tool_call_arr().is_empty())
                        .unwrap_or(false);
                    let finish_reason =
                        shaper::effective_finish_reason(engine_finish_reason, any_tool_call_open);

                    let usage = usage_for(&req, step.prompt_tokens, choice.token_ids.len() as u32);
                    let chunk = shaper::terminal_chunk(
                        &req.request_id,
                        &req.config.model,
                        req.created,
                        choice.index,
                        delta_message,
                        logprobs,
                        finish_reason,
                        choice.stop_reason.clone(),
                        usage,
                    );
                    sink.send_line(&chunk.to_sse_data()?).await?;
                    state.finish_reason_sent = true;
                }
            }
        }
    }

    if req.include_usage {
        let usage = Usage {
            prompt_tokens: last_prompt_tokens,
            completion_tokens: last_completion_tokens,
            total_tokens: last_prompt_tokens + last_completion_tokens,
        };
        let chunk =
            shaper::final_usage_chunk(&req.request_id, &req.config.model, req.created, usage);
        sink.send_line(&chunk.to_sse_data()?).await?;
    }

    sink.send_line(DONE_LINE).await?;
    Ok(())
}

async fn emit_preamble<P, SK: SseSink>(
    req: &DriverRequest<P>,
    step: &EngineStepOutput,
    sink: &mut SK,
) -> StreamResult<()> {
    for choice in &step.outputs {
        let usage = usage_for(req, step.prompt_tokens, 0);
        let chunk = shaper::role_chunk(
            &req.request_id,
            &req.config.model,
            req.created,
            choice.index,
            &req.config.response_role,
            usage,
        );
        sink.send_line(&chunk.to_sse_data()?).await?;
    }

    if let Some(content) = &req.echo_content {
        for choice in &step.outputs {
            let usage = usage_for(req, step.prompt_tokens, 0);
            let chunk = shaper::echo_chunk(
                &req.request_id,
                &req.config.model,
                req.created,
                choice.index,
                content,
                usage,
            );
            sink.send_line(&chunk.to_sse_data()?).await?;
        }
    }
    Ok(())
}

fn usage_for<P>(req: &DriverRequest<P>, prompt_tokens: u32, completion_tokens: u32) -> Option<Usage> {
    if !req.include_usage || !req.config.continuous_usage_stats {
        return None;
    }
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    })
}

/// Builds the `{"error": {"message", "type", "code"}}` payload §6 of the
/// spec requires for a mid-stream engine failure.
fn error_chunk_line(err: &StreamError) -> String {
    let (error_type, code) = match err {
        StreamError::Engine(_) => ("engine_error", "internal_error"),
        StreamError::Parse(_) => ("parse_error", "internal_error"),
        StreamError::Json(_) => ("serialization_error", "internal_error"),
        StreamError::Sink(_) => ("sink_error", "internal_error"),
        StreamError::Configuration(_) => ("configuration_error", "internal_error"),
        StreamError::Validation(_) => ("validation_error", "invalid_request"),
        StreamError::ClientDisconnect => ("client_disconnect", "internal_error"),
    };
    let payload = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": error_type,
            "code": code,
        }
    });
    format!("data: {payload}")
}

fn named_choice_delta(function_name: &str, delta_text: &str) -> DeltaMessage {
    DeltaMessage {
        tool_calls: Some(vec![DeltaToolCall {
            index: 0,
            id: None,
            r#type: None,
            function: Some(DeltaFunctionCall {
                name: Some(function_name.to_string()),
                arguments: Some(delta_text.to_string()),
            }),
        }]),
        ..Default::default()
    }
}

/// Mirrors the original's "did we forget any auto-completed characters"
/// guard: only relevant if this chunk actually carries tool-call
/// arguments and the stream is ending normally.
fn should_flush_remaining(delta: &DeltaMessage, finish_reason: FinishReason) -> bool {
    let Some(tool_calls) = &delta.tool_calls else {
        return false;
    };
    let Some(first) = tool_calls.first() else {
        return false;
    };
    let Some(function) = &first.function else {
        return false;
    };
    match &function.arguments {
        Some(args) if args.is_empty() => true,
        Some(_) => matches!(finish_reason, FinishReason::Stop | FinishReason::ToolCalls),
        None => false,
    }
}

fn flush_remaining<P: ToolCallParser>(parser: &P) -> DeltaMessage {
    let arr = parser.prev_tool_call_arr();
    let Some(idx) = arr.len().checked_sub(1) else {
        return DeltaMessage::default();
    };
    let expected = arr[idx]
        .arguments
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));
    let expected_json = serde_json::to_string(&expected).unwrap_or_default();
    let streamed = parser
        .streamed_args_for_tool()
        .get(idx)
        .cloned()
        .unwrap_or_default();
    let remaining = expected_json
        .strip_prefix(streamed.as_str())
        .unwrap_or(&expected_json)
        .to_string();

    DeltaMessage {
        tool_calls: Some(vec![DeltaToolCall {
            index: idx,
            id: None,
            r#type: None,
            function: Some(DeltaFunctionCall {
                name: None,
                arguments: Some(remaining),
            }),
        }]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChoiceStepOutput, CollectingSink, NeverDisconnects};
    use crate::parser::ToolCallParserKind;
    use futures::stream;

    fn cfg() -> ServerConfig {
        ServerConfig {
            model: "test-model".to_string(),
            ..Default::default()
        }
    }

    fn plain_req() -> DriverRequest<ToolCallParserKind> {
        DriverRequest {
            request_id: "req-1".to_string(),
            created: 0,
            config: cfg(),
            tool_choice: ToolChoiceMode::None,
            parser: None,
            echo_content: None,
            include_usage: false,
            tokenizer: None,
        }
    }

    #[tokio::test]
    async fn plain_text_stream_emits_role_content_and_done() {
        let source2 = stream::iter(vec![
            Ok(EngineStepOutput {
                prompt_tokens: 3,
                outputs: vec![ChoiceStepOutput {
                    index: 0,
                    text: "Hi".to_string(),
                    token_ids: vec![1, 2],
                    finish_reason: None,
                    stop_reason: None,
                    logprobs: None,
                }],
            }),
            Ok(EngineStepOutput {
                prompt_tokens: 3,
                outputs: vec![ChoiceStepOutput {
                    index: 0,
                    text: "Hi there".to_string(),
                    token_ids: vec![1, 2, 3, 4],
                    finish_reason: Some(FinishReason::Stop),
                    stop_reason: None,
                    logprobs: None,
                }],
            }),
        ]);
        let mut sink2 = CollectingSink::default();
        drive(plain_req(), source2, NeverDisconnects, &mut sink2)
            .await
            .unwrap();

        assert!(sink2.lines[0].contains("\"role\":\"assistant\""));
        assert!(sink2.lines.last().unwrap() == DONE_LINE);
        assert!(sink2.lines.iter().any(|l| l.contains("\"content\":\"Hi\"")));
        assert!(sink2
            .lines
            .iter()
            .any(|l| l.contains("\"finish_reason\":\"stop\"")));
    }

    #[tokio::test]
    async fn engine_error_emits_structured_error_chunk_then_done() {
        let source = stream::iter(vec![Err(StreamError::Engine("backend crashed".to_string()))]);
        let mut sink = CollectingSink::default();
        let result = drive(plain_req(), source, NeverDisconnects, &mut sink).await;

        assert!(matches!(result, Err(StreamError::Engine(_))));
        assert!(sink.lines[0].contains("\"type\":\"engine_error\""));
        assert!(sink.lines[0].contains("backend crashed"));
        assert_eq!(sink.lines.last().unwrap(), DONE_LINE);
    }
}
