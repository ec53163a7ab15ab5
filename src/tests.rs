//! End-to-end scenarios exercising the driver, parsers, and shaper
//! together against fake collaborators. Per-module unit tests live
//! alongside their code; this file is reserved for the cross-cutting
//! scenarios that only make sense wired end to end.

use async_trait::async_trait;
use futures::stream;

use crate::collaborators::{ChoiceStepOutput, CollectingSink, DisconnectWatcher, EngineStepOutput};
use crate::config::ServerConfig;
use crate::driver::{drive, DriverRequest, ToolChoiceMode};
use crate::error::StreamError;
use crate::parser::{ToolCallParser, ToolCallParserKind};
use crate::protocol::FinishReason;

fn cfg() -> ServerConfig {
    ServerConfig {
        model: "test-model".to_string(),
        ..Default::default()
    }
}

struct NeverDisconnects;

#[async_trait]
impl DisconnectWatcher for NeverDisconnects {
    async fn disconnected(&mut self) {
        std::future::pending::<()>().await;
    }
}

struct ImmediateDisconnect;

#[async_trait]
impl DisconnectWatcher for ImmediateDisconnect {
    async fn disconnected(&mut self) {}
}

fn choice(index: usize, text: &str, token_ids: Vec<u32>, finish: Option<FinishReason>) -> ChoiceStepOutput {
    ChoiceStepOutput {
        index,
        text: text.to_string(),
        token_ids,
        finish_reason: finish,
        stop_reason: None,
        logprobs: None,
    }
}

fn step(prompt_tokens: u32, outputs: Vec<ChoiceStepOutput>) -> Result<EngineStepOutput, StreamError> {
    Ok(EngineStepOutput {
        prompt_tokens,
        outputs,
    })
}

/// Scenario 1: plain text, no tool markup at all.
#[tokio::test]
async fn scenario_plain_text() {
    let source = stream::iter(vec![
        step(2, vec![choice(0, "Hello", vec![10, 11], None)]),
        step(2, vec![choice(0, "Hello world", vec![10, 11, 12], Some(FinishReason::Stop))]),
    ]);
    let mut sink = CollectingSink::default();
    let req = DriverRequest::<ToolCallParserKind> {
        request_id: "r1".to_string(),
        created: 0,
        config: cfg(),
        tool_choice: ToolChoiceMode::None,
        parser: None,
        echo_content: None,
        include_usage: false,
        tokenizer: None,
    };

    drive(req, source, NeverDisconnects, &mut sink).await.unwrap();

    assert!(sink.lines[0].contains("\"role\":\"assistant\""));
    assert!(sink.lines.iter().any(|l| l.contains("\"content\":\"Hello\"")));
    assert!(sink.lines.iter().any(|l| l.contains("\"finish_reason\":\"stop\"")));
    assert_eq!(sink.lines.last().unwrap(), "data: [DONE]");
}

/// Scenario 2: a single Mistral tool call whose tokens arrive split
/// across several steps, including a mid-string split.
#[tokio::test]
async fn scenario_mistral_single_tool_call_split_tokens() {
    let bot = "[TOOL_CALLS]";

    let steps = vec![
        step(
            4,
            vec![choice(0, &format!("{bot}[{{'name': 'get_weather'"), vec![5, 6], None)],
        ),
        step(
            4,
            vec![choice(
                0,
                &format!("{bot}[{{'name': 'get_weather', 'arguments'"),
                vec![5, 6, 7, 8],
                None,
            )],
        ),
        step(
            4,
            vec![choice(
                0,
                &format!("{bot}[{{'name': 'get_weather', 'arguments': {{'city': 'Paris'}}}}]"),
                vec![5, 6, 7, 8, 9, 10, 11],
                Some(FinishReason::Stop),
            )],
        ),
    ];
    let source = stream::iter(steps);
    let mut sink = CollectingSink::default();
    let req = DriverRequest {
        request_id: "r2".to_string(),
        created: 0,
        config: cfg(),
        tool_choice: ToolChoiceMode::Auto,
        parser: Some(ToolCallParserKind::mistral(5)),
        echo_content: None,
        include_usage: false,
        tokenizer: None,
    };

    drive(req, source, NeverDisconnects, &mut sink).await.unwrap();

    assert!(sink.lines.iter().any(|l| l.contains("\"id\":\"call_0\"")));
    assert!(sink.lines.iter().any(|l| l.contains("get_weather")));
    assert!(sink
        .lines
        .iter()
        .any(|l| l.contains("\"finish_reason\":\"tool_calls\"")));
    assert_eq!(sink.lines.last().unwrap(), "data: [DONE]");
}

/// Scenario 3: two sequential Hermes tool calls in one response, tokens
/// arriving one (or a couple) at a time the way a real engine would.
#[tokio::test]
async fn scenario_hermes_two_sequential_tool_calls() {
    let a_open = "<tool_call>{\"name\": \"a\"";
    let a_closed_obj = "<tool_call>{\"name\": \"a\", \"arguments\": {\"x\": 1}}";
    let a_full = format!("{a_closed_obj}</tool_call>");
    let b_open = format!("{a_full}<tool_call>{{\"name\": \"b\"");
    let b_full = format!(
        "{a_full}<tool_call>{{\"name\": \"b\", \"arguments\": {{\"y\": 2}}}}</tool_call>"
    );

    let steps = vec![
        step(4, vec![choice(0, a_open, vec![100, 1], None)]),
        step(4, vec![choice(0, a_closed_obj, vec![100, 1, 2], None)]),
        step(4, vec![choice(0, &a_full, vec![100, 1, 2, 101], None)]),
        step(4, vec![choice(0, &b_open, vec![100, 1, 2, 101, 100, 3], None)]),
        step(
            4,
            vec![choice(
                0,
                &b_full,
                vec![100, 1, 2, 101, 100, 3, 4, 101],
                Some(FinishReason::Stop),
            )],
        ),
    ];
    let source = stream::iter(steps);
    let mut sink = CollectingSink::default();
    let req = DriverRequest {
        request_id: "r3".to_string(),
        created: 0,
        config: cfg(),
        tool_choice: ToolChoiceMode::Auto,
        parser: Some(ToolCallParserKind::hermes2pro(100, 101)),
        echo_content: None,
        include_usage: false,
        tokenizer: None,
    };

    drive(req, source, NeverDisconnects, &mut sink).await.unwrap();

    assert!(sink.lines.iter().any(|l| l.contains("\"id\":\"call_0\"")));
    assert!(sink.lines.iter().any(|l| l.contains("\"id\":\"call_1\"")));
    assert_eq!(sink.lines.last().unwrap(), "data: [DONE]");
}

/// Scenario 4: Hermes free text followed by a single tool call.
#[tokio::test]
async fn scenario_hermes_free_text_then_tool_call() {
    let steps = vec![
        step(3, vec![choice(0, "Sure, one moment. ", vec![1, 2, 3], None)]),
        step(
            3,
            vec![choice(
                0,
                "Sure, one moment. <tool_call>{\"name\": \"ping\", \"arguments\": {}}</tool_call>",
                vec![1, 2, 3, 100, 4, 5, 101],
                Some(FinishReason::Stop),
            )],
        ),
    ];
    let source = stream::iter(steps);
    let mut sink = CollectingSink::default();
    let req = DriverRequest {
        request_id: "r4".to_string(),
        created: 0,
        config: cfg(),
        tool_choice: ToolChoiceMode::Auto,
        parser: Some(ToolCallParserKind::hermes2pro(100, 101)),
        echo_content: None,
        include_usage: false,
        tokenizer: None,
    };

    drive(req, source, NeverDisconnects, &mut sink).await.unwrap();

    assert!(sink.lines.iter().any(|l| l.contains("Sure, one moment.")));
    assert_eq!(sink.lines.last().unwrap(), "data: [DONE]");
}

/// Scenario 5: client disconnects mid-stream; no finish chunk, no
/// `[DONE]` -- the driver surfaces `StreamError::ClientDisconnect` for
/// the caller to act on (e.g. abort the engine request).
#[tokio::test]
async fn scenario_client_disconnect_mid_stream() {
    // A source that never yields: the only branch that can ever resolve
    // is the disconnect watcher, so the outcome is deterministic.
    let source = stream::pending::<Result<EngineStepOutput, StreamError>>();
    let mut sink = CollectingSink::default();
    let req = DriverRequest::<ToolCallParserKind> {
        request_id: "r5".to_string(),
        created: 0,
        config: cfg(),
        tool_choice: ToolChoiceMode::None,
        parser: None,
        echo_content: None,
        include_usage: false,
        tokenizer: None,
    };

    let result = drive(req, source, ImmediateDisconnect, &mut sink).await;

    assert!(matches!(result, Err(StreamError::ClientDisconnect)));
    assert!(!sink.lines.iter().any(|l| l == "data: [DONE]"));
}

/// Scenario 6: malformed Mistral JSON in the complete-extraction path
/// falls back to plain content instead of raising.
#[tokio::test]
async fn scenario_malformed_mistral_json_falls_back_to_content() {
    let parser = ToolCallParserKind::mistral(5);
    let out = parser.extract_complete("[TOOL_CALLS][{'name': 'broken', 'arguments': {'x': }]");
    assert!(!out.tools_called);
    assert!(out.tool_calls.is_empty());
    assert!(out.content.is_some());
}

/// Scenario 7: a request that supplies a tokenizer gets its per-token
/// logprobs decoded into the wire's `logprobs.content` shape; a request
/// that doesn't leaves them out even when the engine step carries them.
#[tokio::test]
async fn scenario_logprobs_rendered_only_when_tokenizer_present() {
    use crate::collaborators::{RawTokenLogprob, StaticTokenizer};

    let mut choice_with_logprobs = choice(0, "Hi", vec![1, 2], Some(FinishReason::Stop));
    choice_with_logprobs.logprobs = Some(vec![RawTokenLogprob {
        token_id: 2,
        logprob: -0.2,
        top_logprobs: vec![],
    }]);
    let source = stream::iter(vec![step(3, vec![choice_with_logprobs])]);
    let mut sink = CollectingSink::default();
    let req = DriverRequest::<ToolCallParserKind> {
        request_id: "r7".to_string(),
        created: 0,
        config: cfg(),
        tool_choice: ToolChoiceMode::None,
        parser: None,
        echo_content: None,
        include_usage: false,
        tokenizer: Some(Box::new(StaticTokenizer::default())),
    };

    drive(req, source, NeverDisconnects, &mut sink).await.unwrap();

    assert!(sink.lines.iter().any(|l| l.contains("\"logprobs\":{\"content\":[")));
    assert!(sink.lines.iter().any(|l| l.contains("tok2")));
}
