//! Interfaces to the systems the streaming core sits between, but does
//! not itself implement: the inference engine producing tokens, the
//! tokenizer backing logprob rendering, the HTTP/SSE transport, and
//! disconnect detection. Production wiring of these is explicitly out of
//! scope; unit tests back them with small fakes.

use crate::error::StreamError;
use crate::protocol::FinishReason;
use async_trait::async_trait;
use futures::Stream;

/// One generated token's raw logprob data, as the (out-of-scope) inference
/// engine reports it: a token id and logprob plus whatever alternates it
/// also tracked, none of it decoded yet. Decoding happens in
/// [`crate::shaper::render_logprobs`], which needs a [`Tokenizer`] and the
/// `return_tokens_as_token_ids` setting this struct doesn't have access to.
#[derive(Debug, Clone)]
pub struct RawTokenLogprob {
    pub token_id: u32,
    pub logprob: f64,
    /// Other high-probability token ids considered at this position,
    /// alongside their logprobs.
    pub top_logprobs: Vec<(u32, f64)>,
}

/// One step's worth of generation across every active choice, the
/// minimal slice of an inference engine's running request state this
/// crate needs.
#[derive(Debug, Clone, Default)]
pub struct EngineStepOutput {
    /// Length of the prompt, in tokens -- used for usage accounting.
    pub prompt_tokens: u32,
    pub outputs: Vec<ChoiceStepOutput>,
}

#[derive(Debug, Clone, Default)]
pub struct ChoiceStepOutput {
    pub index: usize,
    /// Cumulative generated text for this choice, up to and including
    /// this step.
    pub text: String,
    /// Cumulative generated token ids for this choice.
    pub token_ids: Vec<u32>,
    /// `Some` exactly on the step that finishes this choice.
    pub finish_reason: Option<FinishReason>,
    /// The literal stop string/token id that ended generation, set only
    /// when a user-supplied stop criterion (not EOS) triggered the finish.
    pub stop_reason: Option<String>,
    /// Per-token logprobs for the tokens newly produced this step, when
    /// the caller requested them.
    pub logprobs: Option<Vec<RawTokenLogprob>>,
}

/// Produces [`EngineStepOutput`]s, one per generation step, until the
/// request completes. Errors terminate the stream.
pub trait TokenSource: Stream<Item = Result<EngineStepOutput, StreamError>> {}

impl<T> TokenSource for T where T: Stream<Item = Result<EngineStepOutput, StreamError>> {}

/// The minimal tokenizer surface the driver needs: resolving a dialect's
/// trigger token to an id, and decoding ids back to text for logprobs.
pub trait Tokenizer {
    fn token_id(&self, literal: &str) -> Option<u32>;
    fn decode(&self, ids: &[u32]) -> String;
}

/// Polled between engine steps; resolves once the client has gone away.
#[async_trait]
pub trait DisconnectWatcher {
    async fn disconnected(&mut self);
}

/// Destination for framed SSE lines (`data: ...`), decoupled from any
/// concrete HTTP body writer.
#[async_trait]
pub trait SseSink {
    async fn send_line(&mut self, line: &str) -> Result<(), StreamError>;
}

/// A [`DisconnectWatcher`] that never fires; used in tests and by
/// callers that handle disconnection some other way upstream.
pub struct NeverDisconnects;

#[async_trait]
impl DisconnectWatcher for NeverDisconnects {
    async fn disconnected(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// An in-memory [`SseSink`] that records every line, for tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub lines: Vec<String>,
}

#[async_trait]
impl SseSink for CollectingSink {
    async fn send_line(&mut self, line: &str) -> Result<(), StreamError> {
        self.lines.push(line.to_string());
        Ok(())
    }
}

/// A [`Tokenizer`] test double backed by a fixed literal -> id table.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenizer {
    pub table: std::collections::HashMap<String, u32>,
}

impl StaticTokenizer {
    pub fn new(table: std::collections::HashMap<String, u32>) -> Self {
        Self { table }
    }
}

impl Tokenizer for StaticTokenizer {
    fn token_id(&self, literal: &str) -> Option<u32> {
        self.table.get(literal).copied()
    }

    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|id| format!("tok{id}"))
            .collect::<Vec<_>>()
            .join("")
    }
}
