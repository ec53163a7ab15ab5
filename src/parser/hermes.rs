//! Hermes-2-Pro dialect: tool calls wrapped in `<tool_call>...</tool_call>`
//! tags, zero or more interleaved with free text, each tag pair containing
//! one `{name, arguments}` JSON object (double-quoted, unlike Mistral).
//!
//! Where Mistral's state machine tracks array length, Hermes tracks the
//! running count of start/end tags seen so far -- there is no top-level
//! array, just a sequence of tag-delimited objects.

use crate::diff::intermediate_diff;
use crate::parser::{value_to_partial, TokenStep, ToolCallParser};
use crate::partial_json::{self, Allow};
use crate::protocol::{
    DeltaFunctionCall, DeltaMessage, DeltaToolCall, ExtractedToolCalls, FunctionCall,
    PartialToolCall, ToolCall,
};
use serde_json::Value;

const START_TAG: &str = "<tool_call>";
const END_TAG: &str = "</tool_call>";

#[derive(Debug)]
pub struct HermesParser {
    start_token_id: u32,
    end_token_id: u32,
    prev_tool_call_arr: Vec<PartialToolCall>,
    current_tool_id: i64,
    current_tool_name_sent: bool,
    current_tool_initial_sent: bool,
    streamed_args_for_tool: Vec<String>,
}

impl HermesParser {
    pub fn new(start_token_id: u32, end_token_id: u32) -> Self {
        Self {
            start_token_id,
            end_token_id,
            prev_tool_call_arr: Vec::new(),
            current_tool_id: -1,
            current_tool_name_sent: false,
            current_tool_initial_sent: false,
            streamed_args_for_tool: Vec::new(),
        }
    }

    /// Extracts every `<tool_call>...(</tool_call>|$)` body from a
    /// complete model output, mirroring the dialect's tolerance for a
    /// missing final closing tag.
    fn find_tool_call_bodies(text: &str) -> Vec<&str> {
        let mut bodies = Vec::new();
        let mut rest = text;
        loop {
            let Some(start) = rest.find(START_TAG) else {
                break;
            };
            let after_start = &rest[start + START_TAG.len()..];
            match after_start.find(END_TAG) {
                Some(end) => {
                    bodies.push(&after_start[..end]);
                    rest = &after_start[end + END_TAG.len()..];
                }
                None => {
                    bodies.push(after_start);
                    break;
                }
            }
        }
        bodies
    }

    fn diff_arguments(
        &mut self,
        idx: usize,
        cur_arguments: Option<Value>,
        prev_arguments: Option<Value>,
        delta_text: &str,
    ) -> Option<DeltaMessage> {
        match (cur_arguments, prev_arguments) {
            (None, None) => None,
            (None, Some(_)) => {
                crate::logger::log("invariant violated: arguments reset mid-call");
                log::error!("invariant violated: arguments reset mid-call");
                None
            }
            (Some(cur), None) => {
                let cur_json = serde_json::to_string(&cur).ok()?;
                let end = cur_json.find(delta_text)? + delta_text.len();
                let arguments_delta = cur_json[..end].to_string();
                self.streamed_args_for_tool[idx] += &arguments_delta;
                Some(arguments_delta_msg(idx, arguments_delta))
            }
            (Some(cur), Some(prev)) => {
                let cur_json = serde_json::to_string(&cur).ok()?;
                let prev_json = serde_json::to_string(&prev).ok()?;
                let diff = intermediate_diff(&cur_json, &prev_json);
                if diff.is_empty() {
                    return None;
                }
                self.streamed_args_for_tool[idx] += &diff;
                Some(arguments_delta_msg(idx, diff))
            }
        }
    }
}

fn initial_delta(index: usize) -> DeltaMessage {
    DeltaMessage {
        tool_calls: Some(vec![DeltaToolCall {
            index,
            id: Some(format!("call_{index}")),
            r#type: Some("function".to_string()),
            function: None,
        }]),
        ..Default::default()
    }
}

fn name_delta(index: usize, name: &str) -> DeltaMessage {
    DeltaMessage {
        tool_calls: Some(vec![DeltaToolCall {
            index,
            id: None,
            r#type: None,
            function: Some(DeltaFunctionCall {
                name: Some(name.to_string()),
                arguments: None,
            }),
        }]),
        ..Default::default()
    }
}

fn arguments_delta_msg(index: usize, arguments: String) -> DeltaMessage {
    DeltaMessage {
        tool_calls: Some(vec![DeltaToolCall {
            index,
            id: None,
            r#type: None,
            function: Some(DeltaFunctionCall {
                name: None,
                arguments: Some(arguments),
            }),
        }]),
        ..Default::default()
    }
}

impl ToolCallParser for HermesParser {
    fn extract_complete(&self, model_output: &str) -> ExtractedToolCalls {
        if !model_output.contains(START_TAG) {
            return ExtractedToolCalls {
                tools_called: false,
                tool_calls: Vec::new(),
                content: Some(model_output.to_string()),
            };
        }

        let bodies = Self::find_tool_call_bodies(model_output);
        let parsed: Option<Vec<Value>> = bodies
            .iter()
            .map(|body| serde_json::from_str::<Value>(body).ok())
            .collect();

        match parsed {
            Some(raw_calls) => {
                let tool_calls: Option<Vec<ToolCall>> = raw_calls
                    .iter()
                    .map(|raw| {
                        let name = raw.get("name")?.as_str()?.to_string();
                        let arguments = raw.get("arguments")?;
                        let arguments = serde_json::to_string(arguments).ok()?;
                        Some(ToolCall {
                            id: format!("call_{name}"),
                            r#type: "function".to_string(),
                            function: FunctionCall { name, arguments },
                        })
                    })
                    .collect();

                match tool_calls {
                    Some(tool_calls) => {
                        let content = &model_output[..model_output.find(START_TAG).unwrap_or(0)];
                        ExtractedToolCalls {
                            tools_called: true,
                            tool_calls,
                            content: if content.is_empty() {
                                None
                            } else {
                                Some(content.to_string())
                            },
                        }
                    }
                    None => {
                        log::error!("hermes: tool call entries missing name/arguments, falling back to content");
                        ExtractedToolCalls {
                            tools_called: false,
                            tool_calls: Vec::new(),
                            content: Some(model_output.to_string()),
                        }
                    }
                }
            }
            None => {
                log::error!("hermes: failed to parse tool_call body as JSON, falling back to content");
                ExtractedToolCalls {
                    tools_called: false,
                    tool_calls: Vec::new(),
                    content: Some(model_output.to_string()),
                }
            }
        }
    }

    fn extract_streaming(&mut self, step: &TokenStep) -> Option<DeltaMessage> {
        if !step.current_token_ids.contains(&self.start_token_id) {
            return Some(DeltaMessage {
                content: Some(step.delta_text.clone()),
                ..Default::default()
            });
        }

        let count = |ids: &[u32], tok: u32| ids.iter().filter(|&&t| t == tok).count();

        let prev_start = count(&step.previous_token_ids, self.start_token_id);
        let prev_end = count(&step.previous_token_ids, self.end_token_id);
        let cur_start = count(&step.current_token_ids, self.start_token_id);
        let cur_end = count(&step.current_token_ids, self.end_token_id);

        // plain text: tag counts balanced and haven't changed
        if cur_start == cur_end && prev_end == cur_end {
            return Some(DeltaMessage {
                content: Some(step.delta_text.clone()),
                ..Default::default()
            });
        }

        let flags = if self.current_tool_name_sent {
            Allow::ALL
        } else {
            Allow::ALL & !Allow::STR
        };

        let tool_call_portion: Option<String>;

        if cur_start > cur_end && cur_start > prev_start {
            // opening a new tool call: always advance the cursor, even when
            // the opening tag arrived as its own token and there's nothing
            // past it yet to parse.
            self.current_tool_id += 1;
            self.current_tool_name_sent = false;
            self.current_tool_initial_sent = false;
            self.streamed_args_for_tool.push(String::new());

            tool_call_portion = if step.delta_token_ids.len() <= 1 {
                None
            } else {
                step.current_text
                    .rsplit(START_TAG)
                    .next()
                    .map(|s| s.to_string())
            };
        } else if cur_start > cur_end && cur_start == prev_start {
            // continuing the open tool call
            tool_call_portion = step
                .current_text
                .rsplit(START_TAG)
                .next()
                .map(|s| s.to_string());
        } else if cur_start == cur_end && cur_end > prev_end {
            // the open tool call just closed: flush anything not yet streamed
            let idx = self.current_tool_id.max(0) as usize;
            let diff = self
                .prev_tool_call_arr
                .get(idx)
                .and_then(|p| p.arguments.clone())
                .and_then(|args| serde_json::to_string(&args).ok())
                .and_then(|args_json| {
                    let streamed = self.streamed_args_for_tool.get(idx)?.clone();
                    args_json.strip_prefix(streamed.as_str()).map(String::from)
                });
            return match diff {
                Some(d) if !d.is_empty() => {
                    self.streamed_args_for_tool[idx] += &d;
                    Some(arguments_delta_msg(idx, d))
                }
                _ => None,
            };
        } else {
            crate::logger::log("invalid tag-count state while parsing hermes tool calls");
            log::error!("invalid tag-count state while parsing hermes tool calls");
            return None;
        }

        let current_tool_call = match &tool_call_portion {
            Some(portion) => match partial_json::parse(portion, flags) {
                Ok(v) => value_to_partial(&v),
                Err(e) => {
                    log::debug!("hermes: tolerating partial-json growth: {e}");
                    PartialToolCall::default()
                }
            },
            None => return None,
        };

        if !self.current_tool_initial_sent {
            self.current_tool_initial_sent = true;
            return Some(initial_delta(self.current_tool_id as usize));
        }

        if !self.current_tool_name_sent {
            return current_tool_call.name.as_ref().map(|name| {
                self.current_tool_name_sent = true;
                name_delta(self.current_tool_id as usize, name)
            });
        }

        let idx = self.current_tool_id as usize;
        if self.prev_tool_call_arr.len() <= idx {
            self.prev_tool_call_arr.push(PartialToolCall::default());
        }
        let prev_arguments = self.prev_tool_call_arr[idx].arguments.clone();
        let cur_arguments = current_tool_call.arguments.clone();

        let delta = self.diff_arguments(idx, cur_arguments, prev_arguments, &step.delta_text);

        if idx == self.prev_tool_call_arr.len() - 1 {
            self.prev_tool_call_arr[idx] = current_tool_call;
        } else {
            self.prev_tool_call_arr.push(current_tool_call);
        }

        delta
    }

    fn prev_tool_call_arr(&self) -> &[PartialToolCall] {
        &self.prev_tool_call_arr
    }

    fn streamed_args_for_tool(&self) -> &[String] {
        &self.streamed_args_for_tool
    }
}
