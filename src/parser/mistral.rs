//! Mistral dialect: a `[TOOL_CALLS]` marker followed by a single-quoted
//! JSON array of `{name, arguments}` objects.
//!
//! Single quotes are not valid JSON, so both the complete and streaming
//! paths find-and-replace them with double quotes before parsing. This
//! means a tool name or argument value that itself contains a quote
//! character will corrupt extraction -- a known limitation inherited from
//! the dialect, not something this parser can repair.

use crate::diff::intermediate_diff;
use crate::parser::{value_to_partial, TokenStep, ToolCallParser};
use crate::partial_json::{self, Allow};
use crate::protocol::{
    DeltaFunctionCall, DeltaMessage, DeltaToolCall, ExtractedToolCalls, FunctionCall,
    PartialToolCall, ToolCall,
};
use serde_json::Value;

const BOT_TOKEN: &str = "[TOOL_CALLS]";

#[derive(Debug)]
pub struct MistralParser {
    trigger_token_id: u32,
    prev_tool_call_arr: Vec<PartialToolCall>,
    current_tool_id: i64,
    current_tool_name_sent: bool,
    current_tool_initial_sent: bool,
    streamed_args_for_tool: Vec<String>,
}

impl MistralParser {
    pub fn new(trigger_token_id: u32) -> Self {
        Self {
            trigger_token_id,
            prev_tool_call_arr: Vec::new(),
            current_tool_id: -1,
            current_tool_name_sent: false,
            current_tool_initial_sent: false,
            streamed_args_for_tool: Vec::new(),
        }
    }

    /// Replicates the original dialect's non-greedy `\[{.*?}\]` regex
    /// match: the first `[{` through the first `}]` that follows it. Not
    /// balanced-bracket aware by design -- see the module doc comment.
    fn find_array_slice(text: &str) -> Option<&str> {
        let start = text.find("[{")?;
        let rel_end = text[start..].find("}]")?;
        Some(&text[start..start + rel_end + 2])
    }

    fn try_extract_streaming(&mut self, step: &TokenStep, flags: Allow) -> Option<DeltaMessage> {
        let portion = step.current_text.splitn(2, BOT_TOKEN).nth(1)?;
        let parsable = portion.replace('\'', "\"");

        let tool_call_arr = match partial_json::parse(&parsable, flags) {
            Ok(Value::Array(arr)) => arr,
            Ok(_) => return None,
            Err(e) => {
                log::debug!("mistral: tolerating partial-json growth: {e}");
                return None;
            }
        };

        let current_tool_id = self.current_tool_id;

        if !tool_call_arr.is_empty() && tool_call_arr.len() as i64 > current_tool_id + 1 {
            let delta = if current_tool_id >= 0 {
                self.flush_remaining_args(current_tool_id as usize, &tool_call_arr)
            } else {
                None
            };
            self.current_tool_id = tool_call_arr.len() as i64 - 1;
            self.current_tool_name_sent = false;
            self.current_tool_initial_sent = false;
            self.streamed_args_for_tool.push(String::new());
            self.prev_tool_call_arr = tool_call_arr.iter().map(value_to_partial).collect();
            return delta;
        } else if tool_call_arr.len() as i64 - 1 == current_tool_id && current_tool_id >= 0 {
            // update to the current tool call; handled below
        } else {
            return None;
        }

        let idx = current_tool_id as usize;
        let current_tool_call = value_to_partial(tool_call_arr.get(idx)?);

        let delta = if !self.current_tool_initial_sent {
            self.current_tool_initial_sent = true;
            Some(initial_delta(idx))
        } else if !self.current_tool_name_sent {
            current_tool_call.name.as_ref().map(|name| {
                self.current_tool_name_sent = true;
                name_delta(idx, name)
            })
        } else {
            let prev_arguments = self
                .prev_tool_call_arr
                .get(idx)
                .and_then(|p| p.arguments.clone());
            let cur_arguments = current_tool_call.arguments.clone();
            let new_text = step.delta_text.replace('\'', "\"");
            self.diff_arguments(idx, cur_arguments, prev_arguments, &new_text)
        };

        self.prev_tool_call_arr = tool_call_arr.iter().map(value_to_partial).collect();
        delta
    }

    fn flush_remaining_args(
        &mut self,
        idx: usize,
        tool_call_arr: &[Value],
    ) -> Option<DeltaMessage> {
        let current = value_to_partial(&tool_call_arr[idx]);
        let args = current.arguments?;
        let args_json = serde_json::to_string(&args).ok()?;
        let streamed = self.streamed_args_for_tool[idx].clone();
        let diff = args_json.strip_prefix(streamed.as_str())?.to_string();
        if diff.is_empty() {
            return None;
        }
        self.streamed_args_for_tool[idx] += &diff;
        Some(arguments_delta(idx, diff))
    }

    fn diff_arguments(
        &mut self,
        idx: usize,
        cur_arguments: Option<Value>,
        prev_arguments: Option<Value>,
        new_text: &str,
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
                let end = cur_json.find(new_text)? + new_text.len();
                let diff = cur_json[..end].to_string();
                self.streamed_args_for_tool[idx] += &diff;
                Some(arguments_delta(idx, diff))
            }
            (Some(cur), Some(prev)) => {
                let cur_json = serde_json::to_string(&cur).ok()?;
                let prev_json = serde_json::to_string(&prev).ok()?;
                let diff = intermediate_diff(&cur_json, &prev_json);
                if diff.is_empty() {
                    return None;
                }
                self.streamed_args_for_tool[idx] += &diff;
                Some(arguments_delta(idx, diff))
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

fn arguments_delta(index: usize, arguments: String) -> DeltaMessage {
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

impl ToolCallParser for MistralParser {
    fn extract_complete(&self, model_output: &str) -> ExtractedToolCalls {
        if !model_output.contains(BOT_TOKEN) {
            return ExtractedToolCalls {
                tools_called: false,
                tool_calls: Vec::new(),
                content: Some(model_output.to_string()),
            };
        }

        let stripped = model_output.replace(BOT_TOKEN, "").replace('\'', "\"");
        let extracted = Self::find_array_slice(&stripped).and_then(|slice| {
            serde_json::from_str::<Vec<Value>>(slice).ok()
        });

        match extracted {
            Some(arr) => {
                let tool_calls: Option<Vec<ToolCall>> = arr
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
                        let content = model_output.split(BOT_TOKEN).next().unwrap_or("");
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
                        log::error!("mistral: tool call entries missing name/arguments, falling back to content");
                        ExtractedToolCalls {
                            tools_called: false,
                            tool_calls: Vec::new(),
                            content: Some(model_output.to_string()),
                        }
                    }
                }
            }
            None => {
                log::error!("mistral: failed to extract tool calls from complete output, falling back to content");
                ExtractedToolCalls {
                    tools_called: false,
                    tool_calls: Vec::new(),
                    content: Some(model_output.to_string()),
                }
            }
        }
    }

    fn extract_streaming(&mut self, step: &TokenStep) -> Option<DeltaMessage> {
        if !step.current_token_ids.contains(&self.trigger_token_id) {
            return Some(DeltaMessage {
                content: Some(step.delta_text.clone()),
                ..Default::default()
            });
        }

        if step.delta_token_ids.contains(&self.trigger_token_id) && step.delta_token_ids.len() == 1
        {
            return None;
        }

        let flags = if self.current_tool_name_sent {
            Allow::ALL
        } else {
            Allow::ALL & !Allow::STR
        };

        self.try_extract_streaming(step, flags)
    }

    fn prev_tool_call_arr(&self) -> &[PartialToolCall] {
        &self.prev_tool_call_arr
    }

    fn streamed_args_for_tool(&self) -> &[String] {
        &self.streamed_args_for_tool
    }
}
