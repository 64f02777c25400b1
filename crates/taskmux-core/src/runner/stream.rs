//! Incremental reducer over a backend's streaming-JSON output.
//!
//! Backends emit one JSON event per line, but no two CLIs share a wire
//! schema. The reducer recognizes events by semantic shape: text
//! fragments accumulate into the running message, the first session or
//! thread id seen becomes the task's resumable anchor, and terminal
//! events close the stream. Unknown events and non-JSON lines are
//! tolerated -- the stream is advisory, the exit code is authoritative.
//!
//! The reducer is restartable from a file snapshot: pane mode replays
//! the on-disk capture through the same `push_line` path.

use serde_json::Value;
use tracing::trace;

/// Final state of a consumed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedStream {
    /// Accumulated assistant text.
    pub message: String,
    /// First session/thread id observed, if any.
    pub session_id: Option<String>,
    /// Whether a terminal event was seen before EOF.
    pub completed: bool,
}

/// Line-at-a-time stream reducer.
#[derive(Debug, Default)]
pub struct StreamReducer {
    message: String,
    session_id: Option<String>,
    completed: bool,
}

impl StreamReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line. Non-JSON and unrecognized events are ignored;
    /// everything after the terminal event is tail noise.
    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let Ok(event) = serde_json::from_str::<Value>(trimmed) else {
            trace!(line = trimmed, "skipping non-JSON stream line");
            return;
        };

        self.capture_session_id(&event);

        if self.completed {
            return;
        }

        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        match event_type {
            // Assistant message with content blocks; a stop reason other
            // than a tool call ends the turn.
            "assistant" => {
                if let Some(message) = event.get("message") {
                    if let Some(blocks) = message.get("content").and_then(Value::as_array) {
                        for block in blocks {
                            if block.get("type").and_then(Value::as_str) == Some("text") {
                                if let Some(text) = block.get("text").and_then(Value::as_str) {
                                    self.append(text);
                                }
                            }
                        }
                    }
                    match message.get("stop_reason").and_then(Value::as_str) {
                        Some("tool_use") | None => {}
                        Some(_) => self.completed = true,
                    }
                }
            }

            // Raw delta fragments: splice with no separator, the chunk
            // boundaries are arbitrary.
            "content_block_delta" => {
                if let Some(text) = event
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                {
                    self.message.push_str(text);
                }
            }
            "message" | "agent_message" => {
                if let Some(text) = event
                    .get("content")
                    .or_else(|| event.get("text"))
                    .and_then(Value::as_str)
                {
                    self.append(text);
                }
            }
            "item.completed" => {
                if event.pointer("/item/type").and_then(Value::as_str) == Some("agent_message") {
                    if let Some(text) = event.pointer("/item/text").and_then(Value::as_str) {
                        self.append(text);
                    }
                }
            }

            // Final result event: carries the consolidated text.
            "result" => {
                if let Some(text) = event.get("result").and_then(Value::as_str) {
                    self.append(text);
                }
                self.completed = true;
            }

            // Turn boundary without payload.
            "turn.completed" | "done" => {
                self.completed = true;
            }

            // Tool-call turns keep the stream open; everything else is
            // noise.
            other => {
                trace!(event_type = other, "ignoring unrecognized stream event");
            }
        }
    }

    fn capture_session_id(&mut self, event: &Value) {
        if self.session_id.is_some() {
            return;
        }
        const KEYS: [&str; 4] = ["session_id", "sessionId", "thread_id", "threadId"];
        for key in KEYS {
            let found = event
                .get(key)
                .or_else(|| event.pointer(&format!("/message/{key}")))
                .and_then(Value::as_str);
            if let Some(id) = found {
                if !id.is_empty() {
                    self.session_id = Some(id.to_string());
                    return;
                }
            }
        }
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.message.is_empty() && !self.message.ends_with('\n') {
            self.message.push('\n');
        }
        self.message.push_str(text);
    }

    pub fn finish(self) -> ParsedStream {
        ParsedStream {
            message: self.message,
            session_id: self.session_id,
            completed: self.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduce(lines: &[&str]) -> ParsedStream {
        let mut reducer = StreamReducer::new();
        for line in lines {
            reducer.push_line(line);
        }
        reducer.finish()
    }

    #[test]
    fn assistant_text_blocks_accumulate() {
        let parsed = reduce(&[
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"part one"}]}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"part two"}]}}"#,
        ]);
        assert_eq!(parsed.message, "part one\npart two");
        assert!(!parsed.completed);
    }

    #[test]
    fn stop_reason_completes_the_stream() {
        let parsed = reduce(&[
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"done"}],"stop_reason":"end_turn"}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"tail noise"}]}}"#,
        ]);
        assert_eq!(parsed.message, "done");
        assert!(parsed.completed);
    }

    #[test]
    fn tool_use_stop_reason_keeps_the_stream_open() {
        let parsed = reduce(&[
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"calling"}],"stop_reason":"tool_use"}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"after tool"}]}}"#,
        ]);
        assert_eq!(parsed.message, "calling\nafter tool");
        assert!(!parsed.completed);
    }

    #[test]
    fn result_event_completes_and_appends() {
        let parsed = reduce(&[
            r#"{"type":"result","result":"Task completed.","session_id":"sess-1"}"#,
        ]);
        assert_eq!(parsed.message, "Task completed.");
        assert!(parsed.completed);
        assert_eq!(parsed.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn first_session_id_wins() {
        let parsed = reduce(&[
            r#"{"type":"system","session_id":"first"}"#,
            r#"{"type":"result","result":"x","session_id":"second"}"#,
        ]);
        assert_eq!(parsed.session_id.as_deref(), Some("first"));
    }

    #[test]
    fn thread_id_is_an_accepted_anchor() {
        let parsed = reduce(&[r#"{"type":"thread.started","thread_id":"th-9"}"#]);
        assert_eq!(parsed.session_id.as_deref(), Some("th-9"));
    }

    #[test]
    fn nested_session_id_is_found() {
        let parsed = reduce(&[r#"{"type":"assistant","message":{"sessionId":"n-1","content":[]}}"#]);
        assert_eq!(parsed.session_id.as_deref(), Some("n-1"));
    }

    #[test]
    fn codex_item_completed_shape() {
        let parsed = reduce(&[
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"codex says hi"}}"#,
            r#"{"type":"item.completed","item":{"type":"command_execution","text":"ls"}}"#,
            r#"{"type":"turn.completed"}"#,
        ]);
        assert_eq!(parsed.message, "codex says hi");
        assert!(parsed.completed);
    }

    #[test]
    fn delta_fragments_tolerate_arbitrary_chunking() {
        let parsed = reduce(&[
            r#"{"type":"content_block_delta","delta":{"text":"hel"}}"#,
            r#"{"type":"content_block_delta","delta":{"text":"lo"}}"#,
        ]);
        assert_eq!(parsed.message, "hello");
    }

    #[test]
    fn non_json_and_unknown_events_are_ignored() {
        let parsed = reduce(&[
            "plain progress text",
            r#"{"type":"telemetry","ms":12}"#,
            "",
            r#"{"type":"message","content":"real"}"#,
        ]);
        assert_eq!(parsed.message, "real");
    }

    #[test]
    fn empty_stream_parses_to_defaults() {
        let parsed = reduce(&[]);
        assert_eq!(parsed, ParsedStream::default());
    }
}
