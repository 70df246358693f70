//! Streamed completion reassembly.
//!
//! Raw bytes from the relay are split into lines, `data:` frames are decoded
//! into [`CompletionChunk`]s, and each chunk is folded into the
//! [`Conversation`]'s message list. Tool calls always become their own
//! `agent` messages; assistant text is kept in a single message per segment
//! and updated in place as deltas arrive.

use std::collections::HashMap;
use std::pin::pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chatgate_protocol::messages::{Delta, ToolCallDelta};
use chatgate_protocol::{Completion, CompletionChunk, Message, upstream_error_hint};

use crate::error::{ClientError, ClientResult};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Status code attached to errors reported inside a 200 stream.
const IN_BAND_ERROR_STATUS: u16 = 502;

// ============================================================================
// Line framing
// ============================================================================

/// Longest line accepted from a stream before it is treated as broken.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits arbitrary byte chunks into complete lines.
///
/// A trailing partial line, including a split UTF-8 sequence, is held until
/// the rest arrives. Bytes already searched for a newline are not scanned
/// again.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    /// Append `bytes` and return every line completed by them, without the
    /// LF or CRLF terminator.
    ///
    /// Fails once an unterminated line grows past the limit.
    pub fn push(&mut self, bytes: &[u8]) -> ClientResult<Vec<String>> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            self.scanned = start;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
        if self.pending.len() > self.max_line {
            let len = self.pending.len();
            self.pending.clear();
            self.scanned = 0;
            return Err(ClientError::Decode(format!(
                "stream line of {len} bytes exceeds the {} byte limit",
                self.max_line
            )));
        }
        Ok(lines)
    }

    /// Flush an unterminated final line.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim_end_matches('\r');
        (!line.is_empty()).then(|| line.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A decoded stream frame.
#[derive(Debug)]
pub enum Frame {
    Chunk(CompletionChunk),
    Done,
}

/// Decode one line. Blank lines, non-`data:` lines and unparsable payloads
/// yield `None`.
pub fn parse_line(line: &str) -> Option<Frame> {
    let data = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => Some(Frame::Chunk(chunk)),
        Err(e) => {
            warn!("skipping unparsable stream chunk: {e}");
            None
        }
    }
}

/// Provider error text from an in-band `error` object.
fn in_band_error(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

// ============================================================================
// Accumulation
// ============================================================================

/// Conversation status as seen by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatStatus {
    #[default]
    Idle,
    Streaming,
    Error,
}

/// How a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Cancelled by the caller; messages committed so far are kept.
    Aborted,
}

/// Per-response state. Dropped when the response completes or aborts.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    /// Index of the assistant message of the current segment.
    assistant_index: Option<usize>,
    /// Tool call id to the index of its agent message.
    tool_messages: HashMap<String, usize>,
    tool_content: HashMap<String, String>,
    /// Provider fragment index to tool call id.
    ids_by_index: HashMap<u32, String>,
    /// Last call touched by a fragment or referenced by `tool_call_id`.
    last_tool_id: Option<String>,
    /// Last call opened; receives content sent alongside fragments.
    last_opened_tool_id: Option<String>,
}

impl StreamAccumulator {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn has_seen_tool(&self, id: &str) -> bool {
        self.tool_messages.contains_key(id)
    }

    fn apply_delta(&mut self, messages: &mut Vec<Message>, delta: Delta) {
        if delta.role.as_deref() == Some("tool") {
            debug!("ignoring tool-role delta");
            return;
        }

        let content = delta.content.as_deref().unwrap_or_default();

        if let Some(calls) = delta.tool_calls.as_deref().filter(|calls| !calls.is_empty()) {
            for call in calls {
                self.apply_tool_fragment(messages, call);
            }
            if let Some(id) = self.last_opened_tool_id.clone() {
                self.append_tool_content(messages, &id, content);
            }
            return;
        }

        if let Some(id) = delta.tool_call_id.as_deref().filter(|id| self.has_seen_tool(id)) {
            let id = id.to_string();
            self.last_tool_id = Some(id.clone());
            self.append_tool_content(messages, &id, content);
            return;
        }

        let reasoning = delta.reasoning_text().unwrap_or_default();
        if content.is_empty() && reasoning.is_empty() {
            return;
        }

        // Something was appended after the assistant message: new segment.
        if self
            .assistant_index
            .is_some_and(|index| index + 1 != messages.len())
        {
            self.assistant_index = None;
            self.content.clear();
            self.reasoning.clear();
        }

        self.content.push_str(content);
        self.reasoning.push_str(reasoning);
        self.sync_assistant(messages);
    }

    fn sync_assistant(&mut self, messages: &mut Vec<Message>) {
        let reasoning = (!self.reasoning.is_empty()).then(|| self.reasoning.clone());
        if let Some(message) = self.assistant_index.and_then(|index| messages.get_mut(index)) {
            message.content.clone_from(&self.content);
            message.reasoning = reasoning;
            return;
        }
        messages.push(Message::assistant(self.content.clone(), reasoning));
        self.assistant_index = Some(messages.len() - 1);
    }

    fn resolve_tool_id(&self, call: &ToolCallDelta) -> Option<String> {
        call.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| call.index.and_then(|i| self.ids_by_index.get(&i).cloned()))
            .or_else(|| self.last_tool_id.clone())
    }

    fn apply_tool_fragment(&mut self, messages: &mut Vec<Message>, call: &ToolCallDelta) {
        let Some(id) = self.resolve_tool_id(call) else {
            warn!("dropping tool call fragment without an id");
            return;
        };
        let name = call
            .function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .unwrap_or_default();
        let arguments = call
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default();

        if let Some(index) = call.index {
            self.ids_by_index.insert(index, id.clone());
        }
        self.last_tool_id = Some(id.clone());

        match self.tool_messages.get(&id).copied() {
            Some(index) => {
                if let Some(tool) = messages
                    .get_mut(index)
                    .and_then(|m| m.tool_calls.as_mut())
                    .and_then(|calls| calls.first_mut())
                {
                    if tool.name.is_empty() {
                        tool.name = name.to_string();
                    }
                    tool.arguments.push_str(arguments);
                }
            }
            None => {
                debug!(tool_call_id = %id, "tool call opened");
                messages.push(Message::tool_call(id.clone(), name, arguments));
                self.tool_messages.insert(id.clone(), messages.len() - 1);
                self.last_opened_tool_id = Some(id);
            }
        }
    }

    fn append_tool_content(&mut self, messages: &mut [Message], id: &str, content: &str) {
        if content.is_empty() {
            return;
        }
        let Some(&index) = self.tool_messages.get(id) else {
            return;
        };
        let text = self.tool_content.entry(id.to_string()).or_default();
        text.push_str(content);
        if let Some(message) = messages.get_mut(index) {
            message.content.clone_from(text);
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Ordered message list plus the state of the response in flight.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    status: ChatStatus,
    accumulator: Option<StreamAccumulator>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn accumulator(&self) -> Option<&StreamAccumulator> {
        self.accumulator.as_ref()
    }

    /// Start a new response.
    pub fn begin(&mut self) {
        self.accumulator = Some(StreamAccumulator::default());
        self.status = ChatStatus::Streaming;
    }

    /// Fold one chunk into the message list.
    ///
    /// An error object inside the chunk is surfaced as
    /// [`ClientError::UpstreamRejected`].
    pub fn apply_chunk(&mut self, chunk: CompletionChunk) -> ClientResult<()> {
        if let Some(error) = chunk.error.as_ref() {
            return Err(ClientError::UpstreamRejected {
                status: IN_BAND_ERROR_STATUS,
                message: upstream_error_hint(&in_band_error(error)),
            });
        }

        if self.accumulator.is_none() {
            self.begin();
        }
        let Some(accumulator) = self.accumulator.as_mut() else {
            return Ok(());
        };
        for choice in chunk.choices {
            accumulator.apply_delta(&mut self.messages, choice.delta);
        }
        Ok(())
    }

    pub fn finish(&mut self) {
        self.accumulator = None;
        self.status = ChatStatus::Idle;
    }

    pub fn fail(&mut self) {
        self.accumulator = None;
        self.status = ChatStatus::Error;
    }

    /// Stop the response; committed messages stay as they are.
    pub fn abort(&mut self) {
        self.accumulator = None;
        self.status = ChatStatus::Idle;
    }

    /// Fold a non-streamed completion.
    pub fn apply_completion(&mut self, completion: Completion) {
        for choice in completion.choices {
            let message = choice.message;
            let content = message.content.unwrap_or_default();
            let reasoning = message.reasoning_content.filter(|r| !r.is_empty());
            if !content.is_empty() || reasoning.is_some() {
                self.messages.push(Message::assistant(content, reasoning));
            }
            for call in message.tool_calls.unwrap_or_default() {
                self.messages.push(Message::tool_call(
                    call.id,
                    call.function.name.unwrap_or_default(),
                    call.function.arguments.unwrap_or_default(),
                ));
            }
        }
        self.finish();
    }

    /// Returns `true` once the stream signalled completion.
    fn apply_line(&mut self, line: &str) -> ClientResult<bool> {
        match parse_line(line) {
            Some(Frame::Done) => Ok(true),
            Some(Frame::Chunk(chunk)) => self.apply_chunk(chunk).map(|_| false),
            None => Ok(false),
        }
    }

    /// Drive a byte stream to completion, applying chunks in arrival order.
    ///
    /// Cancelling `cancel` stops reading promptly and returns
    /// [`StreamOutcome::Aborted`].
    pub async fn consume_stream<S, E>(
        &mut self,
        stream: S,
        cancel: &CancellationToken,
    ) -> ClientResult<StreamOutcome>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<ClientError>,
    {
        let mut stream = pin!(stream);
        let mut lines = LineBuffer::new();
        self.begin();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("stream cancelled");
                    self.abort();
                    return Ok(StreamOutcome::Aborted);
                }
                next = stream.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    self.fail();
                    return Err(e.into());
                }
                None => break,
            };

            let complete = match lines.push(&bytes) {
                Ok(complete) => complete,
                Err(e) => {
                    self.fail();
                    return Err(e);
                }
            };
            for line in complete {
                match self.apply_line(&line) {
                    Ok(true) => {
                        self.finish();
                        return Ok(StreamOutcome::Completed);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.fail();
                        return Err(e);
                    }
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Err(e) = self.apply_line(&line) {
                self.fail();
                return Err(e);
            }
        }
        self.finish();
        Ok(StreamOutcome::Completed)
    }
}
