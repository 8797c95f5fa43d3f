//! Parses the `text/event-stream` responses that the Realtime Database sends to streaming
//! subscribers, and applies them to a local copy of the watched node.

use crate::api::{tree, StorePath};
use crate::error::Res;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

/// One dispatched server-sent event: its `event:` name and its (joined) `data:` lines.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct ServerEvent {
    pub(crate) event: String,
    pub(crate) data: String,
}

/// Turns chunks of the response body into events. Chunks may split lines and events anywhere.
#[derive(Debug, Default)]
pub(crate) struct EventParser {
    buffer: Vec<u8>,
    pending: ServerEvent,
    has_data: bool,
}

impl EventParser {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let bytes: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if self.has_data || !self.pending.event.is_empty() {
                    events.push(std::mem::take(&mut self.pending));
                }
                self.has_data = false;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.pending.event = value.to_string(),
                "data" => {
                    if self.has_data {
                        self.pending.data.push('\n');
                    }
                    self.pending.data.push_str(value);
                    self.has_data = true;
                }
                _ => {}
            }
        }
        events
    }
}

/// The events that the Realtime Database streams.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    /// Replace the node at `path` (relative to the watched node) with `data`.
    Put { path: StorePath, data: Value },
    /// Merge each child of `data` into the node at `path`.
    Patch { path: StorePath, data: Value },
    KeepAlive,
    /// The security rules no longer allow reading the watched node.
    Cancel,
    /// The id token used to open the stream has expired.
    AuthRevoked,
    Other(String),
}

#[derive(Deserialize)]
struct EventData {
    path: String,
    data: Value,
}

impl StreamEvent {
    pub(crate) fn parse(event: &ServerEvent) -> Res<Self> {
        let parse_data = || -> Res<(StorePath, Value)> {
            let data: EventData = serde_json::from_str(&event.data)
                .with_context(|| format!("Unable to parse the '{}' event data", event.event))?;
            Ok((StorePath::parse(&data.path)?, data.data))
        };
        Ok(match event.event.as_str() {
            "put" => {
                let (path, data) = parse_data()?;
                StreamEvent::Put { path, data }
            }
            "patch" => {
                let (path, data) = parse_data()?;
                StreamEvent::Patch { path, data }
            }
            "keep-alive" => StreamEvent::KeepAlive,
            "cancel" => StreamEvent::Cancel,
            "auth_revoked" => StreamEvent::AuthRevoked,
            other => StreamEvent::Other(other.to_string()),
        })
    }

    /// Applies the event to `node`, returning true if it changed anything.
    pub(crate) fn apply(&self, node: &mut Value) -> bool {
        let before = node.clone();
        match self {
            StreamEvent::Put { path, data } => tree::set_at(node, path, data.clone()),
            StreamEvent::Patch { path, data } => {
                if let Value::Object(children) = data {
                    tree::merge_at(node, path, children.clone());
                }
            }
            _ => return false,
        }
        *node != before
    }
}
