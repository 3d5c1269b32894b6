//! Indexer Wire Types and Event Stream Decoding
//!
//! Response shapes of the indexer REST API and an incremental decoder
//! for its `text/event-stream` feed.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::trade::UserTrade;
use crate::ports::trade_index::IndexerEvent;

/// `GET /api/v1/trades/{address}` body: a bare array, or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TradesResponse {
  List(Vec<UserTrade>),
  Wrapped { trades: Vec<UserTrade> },
}

impl TradesResponse {
  pub fn into_trades(self) -> Vec<UserTrade> {
    match self {
      Self::List(trades) | Self::Wrapped { trades } => trades,
    }
  }
}

/// Raw event payload from the stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  dtf_id: Option<Value>,
  #[serde(default)]
  data: Option<Value>,
}

/// Parses one event payload. Returns `None` for non-JSON or untyped data.
pub fn parse_event(payload: &str) -> Option<IndexerEvent> {
  let raw: RawEvent = serde_json::from_str(payload).ok()?;

  let dtf_id = raw
    .dtf_id
    .as_ref()
    .and_then(value_as_id)
    .or_else(|| {
      raw
        .data
        .as_ref()
        .and_then(|d| d.get("dtfId"))
        .and_then(value_as_id)
    });

  Some(match raw.kind.as_str() {
    "DTFSettled" => IndexerEvent::DtfSettled { dtf_id },
    "SharesPurchased" => IndexerEvent::SharesPurchased { dtf_id },
    "DTFCreated" => IndexerEvent::DtfCreated { dtf_id },
    _ => IndexerEvent::Other(raw.kind),
  })
}

fn value_as_id(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Incremental `text/event-stream` decoder.
///
/// Feed arbitrary byte chunks; complete events come out as the joined
/// `data:` lines of each blank-line-terminated block.
#[derive(Debug, Default)]
pub struct SseDecoder {
  buffer: Vec<u8>,
  data: Vec<String>,
}

impl SseDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends a chunk and returns every event it completed.
  pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
    self.buffer.extend_from_slice(chunk);

    let mut events = Vec::new();
    while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
      let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
      let line = String::from_utf8_lossy(&raw);
      let line = line.trim_end_matches(['\n', '\r']);

      if line.is_empty() {
        if !self.data.is_empty() {
          events.push(self.data.join("\n"));
          self.data.clear();
        }
      } else if let Some(value) = line.strip_prefix("data:") {
        self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
      }
      // `event:`, `id:`, `retry:` and `:` comments are ignored
    }
    events
  }
}
