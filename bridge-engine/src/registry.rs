use crate::stream::ActiveStream;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// The id-like fields an event notification may carry, probed in this
/// order on `params` itself and then on `params.msg`.
const ID_FIELDS: &[&[&str]] = &[
  &["_meta", "requestId"],
  &["_meta", "id"],
  &["id"],
  &["requestId"],
  &["responseId"],
  &["response_id"],
];

#[derive(Default)]
struct RegistryInner {
  streams: HashMap<String, Arc<ActiveStream>>,
  /// Upstream-chosen ids pointing at a request id. First-write-wins; a
  /// collision keeps the original mapping.
  aliases: HashMap<String, String>,
}

/// Maps request ids to active streams and learns upstream aliases.
///
/// Upstream sometimes switches its own id partway through a response: the
/// first event carries the caller's request id, later ones only an
/// upstream `resp-…` id. Without alias learning those events would
/// orphan.
#[derive(Default)]
pub struct StreamRegistry {
  inner: Mutex<RegistryInner>,
}

impl StreamRegistry {
  pub fn register(&self, stream: Arc<ActiveStream>) {
    let mut inner = self.inner.lock();
    trace!("[stream] register {}", stream.request_id());
    inner
      .streams
      .insert(stream.request_id().to_string(), stream);
  }

  /// Removes the stream and purges any alias entries pointing at it.
  pub fn unregister(&self, request_id: &str) -> Option<Arc<ActiveStream>> {
    let mut inner = self.inner.lock();
    let stream = inner.streams.remove(request_id);
    if stream.is_some() {
      trace!("[stream] unregister {}", request_id);
      inner.aliases.retain(|_, target| target != request_id);
    }
    stream
  }

  /// Resolves an event to its stream: candidate fields first, then their
  /// alias targets, then the sole-active-stream fallback. Unresolvable
  /// events are dropped by the caller.
  pub fn resolve(&self, params: &JsonValue) -> Option<(String, Arc<ActiveStream>)> {
    let candidates = candidate_ids(params);
    let inner = self.inner.lock();
    for candidate in &candidates {
      if let Some(stream) = inner.streams.get(candidate) {
        return Some((candidate.clone(), stream.clone()));
      }
    }
    for candidate in &candidates {
      if let Some(request_id) = inner.aliases.get(candidate) {
        if let Some(stream) = inner.streams.get(request_id) {
          return Some((request_id.clone(), stream.clone()));
        }
      }
    }
    if inner.streams.len() == 1 {
      let (request_id, stream) = inner.streams.iter().next()?;
      debug!(
        "[stream] correlation fallback to sole active stream {}",
        request_id
      );
      return Some((request_id.clone(), stream.clone()));
    }
    None
  }

  /// Records every string-valued id-like field of a resolved event as an
  /// alias for the stream's request id.
  pub fn learn_aliases(&self, params: &JsonValue, request_id: &str) {
    let candidates = candidate_ids(params);
    if candidates.is_empty() {
      return;
    }
    let mut inner = self.inner.lock();
    for alias in candidates {
      if alias == request_id {
        continue;
      }
      match inner.aliases.entry(alias) {
        Entry::Vacant(entry) => {
          trace!("[stream] alias {} -> {}", entry.key(), request_id);
          entry.insert(request_id.to_string());
        },
        Entry::Occupied(entry) if entry.get() != request_id => {
          debug!(
            "[stream] alias collision on {} (kept {}, ignored {})",
            entry.key(),
            entry.get(),
            request_id
          );
        },
        Entry::Occupied(_) => {},
      }
    }
  }

  pub fn get(&self, request_id: &str) -> Option<Arc<ActiveStream>> {
    self.inner.lock().streams.get(request_id).cloned()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().streams.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().streams.is_empty()
  }

  /// Drains every stream, handing each to the caller. Used when the child
  /// dies and all streams must be failed.
  pub fn drain(&self) -> Vec<Arc<ActiveStream>> {
    let mut inner = self.inner.lock();
    inner.aliases.clear();
    inner.streams.drain().map(|(_, stream)| stream).collect()
  }
}

fn candidate_ids(params: &JsonValue) -> Vec<String> {
  let mut out = Vec::new();
  collect_ids(params, &mut out);
  if let Some(msg) = params.get("msg") {
    collect_ids(msg, &mut out);
  }
  out
}

fn collect_ids(value: &JsonValue, out: &mut Vec<String>) {
  for path in ID_FIELDS {
    let mut cursor = value;
    let mut found = true;
    for key in *path {
      match cursor.get(key) {
        Some(next) => cursor = next,
        None => {
          found = false;
          break;
        },
      }
    }
    if !found {
      continue;
    }
    if let Some(id) = cursor.as_str() {
      if !id.is_empty() && !out.iter().any(|seen| seen == id) {
        out.push(id.to_string());
      }
    }
  }
}
