const EMITTED_WINDOW_BYTES: usize = 256 * 1024;

/// Upstreams variously send true increments, duplicates of the same delta
/// under different event types, and cumulative snapshots. The client
/// appends whatever arrives, so only monotonic increments may go out.
/// This window keeps a rolling suffix of what was already emitted and
/// turns whatever comes in into the increment that is safe to append.
#[derive(Debug, Default)]
pub struct EmittedWindow {
  buf: String,
}

impl EmittedWindow {
  /// The increment of `incoming` that has not been emitted yet.
  ///
  /// Duplicate (window ends with `incoming`) yields nothing; snapshot
  /// (`incoming` extends the window) yields the tail; a partial overlap
  /// yields what follows the longest suffix/prefix match; anything else
  /// is disjoint and passes through verbatim.
  pub fn increment<'a>(&self, incoming: &'a str) -> &'a str {
    let emitted = self.buf.as_str();
    if emitted.ends_with(incoming) {
      return "";
    }
    if incoming.starts_with(emitted) {
      return &incoming[emitted.len()..];
    }
    let max_k = emitted.len().min(incoming.len());
    for k in (1..=max_k).rev() {
      if !incoming.is_char_boundary(k) || !emitted.is_char_boundary(emitted.len() - k) {
        continue;
      }
      if emitted.as_bytes()[emitted.len() - k..] == incoming.as_bytes()[..k] {
        return &incoming[k..];
      }
    }
    incoming
  }

  /// Computes the increment, records it, and returns it. Returns `None`
  /// when the input was a pure duplicate.
  pub fn apply(&mut self, incoming: &str) -> Option<String> {
    let increment = self.increment(incoming).to_string();
    if increment.is_empty() {
      return None;
    }
    self.push(&increment);
    Some(increment)
  }

  fn push(&mut self, emitted: &str) {
    self.buf.push_str(emitted);
    if self.buf.len() > EMITTED_WINDOW_BYTES {
      let mut cut = self.buf.len() - EMITTED_WINDOW_BYTES;
      while !self.buf.is_char_boundary(cut) {
        cut += 1;
      }
      self.buf.drain(..cut);
    }
  }

  pub fn len(&self) -> usize {
    self.buf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }
}
