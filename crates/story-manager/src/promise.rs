//! One-shot reply slots.

use tokio::sync::oneshot;

use crate::{Error, Result};

/// The reply side of a caller's request. An empty promise belongs to an
/// internal request nobody waits on.
pub(crate) struct Promise<T>(Option<oneshot::Sender<Result<T>>>);

impl<T> Promise<T> {
  pub fn channel() -> (Self, oneshot::Receiver<Result<T>>) {
    let (tx, rx) = oneshot::channel();
    (Self(Some(tx)), rx)
  }

  pub fn none() -> Self { Self(None) }

  pub fn is_none(&self) -> bool { self.0.is_none() }

  pub fn resolve(mut self, result: Result<T>) {
    if let Some(tx) = self.0.take() {
      // The caller may have stopped waiting.
      let _ = tx.send(result);
    }
  }

  pub fn ok(self, value: T) { self.resolve(Ok(value)) }

  pub fn fail(self, err: Error) { self.resolve(Err(err)) }
}

impl<T: Clone> Promise<T> {
  /// Resolve every waiter with the same outcome.
  pub fn resolve_all(waiters: Vec<Self>, result: Result<T>) {
    for waiter in waiters {
      waiter.resolve(result.clone());
    }
  }
}

impl<T> std::fmt::Debug for Promise<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(if self.0.is_some() { "Promise" } else { "Promise(none)" })
  }
}
