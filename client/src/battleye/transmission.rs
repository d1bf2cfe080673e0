//! Request/response tracking for a single command
//!
//! A [`Transmission`] is created for every command written to a connection.
//! The connection keeps one handle in its transmission table, keyed by the
//! wire sequence, and gives a clone to the caller. The reader loop feeds
//! response fragments into the table's handle; the caller awaits completion
//! on its own.
//!
//! Completion is latched: once the final fragment has been stored the
//! transmission stays done forever, so a caller that starts waiting late
//! still observes it. Nothing guarantees that a response ever arrives (UDP),
//! so callers that cannot wait indefinitely should use [`Transmission::wait`].

use crate::error::ClientError;
use protocol::{PacketError, Sequence};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Default)]
struct Reassembly {
    /// Fragments by index; iteration order is response order.
    fragments: BTreeMap<u8, Vec<u8>>,
    /// Part count announced by the first fragment.
    count: Option<u8>,
    complete: bool,
}

#[derive(Debug)]
struct Inner {
    key: Sequence,
    request: String,
    reassembly: Mutex<Reassembly>,
    response: OnceLock<String>,
    done: watch::Sender<bool>,
}

/// Handle to one outstanding command. Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct Transmission {
    inner: Arc<Inner>,
}

impl Transmission {
    pub fn new(key: Sequence, request: impl Into<String>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                key,
                request: request.into(),
                reassembly: Mutex::new(Reassembly::default()),
                response: OnceLock::new(),
                done,
            }),
        }
    }

    /// The sequence the command was sent with.
    pub fn key(&self) -> Sequence {
        self.inner.key
    }

    pub fn request(&self) -> &str {
        &self.inner.request
    }

    pub fn is_done(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Resolves once the full response has been received. Returns
    /// immediately if that already happened.
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// The reassembled response, or `None` while fragments are outstanding.
    pub fn response(&self) -> Option<String> {
        self.inner.response.get().cloned()
    }

    /// Waits up to `limit` for completion and returns the response.
    pub async fn wait(&self, limit: Duration) -> Result<String, ClientError> {
        tokio::time::timeout(limit, self.done())
            .await
            .map_err(|_| ClientError::ResponseTimeout(limit))?;
        Ok(self.response().unwrap_or_default())
    }

    /// True if both handles refer to the same command.
    pub fn is_same(&self, other: &Transmission) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stores fragment `index` of `count`. Returns true exactly once: for the
    /// call that supplied the last missing fragment.
    ///
    /// Fragments may arrive in any order; completion requires all `count`
    /// of them, and the response is their concatenation by index. Every
    /// fragment must agree with the count the first one announced.
    pub(crate) fn add_fragment(
        &self,
        index: u8,
        count: u8,
        data: &[u8],
    ) -> Result<bool, PacketError> {
        let mut reassembly = self
            .inner
            .reassembly
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if reassembly.complete {
            return Ok(false);
        }

        match reassembly.count {
            Some(expected) if expected != count => {
                return Err(PacketError::FragmentCountMismatch { expected, count });
            }
            Some(_) => {}
            None => reassembly.count = Some(count),
        }

        reassembly.fragments.insert(index, data.to_vec());
        if reassembly.fragments.len() < count as usize {
            return Ok(false);
        }
        reassembly.complete = true;

        let bytes: Vec<u8> = reassembly.fragments.values().flatten().copied().collect();
        drop(reassembly);

        let _ = self
            .inner
            .response
            .set(String::from_utf8_lossy(&bytes).into_owned());
        self.inner.done.send_replace(true);
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn fragment_count(&self) -> usize {
        self.inner
            .reassembly
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fragments
            .len()
    }
}

impl crate::rcon::Transmission for Transmission {
    fn key(&self) -> Sequence {
        self.key()
    }

    fn request(&self) -> &str {
        self.request()
    }

    async fn done(&self) {
        self.done().await
    }

    fn response(&self) -> Option<String> {
        self.response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transmission() {
        let transmission = Transmission::new(0, "test");
        assert_eq!(transmission.key(), 0);
        assert_eq!(transmission.request(), "test");
        assert!(!transmission.is_done());
        assert_eq!(transmission.response(), None);
    }

    #[test]
    fn test_single_fragment_completes() {
        let transmission = Transmission::new(1, "players");
        assert!(transmission.add_fragment(0, 1, b"test data").unwrap());
        assert!(transmission.is_done());
        assert_eq!(transmission.response().as_deref(), Some("test data"));
    }

    #[test]
    fn test_reverse_order_reassembly() {
        let transmission = Transmission::new(1, "players");

        assert!(!transmission.add_fragment(1, 2, b"data").unwrap());
        assert!(!transmission.is_done());
        assert_eq!(transmission.response(), None);

        assert!(transmission.add_fragment(0, 2, b"test ").unwrap());
        assert_eq!(transmission.response().as_deref(), Some("test data"));
    }

    #[test]
    fn test_in_order_reassembly() {
        let transmission = Transmission::new(1, "players");
        assert!(!transmission.add_fragment(0, 3, b"a").unwrap());
        assert!(!transmission.add_fragment(1, 3, b"b").unwrap());
        assert!(transmission.add_fragment(2, 3, b"c").unwrap());
        assert_eq!(transmission.response().as_deref(), Some("abc"));
    }

    #[test]
    fn test_duplicate_fragment_does_not_complete_early() {
        let transmission = Transmission::new(1, "players");
        assert!(!transmission.add_fragment(0, 2, b"one").unwrap());
        assert!(!transmission.add_fragment(0, 2, b"one").unwrap());
        assert_eq!(transmission.fragment_count(), 1);
        assert!(transmission.add_fragment(1, 2, b"two").unwrap());
    }

    #[test]
    fn test_conflicting_count_is_rejected() {
        let transmission = Transmission::new(1, "players");
        assert!(!transmission.add_fragment(0, 3, b"a").unwrap());

        let err = transmission.add_fragment(1, 2, b"b").unwrap_err();
        assert_eq!(err, PacketError::FragmentCountMismatch { expected: 3, count: 2 });
        assert!(!transmission.is_done());
        assert_eq!(transmission.fragment_count(), 1);

        assert!(!transmission.add_fragment(1, 3, b"b").unwrap());
        assert!(transmission.add_fragment(2, 3, b"c").unwrap());
        assert_eq!(transmission.response().as_deref(), Some("abc"));
    }

    #[test]
    fn test_is_same_compares_identity() {
        let transmission = Transmission::new(1, "players");
        let other = Transmission::new(1, "players");
        assert!(transmission.is_same(&transmission.clone()));
        assert!(!transmission.is_same(&other));
    }

    #[test]
    fn test_completion_fires_once() {
        let transmission = Transmission::new(1, "players");
        assert!(transmission.add_fragment(0, 1, b"first").unwrap());
        assert!(!transmission.add_fragment(0, 1, b"second").unwrap());
        assert_eq!(transmission.response().as_deref(), Some("first"));
    }

    #[test]
    fn test_clones_share_state() {
        let transmission = Transmission::new(5, "players");
        let handle = transmission.clone();
        transmission.add_fragment(0, 1, b"ok").unwrap();
        assert!(handle.is_done());
        assert_eq!(handle.response().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_done_blocks_until_complete() {
        let transmission = Transmission::new(1, "players");

        let pending = tokio::time::timeout(Duration::from_millis(20), transmission.done()).await;
        assert!(pending.is_err());

        let writer = transmission.clone();
        tokio::spawn(async move {
            writer.add_fragment(0, 1, b"late").unwrap();
        });

        transmission.done().await;
        assert_eq!(transmission.response().as_deref(), Some("late"));
    }

    #[test]
    fn test_done_wakes_on_last_fragment() {
        let transmission = Transmission::new(1, "players");
        let mut done = tokio_test::task::spawn(transmission.done());
        tokio_test::assert_pending!(done.poll());

        transmission.add_fragment(1, 2, b"b").unwrap();
        tokio_test::assert_pending!(done.poll());

        transmission.add_fragment(0, 2, b"a").unwrap();
        assert!(done.is_woken());
        tokio_test::assert_ready!(done.poll());
    }

    #[tokio::test]
    async fn test_done_after_completion_returns_immediately() {
        let transmission = Transmission::new(1, "players");
        transmission.add_fragment(0, 1, b"early").unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), transmission.done()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let transmission = Transmission::new(1, "players");
        let err = transmission
            .wait(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ResponseTimeout(_)));
    }

    #[tokio::test]
    async fn test_wait_returns_response() {
        let transmission = Transmission::new(1, "players");
        transmission.add_fragment(0, 1, b"Players on server: 0").unwrap();
        let response = transmission.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(response, "Players on server: 0");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let transmission = Transmission::new(1, "players");
        transmission.add_fragment(0, 1, &[b'o', 0xFF, b'k']).unwrap();
        assert_eq!(transmission.response().as_deref(), Some("o\u{FFFD}k"));
    }
}
