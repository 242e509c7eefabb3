//! Deferred results of store work.
//!
//! Submitting a write or a load never blocks: it hands back a [`Deferred`]
//! and the work runs elsewhere (see [`dispatch`](crate::dispatch)). The caller
//! decides when to block. The first result is memoized, so a `Deferred` can be
//! waited on any number of times, and cloned handles share it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use docgraph_store::StoreError;

use crate::error::{MapperError, MapperResult};

struct State<T> {
    result: Option<MapperResult<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    fn settle(&self, result: MapperResult<T>) {
        let wakers = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.result.is_some() {
                return;
            }
            state.result = Some(result);
            std::mem::take(&mut state.wakers)
        };
        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// The eventual outcome of a submitted operation.
pub struct Deferred<T = ()> {
    shared: Arc<Shared<T>>,
    /// Set while the transaction this result belongs to is still running.
    session_open: Option<Arc<AtomicBool>>,
}

/// The producing side of a [`Deferred`]. Dropping it unsettled settles the
/// deferred with [`StoreError::Cancelled`].
pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// A connected pair. Pass the session flag for results that only settle
/// when a transaction finishes.
pub(crate) fn channel<T>(session_open: Option<Arc<AtomicBool>>) -> (Completer<T>, Deferred<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            result: None,
            wakers: Vec::new(),
        }),
        settled: Condvar::new(),
    });
    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        Deferred {
            shared,
            session_open,
        },
    )
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, result: MapperResult<T>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Err(StoreError::Cancelled.into()));
        }
    }
}

impl<T> Deferred<T> {
    /// An already settled result.
    pub fn ready(result: MapperResult<T>) -> Self {
        let (completer, deferred) = channel(None);
        completer.complete(result);
        deferred
    }

    /// Whether waiting would return immediately.
    pub fn is_ready(&self) -> bool {
        self.lock().result.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.shared.state.lock().expect("lock poisoned")
    }

    fn pending_commit(&self) -> bool {
        self.session_open
            .as_ref()
            .is_some_and(|open| open.load(Ordering::Acquire))
    }
}

impl<T: Clone> Deferred<T> {
    /// Block until the operation finishes and return its result.
    ///
    /// Results of writes staged in a transaction only exist once that
    /// transaction has finished; waiting for one from inside the transaction
    /// body returns [`MapperError::PendingCommit`] instead of blocking forever.
    pub fn wait(&self) -> MapperResult<T> {
        let mut state = self.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            if self.pending_commit() {
                return Err(MapperError::PendingCommit);
            }
            state = self.shared.settled.wait(state).expect("lock poisoned");
        }
    }

    /// The result if already settled.
    pub fn try_result(&self) -> Option<MapperResult<T>> {
        self.lock().result.clone()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            session_open: self.session_open.clone(),
        }
    }
}

impl<T: Clone> Future for Deferred<T> {
    type Output = MapperResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock();
        if let Some(result) = &state.result {
            return Poll::Ready(result.clone());
        }
        if self.pending_commit() {
            return Poll::Ready(Err(MapperError::PendingCommit));
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("ready", &self.is_ready())
            .field("session_bound", &self.session_open.is_some())
            .finish()
    }
}

/// Wait for every deferred, then report the first failure, if any.
pub fn wait_all<'a, T, I>(deferreds: I) -> MapperResult<()>
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a Deferred<T>>,
{
    let mut first_error = None;
    for deferred in deferreds {
        if let Err(e) = deferred.wait() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn ready_is_memoized() {
        let d = Deferred::ready(Ok(7));
        assert!(d.is_ready());
        assert_eq!(d.wait().unwrap(), 7);
        assert_eq!(d.wait().unwrap(), 7);
        assert_eq!(d.try_result(), Some(Ok(7)));
    }

    #[test]
    fn wait_blocks_until_completed() {
        let (completer, deferred) = channel::<String>(None);
        assert!(!deferred.is_ready());
        assert_eq!(deferred.try_result(), None);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok("done".into()));
        });
        assert_eq!(deferred.clone().wait().unwrap(), "done");
        worker.join().unwrap();
        assert_eq!(deferred.wait().unwrap(), "done");
    }

    #[test]
    fn dropped_completer_cancels() {
        let (completer, deferred) = channel::<()>(None);
        drop(completer);
        assert_eq!(
            deferred.wait().unwrap_err(),
            MapperError::Store(StoreError::Cancelled)
        );
    }

    #[test]
    fn session_bound_result_reports_pending_commit() {
        let open = Arc::new(AtomicBool::new(true));
        let (completer, deferred) = channel::<()>(Some(Arc::clone(&open)));
        assert_eq!(deferred.wait().unwrap_err(), MapperError::PendingCommit);

        open.store(false, Ordering::Release);
        completer.complete(Ok(()));
        assert!(deferred.wait().is_ok());
    }

    #[test]
    fn wait_all_reports_first_failure_after_all_settle() {
        let ok = Deferred::ready(Ok(()));
        let bad = Deferred::ready(Err(MapperError::callback("first")));
        let worse = Deferred::ready(Err(MapperError::callback("second")));
        assert!(wait_all([&ok, &ok]).is_ok());
        assert_eq!(
            wait_all([&ok, &bad, &worse]).unwrap_err(),
            MapperError::callback("first")
        );
        assert!(wait_all(Vec::<&Deferred>::new()).is_ok());
    }

    #[tokio::test]
    async fn awaitable_from_async_code() {
        let (completer, deferred) = channel::<u32>(None);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(Ok(42));
        });
        assert_eq!(deferred.clone().await.unwrap(), 42);
        assert_eq!(deferred.await.unwrap(), 42);
        worker.join().unwrap();
    }
}
