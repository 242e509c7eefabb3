use std::thread;

use docgraph_store::StoreError;
use tracing::warn;

use crate::config::DispatchMode;
use crate::deferred::{channel, Deferred};
use crate::error::MapperResult;

/// Run `work` according to `mode` and hand back its deferred result.
pub(crate) fn dispatch<T, F>(mode: DispatchMode, work: F) -> Deferred<T>
where
    T: Send + 'static,
    F: FnOnce() -> MapperResult<T> + Send + 'static,
{
    match mode {
        DispatchMode::Inline => Deferred::ready(work()),
        DispatchMode::Thread => {
            let (completer, deferred) = channel(None);
            let spawned = thread::Builder::new()
                .name("docgraph-worker".to_string())
                .spawn(move || completer.complete(work()));
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn store worker");
                return Deferred::ready(Err(StoreError::Unavailable(e.to_string()).into()));
            }
            deferred
        }
    }
}
