//! Readiness of resources whose data shows up after they are created.
//!
//! A loader gets a [`Completion`] and the resource keeps the matching receiver.
//! The render thread checks the receiver when it wants to use the resource; it
//! never waits on it. If the resource is dropped first the completion finds
//! the channel closed and the data is discarded.

use futures::channel::oneshot;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Ready,
    Failed,
}

/// Producer side of a pending resource.
pub struct Completion<T>(oneshot::Sender<anyhow::Result<T>>);

impl<T> Completion<T> {
    pub fn complete(self, result: anyhow::Result<T>) {
        if self.0.send(result).is_err() {
            log::debug!("resource was dropped before its load finished, discarding the data");
        }
    }

    /// Whether the resource waiting on this completion still exists.
    pub fn is_wanted(&self) -> bool {
        !self.0.is_canceled()
    }
}

pub(crate) enum Deferred<T, R> {
    Pending(oneshot::Receiver<anyhow::Result<T>>),
    Ready(R),
    Failed,
}

impl<T, R> Deferred<T, R> {
    pub(crate) fn pending() -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        (Deferred::Pending(rx), Completion(tx))
    }

    pub(crate) fn state(&self) -> LoadState {
        match self {
            Deferred::Pending(_) => LoadState::Pending,
            Deferred::Ready(_) => LoadState::Ready,
            Deferred::Failed => LoadState::Failed,
        }
    }

    /// Turns arrived data into the ready resource via `upload`.
    ///
    /// Load failures only flip the state to `Failed`; upload errors are
    /// returned to the caller.
    pub(crate) fn resolve<E>(
        &mut self,
        label: &str,
        upload: impl FnOnce(T) -> Result<R, E>,
    ) -> Result<LoadState, E> {
        let Deferred::Pending(rx) = self else {
            return Ok(self.state());
        };
        match rx.try_recv() {
            Ok(None) => {}
            Ok(Some(Ok(data))) => {
                *self = Deferred::Ready(upload(data)?);
                log::debug!("`{label}` is ready");
            }
            Ok(Some(Err(e))) => {
                log::warn!("loading `{label}` failed: {e:#}");
                *self = Deferred::Failed;
            }
            Err(oneshot::Canceled) => {
                log::warn!("loading `{label}` was abandoned by its loader");
                *self = Deferred::Failed;
            }
        }
        Ok(self.state())
    }

    pub(crate) fn ready(&self) -> Option<&R> {
        match self {
            Deferred::Ready(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_pending_until_completed() {
        let (mut slot, completion) = Deferred::<u32, u32>::pending();
        assert_eq!(slot.resolve::<()>("n", |n| Ok(n * 2)), Ok(LoadState::Pending));
        completion.complete(Ok(21));
        assert_eq!(slot.resolve::<()>("n", |n| Ok(n * 2)), Ok(LoadState::Ready));
        assert_eq!(slot.ready(), Some(&42));
    }

    #[test]
    fn failures_and_abandoned_loads_end_failed() {
        let (mut failed, completion) = Deferred::<u32, u32>::pending();
        completion.complete(Err(anyhow::anyhow!("404")));
        assert_eq!(failed.resolve::<()>("a", Ok), Ok(LoadState::Failed));

        let (mut abandoned, completion) = Deferred::<u32, u32>::pending();
        drop(completion);
        assert_eq!(abandoned.resolve::<()>("b", Ok), Ok(LoadState::Failed));
    }

    #[test]
    fn late_completion_after_drop_is_harmless() {
        let (slot, completion) = Deferred::<u32, u32>::pending();
        drop(slot);
        assert!(!completion.is_wanted());
        completion.complete(Ok(1));
    }
}
