use tokio::task::JoinHandle;

/// Shared shutdown handle. Tasks spawned through it are tracked, and
/// `shutdown` cancels them all and waits for the tracker to drain.
#[derive(Clone, Default)]
pub struct Graceful {
    cancel: tokio_util::sync::CancellationToken,
    tracker: tokio_util::task::TaskTracker,
}

impl Graceful {
    #[inline]
    #[track_caller]
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Cancels everything and waits for tracked tasks to exit. Gives up
    /// after ~30 seconds of stragglers rather than hanging the host.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();

        let mut count = 0;
        loop {
            tokio::select! {
                _ = self.tracker.wait() => {
                    tracing::info!("all tasks have exited");
                    break;
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(3)) => {
                    count += 1;
                    if count > 10 {
                        tracing::error!(pending = self.tracker.len(), "shutdown timeout expired, giving up");
                        break;
                    }
                    tracing::debug!(pending = self.tracker.len(), "waiting for tasks to exit");
                }
            }
        }
    }
}
