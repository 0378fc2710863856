use std::{sync::Arc, time::Duration};

use mailet_common::{Signal, internal};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    task::JoinSet,
};

use super::{DispatchReport, Dispatcher};

impl Dispatcher {
    /// Run the worker pool until a shutdown signal is received.
    ///
    /// ## Graceful Shutdown
    ///
    /// When a shutdown signal is received:
    /// 1. Workers stop taking new mail
    /// 2. In-flight dispatches run to completion, up to `shutdown_timeout_secs`
    /// 3. Workers still running after that are aborted
    ///
    /// A mail whose dispatch was aborted keeps its last committed state and is
    /// picked up again on the next start.
    #[tracing::instrument(level = "trace", skip_all, fields(workers = self.config.workers))]
    pub async fn serve(self: Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            "Dispatcher starting with {} worker(s)",
            self.config.workers.max(1)
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            workers.spawn(Arc::clone(&self).work(worker, shutdown.resubscribe()));
        }

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    match sig {
                        Ok(sig) => internal!(level = INFO, "Dispatcher received {sig:?}"),
                        Err(e) => {
                            internal!(level = ERROR, "Dispatcher shutdown channel error: {e}");
                        }
                    }
                    break;
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => internal!(level = ERROR, "Dispatcher worker failed: {e}"),
                    None => break,
                }
            }
        }

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    internal!(level = ERROR, "Dispatcher worker failed: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            internal!(
                level = WARN,
                "Shutdown timeout exceeded, aborting {} worker(s)",
                workers.len()
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        internal!(level = INFO, "Dispatcher shutdown complete");
    }

    async fn work(self: Arc<Self>, worker: usize, mut shutdown: broadcast::Receiver<Signal>) {
        let idle = self.idle_interval();

        loop {
            // Lagged or closed both mean a signal went out.
            if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            match self.dispatch_next().await {
                Ok(DispatchReport::Idle) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = self.spool.notified() => {}
                        () = tokio::time::sleep(idle) => {}
                    }
                }
                Ok(report) => {
                    internal!(level = TRACE, "Worker {worker}: {report:?}");
                }
                Err(e) => {
                    internal!(level = ERROR, "Worker {worker} failed to dispatch: {e}");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(idle) => {}
                    }
                }
            }
        }

        internal!(level = DEBUG, "Worker {worker} stopped");
    }
}
