//! Pause and cancel requests, from handle to job.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    Run,
    Pause,
    Cancel,
}

/// Shared by the handle and the running job, so the job never sees the
/// sender vanish underneath it.
#[derive(Clone, Debug)]
pub(crate) struct Control {
    sender: Arc<watch::Sender<Signal>>,
}
impl Control {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(Signal::Run);
        Self { sender: Arc::new(sender) }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Signal> {
        self.sender.subscribe()
    }

    pub(crate) fn pause(&self) {
        // Cancel wins over pause, and pausing twice is a no-op.
        self.sender.send_if_modified(|signal| match signal {
            Signal::Run => {
                *signal = Signal::Pause;
                true
            },
            Signal::Pause | Signal::Cancel => false,
        });
    }

    pub(crate) fn resume(&self) {
        self.sender.send_if_modified(|signal| match signal {
            Signal::Pause => {
                *signal = Signal::Run;
                true
            },
            Signal::Run | Signal::Cancel => false,
        });
    }

    pub(crate) fn cancel(&self) {
        self.sender.send_replace(Signal::Cancel);
    }
}

/// Resolves once cancel has been requested.
pub(crate) fn cancelled(mut signals: watch::Receiver<Signal>) -> impl Future<Output = ()> + Send {
    async move {
        // The sender outlives every job, so an error can't happen; treat it
        // as a cancel all the same.
        let _ = signals.wait_for(|signal| *signal == Signal::Cancel).await;
    }
}
