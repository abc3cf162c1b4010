//! Process exit notification.
//!
//! A `watch` channel holding `None` until the process exits. Any number of
//! observers can wait on it and the value is set at most once.

use tokio::sync::watch;

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Failed(String),
}

impl ProcessExit {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Sending half, owned by whatever waits on the OS process.
#[derive(Debug)]
pub struct ExitNotifier {
    tx: watch::Sender<Option<ProcessExit>>,
}

impl ExitNotifier {
    /// Publish the exit outcome. Returns false if one was already published.
    pub fn notify(&self, exit: ProcessExit) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(exit);
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> ExitSignal {
        ExitSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half, returned by `ProcessHandle::done`.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ExitSignal {
    pub fn channel() -> (ExitNotifier, ExitSignal) {
        let (tx, rx) = watch::channel(None);
        (ExitNotifier { tx }, ExitSignal { rx })
    }

    /// Wait for the exit outcome.
    ///
    /// If the notifier is dropped without publishing, the process is
    /// reported as failed.
    pub async fn wait(mut self) -> ProcessExit {
        match self.rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit)
                .clone()
                .unwrap_or_else(|| ProcessExit::Failed("exit status unavailable".into())),
            Err(_) => ProcessExit::Failed("exit notifier dropped".into()),
        }
    }

    /// Non-blocking check.
    pub fn try_get(&self) -> Option<ProcessExit> {
        self.rx.borrow().clone()
    }
}
