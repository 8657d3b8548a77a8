//! Record and error streams connecting pipeline stages
//!
//! Every stage hands data downstream over a bounded [`mpsc`] channel. Closing
//! a channel (dropping every sender) is the only completion signal: a closed
//! record stream means "no more data", a closed error stream means "no more
//! faults from this stage".

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the error streams. Faults are rare compared to records.
pub const ERROR_BUFFER: usize = 64;

/// Receiving half of a record stream
pub type RecordStream<T> = mpsc::Receiver<T>;

/// Receiving half of a stage's error stream
pub type ErrorStream = mpsc::Receiver<StreamError>;

/// A fault reported by a running stage
#[derive(Debug, Error)]
pub enum StreamError {
    /// Only one record was affected; the stage keeps going
    #[error("row error: {0:#}")]
    Row(eyre::Report),
    /// The stage (or one of its tasks) cannot continue
    #[error("fatal error: {0:#}")]
    Fatal(eyre::Report),
}

impl StreamError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Fatal(_))
    }

    pub fn into_report(self) -> eyre::Report {
        match self {
            StreamError::Row(e) | StreamError::Fatal(e) => e,
        }
    }
}

/// Create a bounded record channel
pub fn record_channel<T>(capacity: usize) -> (mpsc::Sender<T>, RecordStream<T>) {
    mpsc::channel(capacity.max(1))
}

/// Create a bounded error channel
pub fn error_channel() -> (mpsc::Sender<StreamError>, ErrorStream) {
    mpsc::channel(ERROR_BUFFER)
}

/// An error stream that is already closed: the stage never reports faults
pub fn closed_error_stream() -> ErrorStream {
    let (_, rx) = error_channel();
    rx
}

/// Why a send did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halted {
    /// The token fired while waiting for capacity
    Cancelled,
    /// The receiving side was dropped
    Closed,
}

/// Send `item`, giving up as soon as `cancel` fires
///
/// A producer blocked on a full channel must never outlive cancellation, so
/// every send in the pipeline goes through here.
pub async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> Result<(), Halted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Halted::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| Halted::Closed),
    }
}

/// Receive the next item, or `None` once the stream closes or `cancel` fires
pub async fn recv_or_cancel<T>(rx: &mut mpsc::Receiver<T>, cancel: &CancellationToken) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = rx.recv() => item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_or_cancel_unblocks_full_channel() {
        let (tx, _rx) = record_channel::<i32>(1);
        let cancel = CancellationToken::new();

        send_or_cancel(&tx, 1, &cancel).await.unwrap();

        // Channel is full now; cancellation must release the waiting sender
        let waiter = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { send_or_cancel(&tx, 2, &cancel).await })
        };
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(Halted::Cancelled));
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver() {
        let (tx, rx) = record_channel::<i32>(4);
        drop(rx);

        let result = send_or_cancel(&tx, 1, &CancellationToken::new()).await;
        assert_eq!(result, Err(Halted::Closed));
    }

    #[tokio::test]
    async fn test_closed_error_stream() {
        let mut errors = closed_error_stream();
        assert!(errors.recv().await.is_none());
    }

    #[test]
    fn test_stream_error_display() {
        let fault = StreamError::Row(eyre::eyre!("bad value in column 'x'"));
        assert!(!fault.is_fatal());
        assert_eq!(fault.to_string(), "row error: bad value in column 'x'");
    }

    #[test]
    fn test_stream_error_is_std_error() {
        let cause = eyre::eyre!("socket closed").wrap_err("query failed");
        let fault: Box<dyn std::error::Error + Send + Sync> = Box::new(StreamError::Fatal(cause));
        assert_eq!(fault.to_string(), "fatal error: query failed: socket closed");
    }
}
