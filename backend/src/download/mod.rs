//! Download engine: queue manager, workers, retry policy and throttling

mod manager;
mod progress;
mod retry;
mod throttle;
mod transfer;

pub use manager::{DownloadEvent, DownloadManager, DownloadStats, NewDownload};
pub use progress::ProgressGate;
pub use retry::{classify_status, FailureClass, RetryDecision, RetryPolicy};
pub use throttle::ThrottleController;
pub use transfer::{
    extract_filename, remove_partial, Signal, TransferEvent, TransferExecutor, TransferJob,
    TransferOutcome,
};
