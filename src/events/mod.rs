pub mod deposit_watcher;

pub use deposit_watcher::{
    scan_range, CycleReport, DepositWatcher, IngestError, RecordOutcome, BLOCK_TRACKER_KEY,
};
