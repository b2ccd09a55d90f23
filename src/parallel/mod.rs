//! Generic batch execution framework
//!
//! Applies one worker function to every item of a batch, either inline in the
//! calling thread or on a pool of worker threads created for that batch.
//!
//! # Architecture Responsibilities
//!
//! The parallel module focuses exclusively on **execution mechanics**:
//!
//! ## What This Module Does:
//! - **Resource Discovery**: Detects available CPU cores using `num_cpus::get()`
//! - **Worker Lifecycle**: Runs a per-worker initializer before any item is serviced
//! - **Result Delivery**: Completion order or input order, gathered or streamed
//! - **Progress**: Reports every delivered result to a [`ProgressObserver`]
//!
//! ## What This Module Does NOT Do:
//! - **Domain Logic**: Knows nothing about images, detectors or output files
//! - **Fallback Policy**: Deciding what to do when a pool fails belongs to the caller
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │   Client        │    │   Parallel       │    │   Worker        │
//! │   (Folder)      │───▶│   Module         │───▶│   Threads       │
//! │                 │    │                  │    │                 │
//! │ • Item listing  │    │ • Startup check  │    │ • Initializer   │
//! │ • Model choice  │    │ • Ordering       │    │ • Worker fn     │
//! │ • Fallback      │    │ • Teardown       │    │                 │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use facebatch::parallel::{self, BatchOptions};
//!
//! // 0 workers processes the batch in the calling thread
//! let doubled = parallel::process(vec![1, 2, 3], |x| x * 2, Some(0), &BatchOptions::default())
//!     .unwrap()
//!     .into_vec()
//!     .unwrap();
//! assert_eq!(doubled, vec![2, 4, 6]);
//!
//! // A pool of 2 workers, results in input order
//! let options = BatchOptions::new("Squaring").preserve_order(true);
//! let squared = parallel::process(vec![1, 2, 3], |x| x * x, Some(2), &options)
//!     .unwrap()
//!     .into_vec()
//!     .unwrap();
//! assert_eq!(squared, vec![1, 4, 9]);
//! ```

pub mod core;
pub mod progress;

// Re-export main types for easier access
pub use self::core::{
    BatchExecutor, BatchOptions, BatchOutput, ExecutionStrategy, PoolConfig, ResultStream,
    StartMethod, WORKER_THREAD_PREFIX, process,
};
pub use progress::{BarProgress, ProgressObserver, SilentProgress};
