//! Request analytics: the durable, append-only log of analyze outcomes.
//!
//! # Architecture
//!
//! ```text
//! analyze() → MetricsStore::record (extract only) → Channel → MetricsWriter
//!                                                                  ↓
//!                                                       [Accumulate in buffer]
//!                                                                  ↓
//!                                                  [Batch write (transaction)]
//! ```
//!
//! # Key Design Decisions
//!
//! - **Recording never blocks the request path**: `record` is a bounded
//!   `try_send`; when the queue is full the record is dropped, counted, and
//!   logged rather than applying backpressure to callers.
//! - **Single writer**: one background task drains the channel and performs
//!   transactional batch inserts, so identifiers stay unique and strictly
//!   increasing without cross-request coordination.
//! - **Reads bypass the queue**: `recent` and `summarize` query the pool
//!   directly and only ever observe committed rows.

pub mod models;
pub mod store;
pub mod writer;

pub use models::{MetricsRecord, MetricsSummary, NewMetricsRecord};
pub use store::MetricsStore;
pub use writer::MetricsWriter;
