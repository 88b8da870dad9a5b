//! The [`MetricsStore`] handle: fire-and-forget writes, concurrent reads.

use metrics::counter;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::analytics::models::{MetricsRecord, MetricsSummary, NewMetricsRecord};
use crate::analytics::writer::MetricsWriter;
use crate::config::AnalyticsConfig;

/// Commands accepted by the background writer.
#[derive(Debug)]
pub(crate) enum WriteCommand {
    Record(NewMetricsRecord),
    /// Write everything received so far, then acknowledge.
    Flush(oneshot::Sender<()>),
}

/// Handle to the analytics log.
///
/// Cheap to clone; writes go through a bounded channel to the single
/// [`MetricsWriter`] task, reads go straight to the pool.
#[derive(Clone)]
pub struct MetricsStore {
    pool: SqlitePool,
    sender: mpsc::Sender<WriteCommand>,
    alert_text_max_chars: usize,
    error_max_chars: usize,
}

impl MetricsStore {
    /// Creates the store handle together with its background writer.
    ///
    /// The returned [`MetricsWriter`] must be spawned (`writer.run(token)`)
    /// for records to reach the database.
    pub fn new(pool: SqlitePool, config: &AnalyticsConfig) -> (Self, MetricsWriter) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);

        let store = Self {
            pool: pool.clone(),
            sender,
            alert_text_max_chars: config.alert_text_max_chars,
            error_max_chars: config.error_max_chars,
        };
        let writer = MetricsWriter::new(pool, receiver, config);

        (store, writer)
    }

    /// Enqueue one outcome record. Returns immediately.
    ///
    /// Best-effort: when the queue is full or the writer is gone the record
    /// is dropped, counted, and logged. Recording failure must never mask
    /// the analysis outcome it describes.
    pub fn record(&self, mut record: NewMetricsRecord) {
        record.alert_text = clamp_chars(&record.alert_text, self.alert_text_max_chars);
        record.error = record.error.map(|e| clamp_chars(&e, self.error_max_chars));

        match self.sender.try_send(WriteCommand::Record(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("alertctl_analytics_dropped_records_total", "reason" => "queue_full").increment(1);
                warn!("Analytics queue full, dropping metrics record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                counter!("alertctl_analytics_dropped_records_total", "reason" => "writer_gone").increment(1);
                warn!("Analytics writer is gone, dropping metrics record");
            }
        }
    }

    /// Wait until everything enqueued before this call has been written.
    ///
    /// Used at shutdown and by tests; the channel is FIFO so the
    /// acknowledgement orders strictly after all prior records.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(WriteCommand::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// The `limit` most recent records, most recent first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<MetricsRecord>, sqlx::Error> {
        sqlx::query_as::<_, MetricsRecord>(
            "SELECT id, ts, alert_text, success, latency_ms, error, top_k, num_sources
             FROM analysis_metrics ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Rolling statistics over the `limit` most recent records (or all, if
    /// fewer exist).
    ///
    /// Percentile method, fixed and tested: nearest-rank on the zero-based
    /// rounded index - sort ascending and take `sorted[round(0.95 * (n - 1))]`.
    /// An empty window reports zero for every field.
    pub async fn summarize(&self, limit: i64) -> Result<MetricsSummary, sqlx::Error> {
        let rows: Vec<(bool, i64)> =
            sqlx::query_as("SELECT success, latency_ms FROM analysis_metrics ORDER BY id DESC LIMIT ?1")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        Ok(summarize_rows(&rows))
    }
}

fn summarize_rows(rows: &[(bool, i64)]) -> MetricsSummary {
    if rows.is_empty() {
        return MetricsSummary::empty();
    }

    let count = rows.len() as i64;
    let successes = rows.iter().filter(|(success, _)| *success).count();

    let mut latencies: Vec<i64> = rows.iter().map(|(_, latency)| *latency).collect();
    latencies.sort_unstable();

    MetricsSummary {
        count,
        success_rate: successes as f64 / count as f64,
        avg_latency_ms: latencies.iter().sum::<i64>() as f64 / count as f64,
        p95_latency_ms: p95_nearest_rank(&latencies),
    }
}

/// Nearest-rank p95 over an ascending-sorted, non-empty slice.
fn p95_nearest_rank(sorted: &[i64]) -> f64 {
    let idx = (0.95 * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx] as f64
}

/// Character-boundary-safe truncation for stored text fields.
fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
