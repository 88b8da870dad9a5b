//! Background batch writer for the analytics log.
//!
//! This should be spawned as a tokio task. The strategy is:
//! 1. Block until at least one record arrives
//! 2. Non-blocking drain of all available records in the channel
//! 3. Write the batch immediately
//! 4. Repeat
//!
//! This minimizes latency at low load (single record → immediate write) while
//! getting batching efficiency at high load (records queue while writing →
//! bigger batch). On shutdown the channel is closed and drained so nothing
//! accepted before the signal is lost.

use std::time::Duration;

use metrics::{counter, histogram};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analytics::models::NewMetricsRecord;
use crate::analytics::store::WriteCommand;
use crate::config::AnalyticsConfig;

/// Single consumer of the analytics channel; owns all database writes.
pub struct MetricsWriter {
    pool: SqlitePool,
    receiver: mpsc::Receiver<WriteCommand>,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl MetricsWriter {
    pub(crate) fn new(pool: SqlitePool, receiver: mpsc::Receiver<WriteCommand>, config: &AnalyticsConfig) -> Self {
        Self {
            pool,
            receiver,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Runs the writer's background loop until shutdown or channel closure.
    pub async fn run(mut self, shutdown_token: CancellationToken) {
        info!(max_batch_size = self.batch_size, "Analytics writer started");

        let mut buffer: Vec<NewMetricsRecord> = Vec::with_capacity(self.batch_size);
        let mut flush_acks: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            // Step 1: Wait for at least one command OR shutdown
            tokio::select! {
                biased; // Check shutdown first

                _ = shutdown_token.cancelled() => {
                    info!("Shutdown signal received, draining analytics channel");
                    self.receiver.close();
                    while let Some(command) = self.receiver.recv().await {
                        self.accept(command, &mut buffer, &mut flush_acks);
                    }
                    self.flush_batch(&mut buffer).await;
                    acknowledge(&mut flush_acks);
                    info!("Analytics writer shutdown complete");
                    break;
                }

                maybe_command = self.receiver.recv() => {
                    match maybe_command {
                        Some(command) => self.accept(command, &mut buffer, &mut flush_acks),
                        None => {
                            // Channel closed (all senders dropped)
                            info!("Analytics channel closed, shutting down writer");
                            self.flush_batch(&mut buffer).await;
                            acknowledge(&mut flush_acks);
                            break;
                        }
                    }
                }
            }

            // Step 2: Non-blocking drain (up to batch_size). Stop at a flush
            // request so its acknowledgement stays ordered after the records
            // that preceded it.
            while buffer.len() < self.batch_size && flush_acks.is_empty() {
                match self.receiver.try_recv() {
                    Ok(command) => self.accept(command, &mut buffer, &mut flush_acks),
                    Err(_) => break, // Channel empty or closed
                }
            }

            // Step 3: Write immediately
            self.flush_batch(&mut buffer).await;
            acknowledge(&mut flush_acks);
        }
    }

    fn accept(&self, command: WriteCommand, buffer: &mut Vec<NewMetricsRecord>, flush_acks: &mut Vec<oneshot::Sender<()>>) {
        match command {
            WriteCommand::Record(record) => buffer.push(record),
            WriteCommand::Flush(ack) => flush_acks.push(ack),
        }
    }

    /// Flushes the buffer to the database, retrying with exponential backoff.
    ///
    /// After all retries are exhausted the batch is dropped and counted -
    /// losing a window of analytics is preferable to an unbounded buffer.
    async fn flush_batch(&self, buffer: &mut Vec<NewMetricsRecord>) {
        if buffer.is_empty() {
            return;
        }

        let batch_size = buffer.len();
        let start = std::time::Instant::now();

        let mut attempt = 0;
        loop {
            match self.insert_batch(buffer).await {
                Ok(()) => {
                    histogram!("alertctl_analytics_batch_duration_seconds").record(start.elapsed().as_secs_f64());
                    counter!("alertctl_analytics_batched_records_total").increment(batch_size as u64);
                    debug!(
                        batch_size = batch_size,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Flushed analytics batch"
                    );
                    break;
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Analytics batch write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, batch_size = batch_size, "Failed to write analytics batch, dropping it");
                    counter!("alertctl_analytics_batch_errors_total").increment(1);
                    break;
                }
            }
        }

        buffer.clear();
    }

    /// Write the batch inside a single transaction.
    async fn insert_batch(&self, records: &[NewMetricsRecord]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                "INSERT INTO analysis_metrics (ts, alert_text, success, latency_ms, error, top_k, num_sources)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(record.ts)
            .bind(&record.alert_text)
            .bind(record.success)
            .bind(record.latency_ms)
            .bind(&record.error)
            .bind(record.top_k)
            .bind(record.num_sources)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn acknowledge(flush_acks: &mut Vec<oneshot::Sender<()>>) {
    for ack in flush_acks.drain(..) {
        // The flusher may have given up waiting; that's fine.
        let _ = ack.send(());
    }
}
