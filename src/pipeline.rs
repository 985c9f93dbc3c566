//! The poll loop.
//!
//! One cycle reads the watermark, identifies changed films up to the
//! source's latest change, and walks the pages: compile a bulk batch, write
//! it, advance the checkpoint (never past that latest change). The loop
//! then sleeps for `poll_interval` whether the cycle found work or not.
//!
//! Errors from a cycle are logged and the next cycle starts from the same
//! watermark. Only [`SyncError::is_fatal`](crate::error::SyncError::is_fatal)
//! errors end the loop.

use std::future::Future;
use std::time::Duration;

use movies_etl_core::transform;
use movies_etl_core::Watermark;

use crate::elastic::IndexWriter;
use crate::error::Result;
use crate::extract::Extractor;

/// Where a cycle starts extracting from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleMode {
    /// From the stored watermark.
    #[default]
    Incremental,
    /// From the Unix epoch, re-indexing every film. The stored watermark
    /// still only moves forward.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing changed since the watermark.
    Idle,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Size of the changed-id set.
    pub changed: usize,
    pub documents: usize,
    pub pages: usize,
    /// Watermark in effect after the cycle.
    pub watermark: Watermark,
}

pub struct Pipeline {
    extractor: Extractor,
    writer: IndexWriter,
    poll_interval: Duration,
}

impl Pipeline {
    pub fn new(extractor: Extractor, writer: IndexWriter, poll_interval: Duration) -> Self {
        Self {
            extractor,
            writer,
            poll_interval,
        }
    }

    pub fn writer(&self) -> &IndexWriter {
        &self.writer
    }

    /// Run one extract → transform → write cycle.
    ///
    /// With `dry_run`, pages are extracted and compiled but nothing is
    /// written and the checkpoint is left alone.
    pub async fn run_cycle(&self, mode: CycleMode, dry_run: bool) -> Result<CycleReport> {
        let current = self.writer.watermark().await;
        let since = match mode {
            CycleMode::Incremental => current,
            CycleMode::Full => Watermark::epoch(),
        };

        let changes = self.extractor.changed_ids(since).await?;
        if changes.is_empty() {
            tracing::debug!(since = %since, "no changes");
            return Ok(CycleReport {
                outcome: CycleOutcome::Idle,
                changed: 0,
                documents: 0,
                pages: 0,
                watermark: current,
            });
        }
        tracing::info!(
            since = %since,
            until = ?changes.until.map(|u| u.to_string()),
            ids = changes.len(),
            ?mode,
            "changes found"
        );

        let mut documents = 0;
        let mut pages = 0;
        let mut cursor = self.extractor.pages(&changes);
        while let Some(page) = cursor.next_page().await? {
            let batch = transform::compile(&page.rows, self.writer.index())?;
            pages += 1;
            documents += batch.len();

            if dry_run {
                tracing::info!(
                    page = pages,
                    documents = batch.len(),
                    candidate = ?page.candidate.map(|w| w.to_string()),
                    "dry run, skipping write"
                );
                continue;
            }
            self.writer.write_batch(&batch, page.candidate).await?;
        }

        let watermark = if dry_run {
            current
        } else {
            self.writer.watermark().await
        };
        tracing::info!(
            changed = changes.len(),
            documents,
            pages,
            watermark = %watermark,
            "cycle complete"
        );

        Ok(CycleReport {
            outcome: CycleOutcome::Completed,
            changed: changes.len(),
            documents,
            pages,
            watermark,
        })
    }

    /// Ensure the index exists, then poll until `shutdown` resolves or a
    /// fatal error occurs. Shutdown is only observed between cycles.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.writer.ensure_index().await?;
        tracing::info!(
            index = %self.writer.index(),
            checkpoint = %self.writer.checkpoint_backend(),
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "poll loop started"
        );

        tokio::pin!(shutdown);
        loop {
            match self.run_cycle(CycleMode::Incremental, false).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "fatal error, stopping");
                    return Err(e);
                }
                Err(e) => tracing::error!(error = %e, "cycle aborted, watermark unchanged"),
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
