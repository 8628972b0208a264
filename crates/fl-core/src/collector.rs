use crate::error::{CollectError, SourceError};
use crate::source::SourceClient;
use crate::store::RecordStore;
use crate::types::{EventRecord, LogPage, LogQuery, Resource, RunSummary};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub poll_interval: Duration,
    pub request_delay: Duration,
    pub page_size: u32,
    pub discovery_page_size: u32,
    pub lookback: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_pages_per_resource: u32,
    pub bookmark_overlap: Duration,
    pub event_types: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(6 * 60 * 60),
            request_delay: Duration::from_millis(2500),
            page_size: 50,
            discovery_page_size: 20,
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(10),
            max_pages_per_resource: 100,
            bookmark_overlap: Duration::from_secs(1),
            event_types: "1,2,3,4,5,6,7,8,9,10".to_string(),
        }
    }
}

pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}

/// Returns the `(start, end)` poll window in epoch milliseconds. `start`
/// never passes `now_ms - bookmark_overlap`, even for a bookmark in the
/// future.
pub fn query_window(bookmark: Option<i64>, now_ms: i64, config: &CollectorConfig) -> (i64, i64) {
    let overlap = millis(config.bookmark_overlap);
    let start = match bookmark {
        Some(last_event_time) => last_event_time
            .saturating_sub(overlap)
            .min(now_ms.saturating_sub(overlap)),
        None => now_ms.saturating_sub(millis(config.lookback)),
    };
    (start, now_ms)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn log_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub struct BatchCollector<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    config: CollectorConfig,
}

impl<C: SourceClient, S: RecordStore> BatchCollector<C, S> {
    pub fn new(client: Arc<C>, store: Arc<S>, config: CollectorConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub async fn discover_resources(&self) -> Result<Vec<Resource>, SourceError> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .client
                .list_resources(self.config.discovery_page_size, cursor.as_deref())
                .await?;
            let empty = page.resources.is_empty();
            resources.extend(page.resources);
            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) if !empty && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
            self.pause().await;
        }
        info!(count = resources.len(), "discovered resources");
        Ok(resources)
    }

    pub async fn collect_resource_events(
        &self,
        resource_id: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<EventRecord>, CollectError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            if pages >= self.config.max_pages_per_resource {
                warn!(resource_id, pages, "page ceiling reached, deferring the rest");
                break;
            }
            let query = LogQuery {
                resource_id: resource_id.to_string(),
                start_time,
                end_time,
                event_types: self.config.event_types.clone(),
                page_size: self.config.page_size,
                cursor: cursor.clone(),
            };
            let page = self.fetch_page(&query).await?;
            pages += 1;
            records.extend(
                page.entries
                    .iter()
                    .map(|entry| EventRecord::from_api(resource_id, entry)),
            );

            if !page.has_next {
                break;
            }
            let Some(next) = page.next_cursor.filter(|next| !next.is_empty()) else {
                break;
            };
            if cursor.as_deref() == Some(next.as_str()) {
                warn!(resource_id, cursor = %next, "pagination cursor repeated, stopping");
                break;
            }
            cursor = Some(next);
            self.pause().await;
        }
        Ok(records)
    }

    async fn fetch_page(&self, query: &LogQuery) -> Result<LogPage, CollectError> {
        let mut attempt = 0;
        loop {
            match self.client.list_events(query).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_rate_limited() => {
                    if attempt >= self.config.max_retries {
                        error!(
                            resource_id = %query.resource_id,
                            attempts = attempt + 1,
                            "rate limit retries exhausted"
                        );
                        return Err(CollectError::RateLimitExhausted {
                            attempts: attempt + 1,
                        });
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        resource_id = %query.resource_id,
                        delay_ms = log_millis(delay),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn collect_all(&self) -> Result<RunSummary, CollectError> {
        self.run_once(&CancellationToken::new()).await
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunSummary, CollectError> {
        let started = Instant::now();
        let run_id = self.store.start_run()?;
        let mut summary = RunSummary::new(run_id);

        let outcome = tokio::select! {
            outcome = self.collect_pass(&mut summary) => outcome,
            () = cancel.cancelled() => Err(CollectError::Cancelled),
        };

        summary.duration = started.elapsed();
        if let Err(err) = &outcome {
            summary.errors.push(err.to_string());
        }
        let status = summary.status();
        if let Err(err) = self.store.finish_run(
            run_id,
            summary.resources_collected,
            summary.events_collected,
            status,
        ) {
            error!(run_id, error = %err, "failed to record run completion");
        }

        outcome?;
        info!(
            run_id,
            events = summary.events_collected,
            collected = summary.resources_collected,
            found = summary.resources_found,
            failed = summary.resources_failed,
            duration_ms = log_millis(summary.duration),
            "collection complete"
        );
        Ok(summary)
    }

    async fn collect_pass(&self, summary: &mut RunSummary) -> Result<(), CollectError> {
        let resources = self
            .discover_resources()
            .await
            .map_err(CollectError::Discovery)?;
        summary.resources_found = resources.len();

        for resource in &resources {
            if resource.id.is_empty() {
                continue;
            }
            match self.collect_one(resource).await {
                Ok(inserted) => {
                    summary.resources_collected += 1;
                    summary.events_collected += inserted;
                }
                Err(err) => {
                    error!(resource_id = %resource.id, error = %err, "failed to collect resource");
                    summary.resources_failed += 1;
                    summary
                        .errors
                        .push(format!("{} ({}): {err}", resource.label(), resource.id));
                }
            }
            self.pause().await;
        }
        Ok(())
    }

    async fn collect_one(&self, resource: &Resource) -> Result<usize, CollectError> {
        let now_ms = Utc::now().timestamp_millis();
        let bookmark = self.store.get_bookmark(&resource.id)?;
        let (start_time, end_time) = query_window(bookmark, now_ms, &self.config);

        let records = self
            .collect_resource_events(&resource.id, start_time, end_time)
            .await?;
        if records.is_empty() {
            debug!(resource = resource.label(), "no new events");
            return Ok(0);
        }

        let inserted = self.store.insert(&records)?;
        if inserted > 0 {
            if let Some(max_time) = records.iter().map(|record| record.event_time).max() {
                self.store.advance_bookmark(&resource.id, max_time)?;
            }
        }
        info!(
            resource = resource.label(),
            fetched = records.len(),
            new = inserted,
            "collected resource"
        );
        Ok(inserted)
    }

    pub async fn run_daemon(&self, cancel: &CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "starting collector daemon"
        );
        loop {
            match self.run_once(cancel).await {
                Ok(summary) => {
                    for err in &summary.errors {
                        warn!(error = %err, "resource failed during run");
                    }
                }
                Err(CollectError::Cancelled) => break,
                Err(err) => error!(error = %err, "collection run failed"),
            }
            info!(
                interval_secs = self.config.poll_interval.as_secs(),
                "sleeping until next run"
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("collector daemon stopped");
    }

    async fn pause(&self) {
        if !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }
    }
}
