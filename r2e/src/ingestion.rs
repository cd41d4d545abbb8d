//! Periodic cache maintenance and warming jobs, registered
//! against the hub's [`r2e_scheduler::Scheduler`] at [`crate::Hub::start`].

use std::sync::Arc;

use r2e_cache::{CacheConfig, MultiLevelCache};
use r2e_core::{DataPoint, TopicConfiguration};
use r2e_data::HistoricalStore;
use r2e_scheduler::{ScheduleConfig, Scheduler};

use crate::ArchiveConfig;

/// Register the maintenance sweep (demote/evict idle entries across every
/// tier) and the top-K warming pass for both caches the hub owns.
pub fn register_cache_jobs(
    scheduler: &Scheduler,
    cache_config: CacheConfig,
    cache_topics: Arc<MultiLevelCache<TopicConfiguration>>,
    cache_latest: Arc<MultiLevelCache<DataPoint>>,
) {
    let maintenance_topics = cache_topics.clone();
    let maintenance_latest = cache_latest.clone();
    scheduler.register(
        "cache-maintenance",
        ScheduleConfig::Interval(cache_config.maintenance_interval),
        Arc::new(move || {
            let topics = maintenance_topics.clone();
            let latest = maintenance_latest.clone();
            Box::pin(async move {
                let topics_report = topics.run_maintenance();
                let latest_report = latest.run_maintenance();
                tracing::debug!(
                    ?topics_report,
                    ?latest_report,
                    "cache maintenance sweep completed"
                );
            })
        }),
    );

    let warming_top_k = cache_config.warming_top_k;
    let warming_latest = cache_latest;
    scheduler.register(
        "cache-warming",
        ScheduleConfig::IntervalWithDelay {
            interval: cache_config.warming_interval,
            initial_delay: cache_config.warming_interval,
        },
        Arc::new(move || {
            let latest = warming_latest.clone();
            Box::pin(async move {
                let warmed = latest.warm_top_k(warming_top_k);
                tracing::debug!(warmed, "cache warming pass completed");
            })
        }),
    );
}

/// Register the historical-retention sweep: every `archive.interval`,
/// drop everything older than `archive.retention` from the historical
/// store. Disabled entirely when [`crate::HubConfig::archive`] is `None`
/// (the caller simply never registers this job).
pub fn register_archive_job(scheduler: &Scheduler, historical: Arc<dyn HistoricalStore>, archive: ArchiveConfig) {
    scheduler.register(
        "historical-archive",
        ScheduleConfig::Interval(archive.interval),
        Arc::new(move || {
            let historical = historical.clone();
            let retention_ms = archive.retention.as_millis() as i64;
            Box::pin(async move {
                let before_ms = crate::now_millis().saturating_sub(retention_ms);
                match historical.archive(before_ms).await {
                    Ok(archived) => tracing::debug!(archived, before_ms, "historical archive sweep completed"),
                    Err(err) => tracing::warn!(error = %err, "historical archive sweep failed"),
                }
            })
        }),
    );
}
