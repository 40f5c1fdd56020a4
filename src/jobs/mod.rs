//! Background job scheduling

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::engine::DownloadEngine;
use crate::indexer::fetch::PageCache;

/// Initialize and start the job scheduler.
pub async fn start_scheduler(
    engine: Arc<DownloadEngine>,
    page_cache: PageCache,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Engine tick - fill free download slots every 10 seconds.
    let tick_engine = engine.clone();
    let engine_job = Job::new_async("*/10 * * * * *", move |_uuid, _l| {
        let engine = tick_engine.clone();
        Box::pin(async move {
            engine.tick().await;
        })
    })?;
    scheduler.add(engine_job).await?;

    // Page cache cleanup - hourly.
    let cache = page_cache.clone();
    let cache_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let cache = cache.clone();
        Box::pin(async move {
            cache.cleanup_expired();
        })
    })?;
    scheduler.add(cache_job).await?;

    scheduler.start().await?;

    info!("Job scheduler started");
    Ok(scheduler)
}
