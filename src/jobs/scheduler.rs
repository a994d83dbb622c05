use time::{Duration, OffsetDateTime, Time, UtcOffset};
use tokio::sync::watch;
use tracing::info;

use crate::{config::ScheduleConfig, error::Result, jobs::Job};

/// Decides when a job runs; the job itself knows nothing about timing
pub trait Scheduler {
    async fn run<J: Job>(&self, job: &J) -> Result<()>;
}

/// Runs the job once, right now
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    async fn run<J: Job>(&self, job: &J) -> Result<()> {
        job.run(OffsetDateTime::now_utc()).await;
        Ok(())
    }
}

/// Runs the job every day at a wall-clock time in a fixed UTC offset.
///
/// A shutdown request only takes effect between runs; a started run always
/// completes.
#[derive(Debug, Clone)]
pub struct DailyScheduler {
    at: Time,
    offset: UtcOffset,
    run_on_start: bool,
    shutdown: Option<watch::Receiver<bool>>,
}

impl DailyScheduler {
    pub fn new(at: Time, offset: UtcOffset) -> Self {
        Self {
            at,
            offset,
            run_on_start: false,
            shutdown: None,
        }
    }

    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Stop once `true` is sent on the channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            at: config.run_at_time()?,
            offset: config.offset()?,
            run_on_start: config.run_on_start,
            shutdown: None,
        })
    }

    /// First scheduled instant strictly after `now`
    pub fn next_run_after(&self, now: OffsetDateTime) -> OffsetDateTime {
        let local = now.to_offset(self.offset);
        let today = local.date().with_time(self.at).assume_offset(self.offset);

        if today > now {
            today
        } else {
            (local.date() + Duration::days(1))
                .with_time(self.at)
                .assume_offset(self.offset)
        }
    }
}

/// Resolves once shutdown is requested; never, without a sender
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

impl Scheduler for DailyScheduler {
    async fn run<J: Job>(&self, job: &J) -> Result<()> {
        let mut shutdown = self.shutdown.clone();

        if self.run_on_start {
            job.run(OffsetDateTime::now_utc()).await;
        }

        loop {
            let now = OffsetDateTime::now_utc();
            let next = self.next_run_after(now);
            info!(job = job.name(), next_run = %next, "Scheduled next run");

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!(job = job.name(), "Scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep((next - now).unsigned_abs()) => {}
            }

            job.run(OffsetDateTime::now_utc()).await;
        }
    }
}
