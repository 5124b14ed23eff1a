use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use super::{failure_message, register, wait_for_run, DriverError, WorkloadError};
use crate::{
    blocks::BlockAccessor,
    config::{BenchConfig, OnlineApp},
    protocol::{ControllerClient, Message, ProtocolError},
    registry::Status,
};

const SCHEDULE_WINDOW: Duration = Duration::from_secs(60);

/// One instance of an online application. The driver calls [OnlineWorkload::execute]
/// repeatedly at the configured rate until it is told to stop.
#[async_trait]
pub trait OnlineWorkload: Send {
    /// Run one transaction
    async fn execute(&mut self) -> Result<(), WorkloadError>;
}

/// Creates the workload instances of an online app worker
pub trait WorkloadFactory: Send + Sync {
    /// Create instance number `instance` of `app`
    fn create(
        &self,
        app: OnlineApp,
        instance: u32,
        accessor: Arc<dyn BlockAccessor>,
        config: &BenchConfig,
    ) -> Box<dyn OnlineWorkload>;
}

/// Random execution times, `per_min` of them in every minute. Apps with a rate of 0 are never
/// scheduled.
struct Schedule {
    per_min: u32,
    window_start: Instant,
    pending: VecDeque<Instant>,
    rng: StdRng,
}

impl Schedule {
    fn new(per_min: u32) -> Self {
        debug_assert!(per_min > 0);
        Self {
            per_min,
            window_start: Instant::now(),
            pending: VecDeque::new(),
            rng: StdRng::from_entropy(),
        }
    }

    fn next(&mut self) -> Instant {
        if self.pending.is_empty() {
            let now = Instant::now();
            if self.window_start + SCHEDULE_WINDOW < now {
                warn!(
                    behind = ?now.duration_since(self.window_start),
                    "Large delay in the schedule, resetting the base time"
                );
                self.window_start = now;
            }
            let mut offsets: Vec<u64> = (0..self.per_min)
                .map(|_| self.rng.gen_range(0..SCHEDULE_WINDOW.as_millis() as u64))
                .collect();
            offsets.sort_unstable();
            let base = self.window_start;
            self.pending
                .extend(offsets.into_iter().map(|o| base + Duration::from_millis(o)));
            self.window_start += SCHEDULE_WINDOW;
        }
        self.pending.pop_front().unwrap_or(self.window_start)
    }
}

struct ScheduledWorkload {
    workload: Box<dyn OnlineWorkload>,
    schedule: Schedule,
    exec_count: Arc<AtomicU64>,
}

impl ScheduledWorkload {
    async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<(), WorkloadError> {
        loop {
            if *stop.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep_until(self.schedule.next()) => (),
                _ = stop.changed() => return Ok(()),
            }
            self.workload.execute().await?;
            self.exec_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Execution counters, summed per app name on reporting
type Counters = Vec<(&'static str, Arc<AtomicU64>)>;

/// The status line an online app worker reports while running
pub fn status_line(
    uptime: Duration,
    counts: impl IntoIterator<Item = (&'static str, u64)>,
) -> String {
    let mut per_name: BTreeMap<&str, u64> = BTreeMap::new();
    for (name, count) in counts {
        *per_name.entry(name).or_default() += count;
    }
    let counts = per_name
        .iter()
        .map(|(name, count)| format!("{name} = {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "uptime = {:.3} sec, exec count({counts})",
        uptime.as_secs_f64()
    )
}

fn snapshot(counters: &Counters) -> impl Iterator<Item = (&'static str, u64)> + '_ {
    counters
        .iter()
        .map(|(name, count)| (*name, count.load(Ordering::Relaxed)))
}

fn create_workloads(
    factory: &dyn WorkloadFactory,
    config: &BenchConfig,
    accessor: &Arc<dyn BlockAccessor>,
) -> (Vec<ScheduledWorkload>, Counters) {
    let mut workloads = Vec::new();
    let mut counters = Counters::new();
    for app in OnlineApp::ALL {
        let settings = config.online_app(app);
        if settings.per_min == 0 {
            continue;
        }
        for instance in 0..settings.threads {
            let exec_count = Arc::new(AtomicU64::new(0));
            counters.push((app.name(), Arc::clone(&exec_count)));
            workloads.push(ScheduledWorkload {
                workload: factory.create(app, instance, Arc::clone(accessor), config),
                schedule: Schedule::new(settings.per_min),
                exec_count,
            });
        }
    }
    (workloads, counters)
}

/// Drive an online app worker: register, wait to be started, run the workloads until the
/// controller stops the worker, then report the outcome.
pub async fn run_online_app<R, W>(
    mut client: ControllerClient<R, W>,
    factory: &dyn WorkloadFactory,
) -> Result<(), DriverError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let config = register(&mut client, Message::InitOnlineApp).await?;
    let client = Arc::new(client);
    let accessor: Arc<dyn BlockAccessor> = Arc::clone(&client) as Arc<dyn BlockAccessor>;
    let (workloads, counters) = create_workloads(factory, &config, &accessor);
    info!(workloads = workloads.len(), "Created online workloads");

    if !wait_for_run(&client).await? {
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let start = Instant::now();
    let handles: Vec<JoinHandle<Result<(), WorkloadError>>> = workloads
        .into_iter()
        .map(|w| tokio::spawn(w.run(stop_rx.clone())))
        .collect();
    client.update_status(Status::Running, "Started.").await?;

    let supervised = supervise(&client, &config, &handles, &counters, start).await;
    stop_tx.send_replace(true);
    let mut failure = None;
    for handle in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(WorkloadError::Panicked(e.to_string())),
        };
        if let Err(e) = result {
            failure.get_or_insert(e);
        }
    }
    supervised?;

    match failure {
        None => {
            client
                .update_status(Status::Success, "Finished successfully.")
                .await?;
            info!("Online application client finished successfully");
            client.close().await?;
            Ok(())
        }
        Some(e) => {
            client
                .update_status(Status::Fail, &failure_message(&e))
                .await?;
            error!(error = %e, "Online application client finished with an error");
            client.close().await?;
            Err(e.into())
        }
    }
}

/// Report progress until the controller says stop, a workload ends early or the time limit is
/// reached
async fn supervise<R, W>(
    client: &ControllerClient<R, W>,
    config: &BenchConfig,
    handles: &[JoinHandle<Result<(), WorkloadError>>],
    counters: &Counters,
    start: Instant,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        if client.poll(&[Message::RequestStop]).await? == Message::RequestStop {
            info!("Stop requested by controller");
            return Ok(());
        }
        if handles.iter().any(JoinHandle::is_finished) {
            warn!("A workload ended unexpectedly");
            return Ok(());
        }
        if config
            .exec_time_limit()
            .is_some_and(|limit| start.elapsed() >= limit)
        {
            info!("Execution time limit reached");
            return Ok(());
        }
        let status = status_line(start.elapsed(), snapshot(counters));
        debug!(%status, "Reporting progress");
        client.update_status(Status::Running, &status).await?;
        tokio::time::sleep(client.polling_interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::ClientType,
        testing::{fast_config, TestCluster},
        worker::{run_command, SyntheticWorkloads},
    };

    struct Failing;

    #[async_trait]
    impl OnlineWorkload for Failing {
        async fn execute(&mut self) -> Result<(), WorkloadError> {
            Err(WorkloadError::Failed("boom".to_string()))
        }
    }

    struct FailingFactory;

    impl WorkloadFactory for FailingFactory {
        fn create(
            &self,
            _app: OnlineApp,
            _instance: u32,
            _accessor: Arc<dyn BlockAccessor>,
            _config: &BenchConfig,
        ) -> Box<dyn OnlineWorkload> {
            Box::new(Failing)
        }
    }

    #[tokio::test]
    async fn stopped_before_running() {
        let cluster = TestCluster::start(fast_config()).await;
        let client = cluster.connect().await;
        let driver = tokio::spawn(async move { run_online_app(client, &SyntheticWorkloads).await });

        cluster.wait_for(ClientType::OnlineApp, Status::Ready).await;
        cluster.controller.registry().stop_online_apps();
        driver.await.unwrap().unwrap();

        let info = cluster.wait_for(ClientType::OnlineApp, Status::Down).await;
        assert_eq!(info.last_message(), "Connection closed by the client.");
    }

    /// Generators populate blocks while running, every drawn block is submitted by the end
    #[tokio::test]
    async fn runs_until_stopped() {
        let config = BenchConfig {
            master_delete_insert_thread_count: 2,
            master_delete_insert_records_per_min: 60_000,
            history_update_thread_count: 1,
            history_update_records_per_min: 60_000,
            ..fast_config()
        };
        let cluster = TestCluster::start(config).await;
        let client = cluster.connect().await;
        let driver = tokio::spawn(async move { run_online_app(client, &SyntheticWorkloads).await });

        cluster.wait_for(ClientType::OnlineApp, Status::Ready).await;
        let reply = run_command(cluster.addr, Message::StartExecution).await.unwrap();
        assert_eq!(reply.len(), 1);
        let info = cluster.wait_for(ClientType::OnlineApp, Status::Running).await;

        tokio::time::timeout(Duration::from_secs(10), async {
            while cluster.controller.active_block_info().number_of_active_blocks() < 5 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert!(info.last_message().starts_with("uptime = ") || info.last_message() == "Started.");

        cluster.controller.registry().stop_online_apps();
        driver.await.unwrap().unwrap();
        let info = cluster.wait_for(ClientType::OnlineApp, Status::Success).await;
        assert_eq!(info.last_message(), "Finished successfully.");

        let blocks = cluster.controller.active_block_info();
        assert_eq!(
            blocks.watermark(),
            Some(blocks.number_of_active_blocks() - 1)
        );
    }

    #[tokio::test]
    async fn workload_failure_is_reported() {
        let config = BenchConfig {
            history_insert_thread_count: 1,
            history_insert_transaction_per_min: 60_000,
            ..fast_config()
        };
        let cluster = TestCluster::start(config).await;
        let client = cluster.connect().await;
        let driver = tokio::spawn(async move { run_online_app(client, &FailingFactory).await });

        cluster.wait_for(ClientType::OnlineApp, Status::Ready).await;
        run_command(cluster.addr, Message::StartExecution).await.unwrap();
        let err = driver.await.unwrap().unwrap_err();
        assert!(matches!(err, DriverError::Workload(WorkloadError::Failed(_))));

        let info = cluster.wait_for(ClientType::OnlineApp, Status::Fail).await;
        assert_eq!(info.last_message(), "Aborted with exception: boom");
    }

    #[test]
    fn status_line_sums_per_name() {
        let line = status_line(
            Duration::from_millis(12_345),
            [
                ("MasterUpdateApp", 3),
                ("HistoryInsertApp", 1),
                ("MasterUpdateApp", 4),
            ],
        );
        assert_eq!(
            line,
            "uptime = 12.345 sec, exec count(HistoryInsertApp = 1, MasterUpdateApp = 7)"
        );
        assert_eq!(
            status_line(Duration::ZERO, []),
            "uptime = 0.000 sec, exec count()"
        );
    }

    #[tokio::test]
    async fn schedule_spreads_over_window() {
        let mut schedule = Schedule::new(50);
        let start = schedule.window_start;
        let mut previous = start;
        for _ in 0..50 {
            let at = schedule.next();
            assert!(at >= previous);
            assert!(at < start + SCHEDULE_WINDOW);
            previous = at;
        }
        // the next window follows directly
        let at = schedule.next();
        assert!(at >= start + SCHEDULE_WINDOW);
    }

    /// An app is only created when it has both threads and a rate
    #[test]
    fn zero_rate_disables_app() {
        let config = BenchConfig {
            master_update_thread_count: 3,
            master_update_records_per_min: 0,
            history_insert_thread_count: 2,
            history_insert_transaction_per_min: 10,
            ..fast_config()
        };
        let accessor: Arc<dyn BlockAccessor> = Arc::new(crate::blocks::BlockAllocator::new());
        let (workloads, counters) = create_workloads(&SyntheticWorkloads, &config, &accessor);
        assert_eq!(workloads.len(), 2);
        assert!(counters.iter().all(|(name, _)| *name == "HistoryInsertApp"));
    }
}
