//! Periodic capture scheduling.
//!
//! A session is one owned [CaptureScheduler]. While it runs, a single task loops over:
//! sleep for the interval, run [CapturePipeline::capture_once] to completion, repeat. The next
//! sleep is only armed after the previous capture settles, so captures never overlap and the
//! effective period is `interval + capture duration`.
//!
//! State moves `Idle -> Running -> (Stopping ->) Idle`. `stop` never aborts a capture that has
//! already started; the scheduler reports `Stopping` until it finishes.

use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::FutureExt;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{error::SchedulerError, utils::clock::Clock};

use pipeline::{CapturePipeline, TickOutcome};

pub mod naming;
pub mod pipeline;

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// `stop` was called while a capture was in flight. Collapses to `Idle` once it settles.
    Stopping,
}

/// When the first capture of a session happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstTick {
    /// One full interval after `start`.
    #[default]
    AfterInterval,
    /// Right away, then every interval.
    Immediate,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub first_tick: FirstTick,
}

struct Session {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: SchedulerState,
    /// Set by the loop while a capture runs. Read by `stop` to decide between Idle and Stopping.
    in_flight: bool,
    session: Option<Session>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of a capture session. Meant to be created once and handed to whatever toggles capturing
/// on and off. Dropping it stops the loop.
pub struct CaptureScheduler {
    pipeline: Arc<CapturePipeline>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    shared: Arc<Mutex<Shared>>,
}

impl CaptureScheduler {
    pub fn new(
        pipeline: Arc<CapturePipeline>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pipeline,
            clock,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: SchedulerState::Idle,
                in_flight: false,
                session: None,
            })),
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.shared).state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Starts capturing every `interval`. Fails with [SchedulerError::NoRuntime] outside a tokio
    /// runtime.
    pub fn start(&self, interval: Duration) -> Result<(), SchedulerError> {
        let mut shared = lock(&self.shared);
        match shared.state {
            SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
            SchedulerState::Stopping => return Err(SchedulerError::Stopping),
            SchedulerState::Idle => {}
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let token = CancellationToken::new();
        let handle = runtime.spawn(run_loop(
            self.pipeline.clone(),
            self.clock.clone(),
            interval,
            self.config.first_tick,
            token.clone(),
            self.shared.clone(),
        ));

        shared.state = SchedulerState::Running;
        shared.in_flight = false;
        shared.session = Some(Session { token, handle });
        info!(
            "Capture scheduler started with interval {interval:?}, first tick {:?}",
            self.config.first_tick
        );
        Ok(())
    }

    /// Stops scheduling captures. Once this returns no new capture will begin. A capture that is
    /// already running is left to finish. Calling it while not running does nothing.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let mut shared = lock(&self.shared);
        if shared.state != SchedulerState::Running {
            debug!("Stop requested while {:?}", shared.state);
            return Ok(());
        }

        if let Some(session) = shared.session.as_ref() {
            session.token.cancel();
        }

        shared.state = if shared.in_flight {
            info!("Capture scheduler stopping, waiting for the current capture");
            SchedulerState::Stopping
        } else {
            info!("Capture scheduler stopped");
            SchedulerState::Idle
        };
        Ok(())
    }

    /// [stop](Self::stop)s and waits for the loop to exit, leaving the scheduler `Idle`.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.stop()?;

        let session = lock(&self.shared).session.take();
        if let Some(session) = session {
            if let Err(e) = session.handle.await {
                error!("Capture loop ended abnormally {e:?}");
                let mut shared = lock(&self.shared);
                if shared.state == SchedulerState::Stopping {
                    shared.state = SchedulerState::Idle;
                    shared.in_flight = false;
                }
            }
        }
        Ok(())
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.shared).session.as_ref() {
            session.token.cancel();
        }
    }
}

/// Executes the capture loop of one session.
async fn run_loop(
    pipeline: Arc<CapturePipeline>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    first_tick: FirstTick,
    token: CancellationToken,
    shared: Arc<Mutex<Shared>>,
) {
    let mut wait = first_tick == FirstTick::AfterInterval;
    let mut tick = 0u64;
    loop {
        if wait {
            tokio::select! {
                // `stop` already moved the state to Idle, nothing was in flight.
                _ = token.cancelled() => return,
                _ = clock.sleep(interval) => (),
            }
        }
        wait = true;

        {
            let mut shared = lock(&shared);
            if token.is_cancelled() {
                return;
            }
            shared.in_flight = true;
        }

        tick += 1;
        run_tick(&pipeline)
            .instrument(info_span!("capture tick", tick))
            .await;

        {
            let mut shared = lock(&shared);
            shared.in_flight = false;
            if token.is_cancelled() {
                shared.state = SchedulerState::Idle;
                info!("Capture scheduler stopped after finishing tick {tick}");
                return;
            }
        }
    }
}

/// Runs one capture. Nothing that goes wrong in here may end the loop.
async fn run_tick(pipeline: &CapturePipeline) {
    match AssertUnwindSafe(pipeline.capture_once()).catch_unwind().await {
        Ok(Ok(TickOutcome::Persisted(path))) => debug!("Tick persisted {path:?}"),
        Ok(Ok(TickOutcome::NoTargets)) => debug!("Tick had nothing to capture"),
        Ok(Err(e)) => error!(step = e.step(), "Capture failed: {e:?}"),
        Err(_) => error!("Capture panicked, continuing with the next tick"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::Instant;

    use crate::{
        capture::{CaptureOutput, CaptureTarget, ScreenshotProvider},
        error::SchedulerError,
        fs::{BaseDirectory, FileSystem},
        utils::{
            clock::{AnchoredClock, Clock},
            logging::TEST_LOGGING,
        },
    };

    use super::{
        pipeline::{CapturePipeline, StorageConfig},
        CaptureScheduler, FirstTick, SchedulerConfig, SchedulerState,
    };

    #[derive(Default)]
    struct CallLog {
        listed: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        captures: Mutex<Vec<(Instant, Instant)>>,
    }

    impl CallLog {
        fn captures(&self) -> Vec<(Instant, Instant)> {
            self.captures.lock().unwrap().clone()
        }
    }

    struct StubProvider {
        calls: Arc<CallLog>,
        targets: usize,
        delay: Duration,
        panic_on: Option<usize>,
    }

    impl StubProvider {
        fn new(calls: Arc<CallLog>) -> Self {
            Self {
                calls,
                targets: 1,
                delay: Duration::ZERO,
                panic_on: None,
            }
        }
    }

    #[async_trait]
    impl ScreenshotProvider for StubProvider {
        async fn list_targets(&self) -> Result<Vec<CaptureTarget>> {
            self.calls.listed.fetch_add(1, Ordering::SeqCst);
            Ok((0..self.targets)
                .map(|i| CaptureTarget::new(format!("monitor-{i}")))
                .collect())
        }

        async fn capture_target(&self, _id: &str) -> Result<CaptureOutput> {
            let start = Instant::now();
            let running = self.calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.calls.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.in_flight.fetch_sub(1, Ordering::SeqCst);

            let index = {
                let mut captures = self.calls.captures.lock().unwrap();
                captures.push((start, Instant::now()));
                captures.len() - 1
            };
            if self.panic_on == Some(index) {
                panic!("capture backend blew up");
            }
            Ok(CaptureOutput::Bytes(b"png".to_vec()))
        }
    }

    #[derive(Default)]
    struct StubFs {
        attempts: AtomicUsize,
        failing_attempts: Vec<usize>,
        writes: Mutex<Vec<PathBuf>>,
    }

    impl StubFs {
        fn writes(&self) -> Vec<PathBuf> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileSystem for StubFs {
        async fn path_exists(&self, _path: &Path, _base: &BaseDirectory) -> Result<bool> {
            Ok(true)
        }

        async fn create_directory(&self, _path: &Path, _base: &BaseDirectory) -> Result<()> {
            Ok(())
        }

        async fn read_bytes(&self, _path: &Path) -> Result<Vec<u8>> {
            Err(anyhow!("stub provider returns bytes"))
        }

        async fn write_bytes(&self, path: &Path, _bytes: &[u8], _base: &BaseDirectory) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing_attempts.contains(&attempt) {
                return Err(anyhow!("permission denied"));
            }
            self.writes.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    /// Wall clock that never moves, as if every tick landed in the same millisecond.
    struct FrozenClock(DateTime<Utc>);

    #[async_trait]
    impl Clock for FrozenClock {
        fn time(&self) -> DateTime<Utc> {
            self.0
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }
    }

    fn start_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap()
    }

    fn scheduler_with_clock(
        provider: StubProvider,
        fs: Arc<StubFs>,
        clock: Arc<dyn Clock>,
        first_tick: FirstTick,
    ) -> CaptureScheduler {
        *TEST_LOGGING;
        let storage = StorageConfig {
            base: BaseDirectory::Custom(PathBuf::from("/data")),
            ..StorageConfig::default()
        };
        let pipeline = CapturePipeline::new(Arc::new(provider), fs, clock.clone(), storage);
        CaptureScheduler::new(Arc::new(pipeline), clock, SchedulerConfig { first_tick })
    }

    fn scheduler(provider: StubProvider, fs: Arc<StubFs>) -> CaptureScheduler {
        scheduler_with_clock(
            provider,
            fs,
            Arc::new(AnchoredClock::new(start_date())),
            FirstTick::AfterInterval,
        )
    }

    async fn advance(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_never_overlap() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let provider = StubProvider {
            delay: Duration::from_millis(300),
            ..StubProvider::new(calls.clone())
        };
        let scheduler = scheduler(provider, Arc::new(StubFs::default()));

        scheduler.start(Duration::from_millis(100))?;
        advance(2_000).await;
        scheduler.shutdown().await?;

        let captures = calls.captures();
        assert!(captures.len() >= 3, "only {} captures", captures.len());
        for pair in captures.windows(2) {
            let (_, previous_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start >= previous_end + Duration::from_millis(100));
        }
        assert_eq!(calls.max_in_flight.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn first_capture_waits_one_interval() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let scheduler = scheduler(StubProvider::new(calls.clone()), Arc::new(StubFs::default()));

        scheduler.start(Duration::from_millis(1_000))?;
        advance(999).await;
        assert_eq!(calls.listed.load(Ordering::SeqCst), 0);
        advance(2).await;
        assert_eq!(calls.listed.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_first_tick() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs::default());
        let scheduler = scheduler_with_clock(
            StubProvider::new(calls.clone()),
            fs.clone(),
            Arc::new(AnchoredClock::new(start_date())),
            FirstTick::Immediate,
        );

        scheduler.start(Duration::from_secs(10))?;
        advance(1).await;
        assert_eq!(fs.writes().len(), 1);
        advance(5_000).await;
        assert_eq!(fs.writes().len(), 1);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs::default());
        let scheduler = scheduler(StubProvider::new(calls.clone()), fs.clone());

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.stop()?;
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.start(Duration::from_millis(100))?;
        assert!(scheduler.is_active());
        advance(350).await;
        assert_eq!(fs.writes().len(), 3);

        scheduler.stop()?;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.stop()?;
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        advance(1_000).await;
        assert_eq!(fs.writes().len(), 3);
        assert_eq!(calls.listed.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_capture_finish() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs::default());
        let provider = StubProvider {
            delay: Duration::from_millis(500),
            ..StubProvider::new(calls.clone())
        };
        let scheduler = scheduler(provider, fs.clone());

        scheduler.start(Duration::from_millis(100))?;
        advance(150).await;
        scheduler.stop()?;
        assert_eq!(scheduler.state(), SchedulerState::Stopping);
        assert_eq!(
            scheduler.start(Duration::from_millis(100)),
            Err(SchedulerError::Stopping)
        );

        advance(1_000).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(fs.writes().len(), 1);
        assert_eq!(calls.captures().len(), 1);

        scheduler.start(Duration::from_millis(100))?;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.shutdown().await?;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_capture() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs::default());
        let provider = StubProvider {
            delay: Duration::from_millis(500),
            ..StubProvider::new(calls.clone())
        };
        let scheduler = scheduler(provider, fs.clone());

        scheduler.start(Duration::from_millis(100))?;
        advance(150).await;
        scheduler.shutdown().await?;

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(fs.writes().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let scheduler = scheduler(StubProvider::new(calls.clone()), Arc::new(StubFs::default()));

        scheduler.start(Duration::from_millis(1_000))?;
        assert_eq!(
            scheduler.start(Duration::from_millis(1_000)),
            Err(SchedulerError::AlreadyRunning)
        );

        advance(1_500).await;
        assert_eq!(calls.listed.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected() {
        let scheduler = scheduler(
            StubProvider::new(Arc::new(CallLog::default())),
            Arc::new(StubFs::default()),
        );
        assert_eq!(
            scheduler.start(Duration::ZERO),
            Err(SchedulerError::InvalidInterval)
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let calls = Arc::new(CallLog::default());
        let scheduler = scheduler(StubProvider::new(calls.clone()), Arc::new(StubFs::default()));

        assert_eq!(
            scheduler.start(Duration::from_millis(100)),
            Err(SchedulerError::NoRuntime)
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(calls.listed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_targets_keep_the_loop_alive() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs::default());
        let provider = StubProvider {
            targets: 0,
            ..StubProvider::new(calls.clone())
        };
        let scheduler = scheduler(provider, fs.clone());

        scheduler.start(Duration::from_millis(100))?;
        advance(450).await;

        assert_eq!(calls.listed.load(Ordering::SeqCst), 4);
        assert!(calls.captures().is_empty());
        assert!(fs.writes().is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_does_not_stop_the_loop() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs {
            failing_attempts: vec![0],
            ..StubFs::default()
        });
        let scheduler = scheduler(StubProvider::new(calls.clone()), fs.clone());

        scheduler.start(Duration::from_millis(100))?;
        advance(250).await;

        assert_eq!(calls.captures().len(), 2);
        assert_eq!(fs.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(fs.writes().len(), 1);
        assert!(scheduler.is_active());

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_capture_does_not_stop_the_loop() -> Result<()> {
        let calls = Arc::new(CallLog::default());
        let fs = Arc::new(StubFs::default());
        let provider = StubProvider {
            panic_on: Some(0),
            ..StubProvider::new(calls.clone())
        };
        let scheduler = scheduler(provider, fs.clone());

        scheduler.start(Duration::from_millis(100))?;
        advance(250).await;

        assert_eq!(calls.captures().len(), 2);
        assert_eq!(fs.writes().len(), 1);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_ticks_get_distinct_names() -> Result<()> {
        let fs = Arc::new(StubFs::default());
        let scheduler = scheduler_with_clock(
            StubProvider::new(Arc::new(CallLog::default())),
            fs.clone(),
            Arc::new(FrozenClock(start_date())),
            FirstTick::Immediate,
        );

        scheduler.start(Duration::from_nanos(1))?;
        while fs.writes().len() < 100 {
            advance(1).await;
        }
        scheduler.shutdown().await?;

        let writes = fs.writes();
        let unique = writes.iter().collect::<HashSet<_>>();
        assert!(writes.len() >= 100);
        assert_eq!(unique.len(), writes.len());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_ends_the_session() {
        let calls = Arc::new(CallLog::default());
        let scheduler = scheduler(StubProvider::new(calls.clone()), Arc::new(StubFs::default()));

        scheduler.start(Duration::from_millis(100)).unwrap();
        advance(150).await;
        drop(scheduler);
        advance(1_000).await;

        assert_eq!(calls.listed.load(Ordering::SeqCst), 1);
    }
}
