//! Runs concurrent upload/download cycles against the avatar service.
//!
//! The [`LoadDriver`] starts `concurrency` independent slots. Every slot loops through
//! upload → download → upload until the upload budget is used up:
//!
//! - A successful upload updates the upload statistics and is followed by a download of the
//!   URL returned by the service.
//! - A successful download updates the download statistics and closes the transaction.
//! - A failure at any step counts as an error and abandons the transaction. The slot starts a
//!   fresh upload right away, so there is no backoff and the failed step is never retried.
//!
//! Failed uploads do not count towards the budget, so a permanently failing service keeps the
//! driver busy until it is shut down through [`LoadDriver::shutdown_token`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use avatar_client::{Avatar, Downloaded, Error, Transaction, TransactionId, Uploaded};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::report::Status;
use crate::stats::{CumulativeStats, Latencies};
use crate::window::{DEFAULT_WINDOW_SIZE, RollingWindow, Sample};

/// Tuning knobs of a [`LoadDriver`].
#[derive(Clone, Debug)]
pub struct DriverOptions {
    /// Number of slots running transactions concurrently.
    pub concurrency: usize,
    /// Number of successful uploads after which no new transactions are started.
    ///
    /// `0` means unlimited.
    pub budget: u64,
    /// Delay between the first uploads of consecutive slots.
    pub stagger: Duration,
    /// Interval of the periodic status report. `Duration::ZERO` disables the report.
    pub report_interval: Duration,
    /// Capacity of the upload and download [`RollingWindow`]s.
    pub window_size: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            budget: 1000,
            stagger: Duration::from_millis(200),
            report_interval: Duration::from_secs(2),
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// The step a live transaction is currently in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// The image is being uploaded.
    Uploading,
    /// The uploaded image is being downloaded again.
    Downloading,
}

/// A transaction that has been started but has neither completed nor failed yet.
#[derive(Clone, Debug)]
pub struct LiveTransaction {
    /// The current step.
    pub phase: Phase,
    /// The download URL, once the upload has returned one.
    pub url: Option<String>,
}

/// Everything a [`LoadDriver`] tracks while running.
#[derive(Clone, Debug)]
pub struct LoadDriverState {
    /// Process-wide counters.
    pub stats: CumulativeStats,
    /// The most recent successful uploads.
    pub uploads: RollingWindow,
    /// The most recent successful downloads.
    pub downloads: RollingWindow,
    /// Latency distributions of successful transfers.
    pub latency: Latencies,
    /// Transactions currently in flight.
    pub live: HashMap<TransactionId, LiveTransaction>,
}

impl LoadDriverState {
    /// Creates empty state with rolling windows of the given capacity.
    pub fn new(window_size: usize) -> Self {
        Self {
            stats: CumulativeStats::default(),
            uploads: RollingWindow::new(window_size),
            downloads: RollingWindow::new(window_size),
            latency: Latencies::default(),
            live: HashMap::new(),
        }
    }

    /// Returns the periodic status, or `None` while uploads or downloads have no completions.
    pub fn status(&self) -> Option<Status> {
        let CumulativeStats {
            uploads,
            downloads,
            errors,
        } = self.stats;

        if uploads.count == 0 || downloads.count == 0 {
            return None;
        }

        Some(Status {
            uploads,
            downloads,
            recent_upload: self.uploads.average(),
            recent_download: self.downloads.average(),
            errors,
            active: self.live.len(),
        })
    }

    fn begin(&mut self) -> TransactionId {
        loop {
            let id = TransactionId::random();
            if let Entry::Vacant(entry) = self.live.entry(id) {
                entry.insert(LiveTransaction {
                    phase: Phase::Uploading,
                    url: None,
                });
                return id;
            }
        }
    }

    fn complete_upload(&mut self, elapsed: Duration, bytes: u64) {
        self.stats.uploads.record(bytes, elapsed);
        self.latency.upload.add(elapsed.as_secs_f64());
        if !elapsed.is_zero() {
            self.uploads.add(Sample::new(bytes, elapsed));
        }
    }

    fn begin_download(&mut self, id: TransactionId, url: &str) {
        if let Some(transaction) = self.live.get_mut(&id) {
            transaction.phase = Phase::Downloading;
            transaction.url = Some(url.to_owned());
        }
    }

    fn complete_download(&mut self, id: TransactionId, elapsed: Duration, bytes: u64) {
        self.stats.downloads.record(bytes, elapsed);
        self.latency.download.add(elapsed.as_secs_f64());
        if !elapsed.is_zero() {
            self.downloads.add(Sample::new(bytes, elapsed));
        }
        self.live.remove(&id);
    }

    fn fail(&mut self, id: TransactionId) {
        self.stats.errors += 1;
        self.live.remove(&id);
    }
}

type SharedState = Arc<Mutex<LoadDriverState>>;

fn lock(state: &Mutex<LoadDriverState>) -> MutexGuard<'_, LoadDriverState> {
    // Critical sections never panic halfway through an update.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives continuous avatar transactions with bounded concurrency.
#[derive(Debug)]
pub struct LoadDriver<A> {
    avatar: Arc<A>,
    options: DriverOptions,
    state: SharedState,
    shutdown: CancellationToken,
}

impl<A: Avatar> LoadDriver<A> {
    /// Creates a driver that runs transactions through `avatar`.
    pub fn new(avatar: A, options: DriverOptions) -> Self {
        let state = LoadDriverState::new(options.window_size);
        Self {
            avatar: Arc::new(avatar),
            options,
            state: Arc::new(Mutex::new(state)),
            shutdown: CancellationToken::new(),
        }
    }

    /// The client transactions are run through.
    pub fn avatar(&self) -> &A {
        &self.avatar
    }

    /// Returns a token that stops all slots from starting new transactions when cancelled.
    ///
    /// Transactions already in flight still run to completion.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> LoadDriverState {
        lock(&self.state).clone()
    }

    /// Runs all slots until the budget is exhausted or shutdown is requested, and returns the
    /// final state once every in-flight transaction has settled.
    pub async fn run(&self) -> LoadDriverState {
        let DriverOptions {
            concurrency,
            budget,
            stagger,
            report_interval,
            ..
        } = self.options;

        tracing::info!(concurrency, budget, "starting load");
        let start = Instant::now();

        let finished = CancellationToken::new();
        let reporter = (!report_interval.is_zero()).then(|| {
            tokio::spawn(report_status(
                Arc::clone(&self.state),
                report_interval,
                finished.clone(),
                |status| tracing::info!("status: {status}"),
            ))
        });

        let slots: Vec<_> = (0..concurrency)
            .map(|index| {
                let slot = Slot {
                    index,
                    budget,
                    avatar: Arc::clone(&self.avatar),
                    state: Arc::clone(&self.state),
                    shutdown: self.shutdown.clone(),
                };
                tokio::spawn(slot.run(stagger * index as u32))
            })
            .collect();

        for result in futures::future::join_all(slots).await {
            if let Err(err) = result {
                tracing::error!(error = &err as &dyn std::error::Error, "slot failed");
            }
        }

        finished.cancel();
        if let Some(reporter) = reporter {
            reporter.await.ok();
        }

        let state = self.snapshot();
        tracing::info!(
            uploads = state.stats.uploads.count,
            downloads = state.stats.downloads.count,
            errors = state.stats.errors,
            elapsed = ?start.elapsed(),
            "load finished"
        );
        state
    }
}

/// One of the concurrently running upload/download cycles.
struct Slot<A> {
    index: usize,
    budget: u64,
    avatar: Arc<A>,
    state: SharedState,
    shutdown: CancellationToken,
}

impl<A: Avatar> Slot<A> {
    async fn run(self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.cancelled() => return,
        }

        while let Some(id) = self.begin() {
            self.transact(id).await;
        }

        tracing::debug!(slot = self.index, "slot stopped");
    }

    fn state(&self) -> MutexGuard<'_, LoadDriverState> {
        lock(&self.state)
    }

    /// Registers a new transaction, unless the budget is exhausted or shutdown was requested.
    fn begin(&self) -> Option<TransactionId> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        let mut state = self.state();
        if self.budget > 0 && state.stats.uploads.count >= self.budget {
            return None;
        }
        Some(state.begin())
    }

    async fn transact(&self, id: TransactionId) {
        let Transaction {
            elapsed, outcome, ..
        } = self.avatar.upload(id).await;

        let url = match outcome {
            Ok(uploaded) => {
                self.complete_upload(id, elapsed, &uploaded);
                match uploaded.body.into_url() {
                    Ok(url) => url,
                    Err(err) => return self.fail(id, Phase::Uploading, err),
                }
            }
            Err(err) => return self.fail(id, Phase::Uploading, err),
        };

        self.state().begin_download(id, &url);

        let Transaction {
            elapsed, outcome, ..
        } = self.avatar.download(id, &url).await;

        match outcome {
            Ok(downloaded) => self.complete_download(id, elapsed, &downloaded),
            Err(err) => self.fail(id, Phase::Downloading, err),
        }
    }

    fn complete_upload(&self, id: TransactionId, elapsed: Duration, uploaded: &Uploaded) {
        let active = {
            let mut state = self.state();
            state.complete_upload(elapsed, uploaded.bytes);
            state.live.len()
        };

        tracing::debug!(
            transaction = %id,
            active,
            status = uploaded.status.as_u16(),
            ?elapsed,
            "complete:upload"
        );
    }

    fn complete_download(&self, id: TransactionId, elapsed: Duration, downloaded: &Downloaded) {
        let active = {
            let mut state = self.state();
            state.complete_download(id, elapsed, downloaded.bytes);
            state.live.len()
        };

        tracing::debug!(
            transaction = %id,
            active,
            status = downloaded.status.as_u16(),
            ?elapsed,
            "complete:download"
        );
    }

    fn fail(&self, id: TransactionId, phase: Phase, error: Error) {
        tracing::error!(
            transaction = %id,
            ?phase,
            error = &error as &dyn std::error::Error,
            "transaction failed"
        );
        self.state().fail(id);
    }
}

/// Calls `emit` every `interval` with the current [`Status`], skipping ticks without one.
async fn report_status<F>(
    state: SharedState,
    interval: Duration,
    finished: CancellationToken,
    mut emit: F,
) where
    F: FnMut(Status) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = lock(&state).status();
                if let Some(status) = status {
                    emit(status);
                }
            }
            _ = finished.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use avatar_client::{Dimensions, StatusCode, UploadBody, ValidationError};

    use super::*;

    #[derive(Clone, Copy, Debug, Default)]
    enum Mode {
        #[default]
        Succeed,
        FailUpload,
        MissingUrl,
        FailDownload,
    }

    #[derive(Debug, Default)]
    struct MockAvatar {
        mode: Mode,
        uploads: AtomicU64,
        downloads: AtomicU64,
    }

    impl MockAvatar {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl Avatar for MockAvatar {
        async fn upload(&self, id: TransactionId) -> Transaction<Uploaded> {
            self.uploads.fetch_add(1, Ordering::Relaxed);
            tokio::task::yield_now().await;

            let body: &[u8] = match self.mode {
                Mode::MissingUrl => b"<html>bad gateway</html>",
                _ => br#"{"url":"mock://avatar.png"}"#,
            };
            let outcome = match self.mode {
                Mode::FailUpload => Err(Error::InvalidStatus(StatusCode::INTERNAL_SERVER_ERROR)),
                _ => Ok(Uploaded {
                    status: StatusCode::CREATED,
                    bytes: 100,
                    body: UploadBody::parse(body),
                }),
            };

            Transaction {
                id,
                elapsed: Duration::from_millis(5),
                outcome,
            }
        }

        async fn download(&self, id: TransactionId, url: &str) -> Transaction<Downloaded> {
            assert_eq!(url, "mock://avatar.png");
            self.downloads.fetch_add(1, Ordering::Relaxed);
            tokio::task::yield_now().await;

            let outcome = match self.mode {
                Mode::FailDownload => Err(Error::Validation(ValidationError::SizeMismatch {
                    width: 500,
                    height: 500,
                })),
                _ => Ok(Downloaded {
                    status: StatusCode::OK,
                    bytes: 200,
                    dimensions: Dimensions {
                        width: 600,
                        height: 600,
                    },
                }),
            };

            Transaction {
                id,
                elapsed: Duration::from_millis(10),
                outcome,
            }
        }
    }

    fn options(concurrency: usize, budget: u64) -> DriverOptions {
        DriverOptions {
            concurrency,
            budget,
            stagger: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Polls the driver until `done` holds for a snapshot, then requests shutdown.
    async fn shutdown_when<A: Avatar>(
        driver: &LoadDriver<A>,
        mut done: impl FnMut(&LoadDriverState) -> bool,
    ) {
        loop {
            if done(&driver.snapshot()) {
                driver.shutdown_token().cancel();
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn stops_at_budget() {
        avatar_test::tracing::init();
        let driver = LoadDriver::new(MockAvatar::default(), options(1, 3));

        let state = driver.run().await;

        assert_eq!(state.stats.uploads.count, 3);
        assert_eq!(state.stats.downloads.count, 3);
        assert_eq!(state.stats.errors, 0);
        assert_eq!(driver.avatar().uploads.load(Ordering::Relaxed), 3);
        assert!(state.live.is_empty());
    }

    #[tokio::test]
    async fn records_windows_and_totals() {
        let driver = LoadDriver::new(MockAvatar::default(), options(1, 3));

        let state = driver.run().await;

        assert_eq!(state.stats.uploads.bytes, 300);
        assert_eq!(state.stats.uploads.elapsed, Duration::from_millis(15));
        assert_eq!(state.stats.downloads.bytes, 600);
        assert_eq!(state.uploads.len(), 3);
        assert_eq!(state.uploads.average(), 20.0);
        assert_eq!(state.downloads.average(), 20.0);
        assert_eq!(state.latency.upload.count(), 3);
        assert_eq!(state.latency.download.count(), 3);
    }

    #[tokio::test]
    async fn windows_stay_bounded() {
        let options = DriverOptions {
            window_size: 4,
            ..options(1, 10)
        };
        let driver = LoadDriver::new(MockAvatar::default(), options);

        let state = driver.run().await;

        assert_eq!(state.stats.uploads.count, 10);
        assert_eq!(state.uploads.len(), 4);
        assert_eq!(state.downloads.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn keeps_slots_busy() {
        let driver = LoadDriver::new(MockAvatar::default(), options(4, 20));

        let state = driver.run().await;

        let uploads = state.stats.uploads.count;
        assert!((20..20 + 4).contains(&uploads), "uploads: {uploads}");
        assert_eq!(state.stats.downloads.count, uploads);
        assert_eq!(driver.avatar().uploads.load(Ordering::Relaxed), uploads);
        assert!(state.live.is_empty());
    }

    #[tokio::test]
    async fn failing_uploads_retry_until_shutdown() {
        let driver = LoadDriver::new(MockAvatar::new(Mode::FailUpload), options(2, 3));

        let mut last_errors = 0;
        let watcher = shutdown_when(&driver, |state| {
            assert!(state.stats.errors >= last_errors);
            last_errors = state.stats.errors;
            state.stats.errors >= 50
        });
        let (state, ()) = tokio::join!(driver.run(), watcher);

        assert!(state.stats.errors >= 50);
        assert_eq!(state.stats.uploads.count, 0);
        assert_eq!(state.stats.downloads.count, 0);
        assert_eq!(driver.avatar().downloads.load(Ordering::Relaxed), 0);
        assert!(state.live.is_empty());
    }

    #[tokio::test]
    async fn missing_url_fails_after_upload() {
        let driver = LoadDriver::new(MockAvatar::new(Mode::MissingUrl), options(1, 3));

        let state = driver.run().await;

        assert_eq!(state.stats.uploads.count, 3);
        assert_eq!(state.stats.errors, 3);
        assert_eq!(state.stats.downloads.count, 0);
        assert_eq!(driver.avatar().downloads.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn failing_downloads_restart_cycle() {
        let driver = LoadDriver::new(MockAvatar::new(Mode::FailDownload), options(1, 3));

        let state = driver.run().await;

        assert_eq!(state.stats.uploads.count, 3);
        assert_eq!(state.stats.downloads.count, 0);
        assert_eq!(state.stats.errors, 3);
        assert_eq!(driver.avatar().downloads.load(Ordering::Relaxed), 3);
        assert!(state.downloads.is_empty());
    }

    #[tokio::test]
    async fn unlimited_budget_runs_until_shutdown() {
        let driver = LoadDriver::new(MockAvatar::default(), options(2, 0));

        let watcher = shutdown_when(&driver, |state| state.stats.downloads.count >= 25);
        let (state, ()) = tokio::join!(driver.run(), watcher);

        assert!(state.stats.downloads.count >= 25);
        // in-flight transactions settle after shutdown
        assert_eq!(state.stats.downloads.count, state.stats.uploads.count);
        assert!(state.live.is_empty());
    }

    #[tokio::test]
    async fn shutdown_before_start() {
        let options = DriverOptions {
            stagger: Duration::from_secs(3600),
            ..options(3, 0)
        };
        let driver = LoadDriver::new(MockAvatar::default(), options);
        driver.shutdown_token().cancel();

        let state = driver.run().await;

        assert_eq!(state.stats.uploads.count, 0);
        assert_eq!(driver.avatar().uploads.load(Ordering::Relaxed), 0);
    }

    /// Records when each upload is issued and holds it long enough for all slots to start.
    #[derive(Debug)]
    struct SlowAvatar {
        epoch: Instant,
        starts: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl Avatar for SlowAvatar {
        async fn upload(&self, id: TransactionId) -> Transaction<Uploaded> {
            self.starts.lock().unwrap().push(self.epoch.elapsed());
            tokio::time::sleep(Duration::from_millis(500)).await;

            Transaction {
                id,
                elapsed: Duration::from_millis(500),
                outcome: Ok(Uploaded {
                    status: StatusCode::CREATED,
                    bytes: 100,
                    body: UploadBody::parse(br#"{"url":"mock://avatar.png"}"#),
                }),
            }
        }

        async fn download(&self, id: TransactionId, _url: &str) -> Transaction<Downloaded> {
            Transaction {
                id,
                elapsed: Duration::from_millis(1),
                outcome: Ok(Downloaded {
                    status: StatusCode::OK,
                    bytes: 200,
                    dimensions: Dimensions {
                        width: 600,
                        height: 600,
                    },
                }),
            }
        }
    }

    #[tokio::test]
    async fn staggers_first_uploads() {
        let avatar = SlowAvatar {
            epoch: Instant::now(),
            starts: Mutex::new(Vec::new()),
        };
        let options = DriverOptions {
            stagger: Duration::from_millis(100),
            report_interval: Duration::ZERO,
            ..options(3, 3)
        };
        let driver = LoadDriver::new(avatar, options);

        let state = driver.run().await;
        assert!(state.stats.uploads.count >= 3);

        // slots pick up further uploads once their first one returns
        let starts = driver.avatar().starts.lock().unwrap().clone();
        assert!(starts.len() >= 3, "starts: {starts:?}");
        for (index, start) in starts[..3].iter().enumerate() {
            let expected = Duration::from_millis(100) * index as u32;
            assert!(
                *start >= expected && *start < expected + Duration::from_millis(90),
                "slot {index} started after {start:?}"
            );
        }
    }

    #[tokio::test]
    async fn reports_once_both_directions_completed() {
        let state = Arc::new(Mutex::new(LoadDriverState::new(10)));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let finished = CancellationToken::new();

        let reporter = tokio::spawn(report_status(
            Arc::clone(&state),
            Duration::from_millis(10),
            finished.clone(),
            {
                let reports = Arc::clone(&reports);
                move |status| reports.lock().unwrap().push(status)
            },
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reports.lock().unwrap().is_empty());

        lock(&state).complete_upload(Duration::from_millis(100), 1024);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reports.lock().unwrap().is_empty());

        {
            let mut state = lock(&state);
            let id = state.begin();
            state.complete_download(id, Duration::from_millis(100), 2048);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        finished.cancel();
        reporter.await.unwrap();

        let reports = reports.lock().unwrap();
        assert!(!reports.is_empty());
        assert_eq!(reports[0].uploads.count, 1);
        assert_eq!(reports[0].downloads.count, 1);
    }

    #[test]
    fn status_needs_both_directions() {
        let mut state = LoadDriverState::new(10);
        assert!(state.status().is_none());

        state.complete_upload(Duration::from_millis(100), 1024);
        assert!(state.status().is_none());

        let id = state.begin();
        state.complete_download(id, Duration::from_millis(100), 2048);

        let status = state.status().unwrap();
        assert_eq!(status.uploads.count, 1);
        assert_eq!(status.downloads.count, 1);
        assert_eq!(status.active, 0);
    }

    #[test]
    fn tracks_live_transactions() {
        let mut state = LoadDriverState::new(10);

        let first = state.begin();
        let second = state.begin();
        assert_ne!(first, second);
        assert_eq!(state.live[&first].phase, Phase::Uploading);

        state.begin_download(first, "https://x/y");
        assert_eq!(state.live[&first].phase, Phase::Downloading);
        assert_eq!(state.live[&first].url.as_deref(), Some("https://x/y"));

        state.fail(second);
        assert_eq!(state.stats.errors, 1);
        assert!(!state.live.contains_key(&second));
    }

    #[test]
    fn zero_elapsed_skips_window() {
        let mut state = LoadDriverState::new(10);
        state.complete_upload(Duration::ZERO, 1024);

        assert_eq!(state.stats.uploads.count, 1);
        assert!(state.uploads.is_empty());
    }
}
