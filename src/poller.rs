//! The live polling loop: resolve expiry, fetch, persist, render, sleep.

use chrono::{Local, NaiveDate};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::chain::{self, StrikeRow};
use crate::error::ChainError;
use crate::expiry::choose_nearest_expiry;
use crate::store::{Snapshot, SnapshotStore};
use crate::upstox::UpstoxClient;

/// Granularity at which a sleeping loop notices a stop request.
pub const SLEEP_TICK: Duration = Duration::from_millis(500);
const ACTIVITY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Running,
}

/// Shared start/stop flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct LiveSwitch(Arc<AtomicBool>);

impl LiveSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PollState {
        if self.is_live() {
            PollState::Running
        } else {
            PollState::Stopped
        }
    }

    /// Sleeps for up to `duration` in [`SLEEP_TICK`] steps, returning early once
    /// stopped. Returns whether the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_live() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep(SLEEP_TICK.min(deadline - now)).await;
        }
    }
}

/// Recent loop activity, newest first.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: VecDeque<String>,
}

impl ActivityLog {
    pub fn push(&mut self, msg: &str) -> &str {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.entries.push_front(format!("[{ts}] {msg}"));
        self.entries.truncate(ACTIVITY_CAPACITY);
        &self.entries[0]
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the presentation side needs for one fetched snapshot.
pub struct ChainFrame<'a> {
    pub instrument_key: &'a str,
    pub expiry: NaiveDate,
    pub snapshot: &'a Snapshot,
    pub rows: &'a [StrikeRow],
}

/// Presentation boundary of the poll loop.
pub trait ChainView {
    fn render(&mut self, frame: ChainFrame<'_>);

    fn log(&mut self, _entry: &str) {}
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub instrument_key: String,
    pub interval: Duration,
}

pub struct Poller {
    client: UpstoxClient,
    store: SnapshotStore,
    settings: PollSettings,
    expiry: Option<NaiveDate>,
    switch: LiveSwitch,
    activity: ActivityLog,
}

impl Poller {
    pub fn new(client: UpstoxClient, store: SnapshotStore, settings: PollSettings) -> Self {
        Self {
            client,
            store,
            settings,
            expiry: None,
            switch: LiveSwitch::new(),
            activity: ActivityLog::default(),
        }
    }

    /// Pins the expiry instead of looking up the nearest one.
    pub fn with_expiry(mut self, expiry: Option<NaiveDate>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn switch(&self) -> LiveSwitch {
        self.switch.clone()
    }

    pub fn start(&self) {
        self.switch.start();
    }

    pub fn stop(&self) {
        self.switch.stop();
    }

    pub fn state(&self) -> PollState {
        self.switch.state()
    }

    pub fn expiry(&self) -> Option<NaiveDate> {
        self.expiry
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Returns the known expiry or looks up the nearest listed one.
    pub async fn resolve_expiry(&mut self) -> Result<NaiveDate, ChainError> {
        if let Some(expiry) = self.expiry {
            return Ok(expiry);
        }

        let key = &self.settings.instrument_key;
        let contracts = self.client.get_contracts(key).await?;
        if let Some(err) = contracts.get("error") {
            warn!("contracts endpoint reported {err} for {key}");
        }

        let expiry = choose_nearest_expiry(&contracts)
            .ok_or_else(|| ChainError::NoExpiry(key.clone()))?;
        info!("Using expiry {expiry} for {key}");
        self.expiry = Some(expiry);

        Ok(expiry)
    }

    /// One fetch, persist and render pass. Both files get the same snapshot.
    pub async fn fetch_once<V: ChainView>(
        &mut self,
        view: &mut V,
    ) -> Result<Snapshot, ChainError> {
        if !self.client.has_credentials() {
            return Err(ChainError::MissingCredentials);
        }

        let expiry = self.resolve_expiry().await?;
        let payload = self
            .client
            .get_option_chain(&self.settings.instrument_key, expiry)
            .await?;

        let snapshot = Snapshot::new(payload);
        self.store.record(&snapshot)?;

        let rows = chain::to_rows(&snapshot.snapshot);
        let msg = match snapshot.snapshot.get("error") {
            Some(err) => format!("Saved snapshot with chain error {err}"),
            None => format!("Fetched & saved snapshot ({} strikes)", rows.len()),
        };
        self.note(view, &msg);

        view.render(ChainFrame {
            instrument_key: &self.settings.instrument_key,
            expiry,
            snapshot: &snapshot,
            rows: &rows,
        });

        Ok(snapshot)
    }

    /// Polls until the switch is turned off. Missing credentials or an unresolvable
    /// expiry stop the loop and are returned; other failures skip to the next cycle.
    pub async fn run<V: ChainView>(&mut self, view: &mut V) -> Result<(), ChainError> {
        if !self.switch.is_live() {
            return Ok(());
        }

        let msg = format!(
            "Live mode ON, polling {} every {}s",
            self.settings.instrument_key,
            self.settings.interval.as_secs()
        );
        self.note(view, &msg);

        while self.switch.is_live() {
            let started = Instant::now();

            match self.fetch_once(view).await {
                Ok(_) => {}
                Err(e) if e.is_terminal() => {
                    self.switch.stop();
                    self.note_error(view, &format!("Stopping live polling: {e}"));
                    return Err(e);
                }
                Err(e) => self.note_error(view, &format!("Error during fetch/save: {e}")),
            }

            let remaining = self.settings.interval.saturating_sub(started.elapsed());
            self.switch.sleep(remaining).await;
        }

        self.note(view, "Live mode OFF");
        Ok(())
    }

    fn note<V: ChainView>(&mut self, view: &mut V, msg: &str) {
        info!("{msg}");
        view.log(self.activity.push(msg));
    }

    fn note_error<V: ChainView>(&mut self, view: &mut V, msg: &str) {
        error!("{msg}");
        view.log(self.activity.push(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creds::Creds;
    use std::time::Instant as StdInstant;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        frames: usize,
        logs: Vec<String>,
    }

    impl ChainView for Recorder {
        fn render(&mut self, _frame: ChainFrame<'_>) {
            self.frames += 1;
        }

        fn log(&mut self, entry: &str) {
            self.logs.push(entry.to_string());
        }
    }

    fn poller(dir: &std::path::Path, creds: Creds, base_url: &str) -> Poller {
        let client = UpstoxClient::new(base_url, creds).unwrap();
        let store = SnapshotStore::new(dir.join("history.jsonl"), dir.join("latest.json"));
        let settings = PollSettings {
            instrument_key: "NSE_INDEX|Nifty 50".to_string(),
            interval: Duration::from_secs(10),
        };
        Poller::new(client, store, settings)
    }

    #[test]
    fn test_activity_log_newest_first_and_bounded() {
        let mut log = ActivityLog::default();
        for i in 0..(ACTIVITY_CAPACITY + 5) {
            log.push(&format!("entry {i}"));
        }
        assert_eq!(log.len(), ACTIVITY_CAPACITY);
        let newest = log.entries().next().unwrap();
        assert!(newest.starts_with('['));
        assert!(newest.ends_with("] entry 104"));
    }

    #[test]
    fn test_switch_states() {
        let switch = LiveSwitch::new();
        assert_eq!(switch.state(), PollState::Stopped);
        let other = switch.clone();
        other.start();
        assert_eq!(switch.state(), PollState::Running);
        switch.stop();
        assert!(!other.is_live());
    }

    #[tokio::test]
    async fn test_sleep_runs_full_duration_while_live() {
        let switch = LiveSwitch::new();
        switch.start();
        assert!(switch.sleep(Duration::from_millis(120)).await);
        assert!(!LiveSwitch::new().sleep(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep_within_a_tick() {
        let switch = LiveSwitch::new();
        switch.start();

        let stopper = switch.clone();
        let started = StdInstant::now();
        let (completed, ()) = tokio::join!(switch.sleep(Duration::from_secs(30)), async move {
            sleep(Duration::from_millis(200)).await;
            stopper.stop();
        });

        assert!(!completed);
        let limit = Duration::from_millis(200) + SLEEP_TICK + Duration::from_millis(300);
        assert!(started.elapsed() < limit);
    }

    #[tokio::test]
    async fn test_missing_credentials_stop_the_loop() {
        let dir = tempdir().unwrap();
        let mut poller = poller(dir.path(), Creds::new(), "http://127.0.0.1:9");
        let mut view = Recorder::default();

        poller.start();
        let res = poller.run(&mut view).await;

        assert!(matches!(res, Err(ChainError::MissingCredentials)));
        assert_eq!(poller.state(), PollState::Stopped);
        assert_eq!(view.frames, 0);
        assert!(view.logs.last().unwrap().contains("Stopping live polling"));
        assert!(!dir.path().join("history.jsonl").exists());
    }

    #[tokio::test]
    async fn test_run_without_start_does_nothing() {
        let dir = tempdir().unwrap();
        let mut poller = poller(dir.path(), Creds::with_token("t"), "http://127.0.0.1:9");
        let mut view = Recorder::default();

        poller.run(&mut view).await.unwrap();
        assert_eq!(view.frames, 0);
        assert!(poller.activity().is_empty());
    }
}
