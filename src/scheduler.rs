//! Auto-sync timer owned by an open Sync Settings panel.
//!
//! One timer per panel. It only exists while auto-sync is on, a sheet link is
//! set and the page is visible, and any settings change clears the previous
//! timer before a new one starts. A request already in flight is never
//! aborted, so a response can still arrive (and post a notice) after
//! auto-sync has been switched off.

use crate::errors::{AppError, AppResult};
use crate::models::SyncSheetResponse;
use crate::policy::clamp_sync_interval;
use crate::sync_store::{LocalStore, SyncSettings};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

static NEW_LEADS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s+new\s+leads?").expect("valid new leads regex"));

pub type SyncFuture = Pin<Box<dyn Future<Output = AppResult<SyncSheetResponse>> + Send>>;

/// Issues the `POST /leads/sync-sheet` call.
pub trait SheetSyncTransport: Send + Sync {
    fn sync_sheet(&self, sheet_url: String) -> SyncFuture;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    Success(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Manual,
    Silent,
}

/// Number embedded in a `"<n> New Leads"` message, if any.
pub fn parse_new_leads(message: &str) -> Option<u64> {
    NEW_LEADS_RE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|count| count.as_str().parse::<u64>().ok())
}

#[derive(Clone)]
struct SyncContext {
    user_id: String,
    store: Arc<LocalStore>,
    transport: Arc<dyn SheetSyncTransport>,
    notices: mpsc::UnboundedSender<SyncNotice>,
}

impl SyncContext {
    fn notify(&self, notice: SyncNotice) {
        let _ = self.notices.send(notice);
    }

    fn record_attempt(&self, sheet_link: &str) {
        let mut settings = SyncSettings::load(&self.store, &self.user_id);
        settings.sheet_link = sheet_link.to_string();
        settings.last_sync = Some(Utc::now());
        if let Err(error) = settings.save(&self.store, &self.user_id) {
            tracing::warn!(user_id = %self.user_id, error = %error, "failed to record sync attempt");
        }
    }

    async fn run(&self, sheet_link: &str, mode: SyncMode) -> Option<SyncSheetResponse> {
        let sheet_link = sheet_link.trim();
        if sheet_link.is_empty() {
            if mode == SyncMode::Manual {
                self.notify(SyncNotice::Error("Please enter a Google Sheet link first".to_string()));
            }
            return None;
        }

        self.record_attempt(sheet_link);
        let result = self.transport.sync_sheet(sheet_link.to_string()).await;

        match (result, mode) {
            (Ok(response), SyncMode::Manual) => {
                if response.success {
                    self.notify(SyncNotice::Success(response.message.clone()));
                } else {
                    self.notify(SyncNotice::Error(response.message.clone()));
                }
                Some(response)
            }
            (Ok(response), SyncMode::Silent) => {
                let added = if response.success {
                    parse_new_leads(&response.message).unwrap_or(0)
                } else {
                    0
                };
                if added > 0 {
                    self.notify(SyncNotice::Success(response.message.clone()));
                }
                tracing::debug!(user_id = %self.user_id, added, "auto sync finished");
                Some(response)
            }
            (Err(error), SyncMode::Manual) => {
                self.notify(SyncNotice::Error(manual_error_message(&error)));
                None
            }
            (Err(error), SyncMode::Silent) => {
                tracing::debug!(user_id = %self.user_id, error = %error, "auto sync failed");
                None
            }
        }
    }
}

fn manual_error_message(error: &AppError) -> String {
    format!("Sync failed: {}", error.user_message())
}

struct SchedulerState {
    settings: SyncSettings,
    visible: bool,
    timer: Option<JoinHandle<()>>,
}

impl SchedulerState {
    fn clear_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SchedulerState {
    fn drop(&mut self) {
        self.clear_timer();
    }
}

/// Controller for one user's sync settings panel. Must be created inside a
/// tokio runtime.
#[derive(Clone)]
pub struct SyncScheduler {
    context: SyncContext,
    state: Arc<Mutex<SchedulerState>>,
}

impl SyncScheduler {
    /// Loads the user's settings and starts polling if they call for it.
    pub fn open(
        user_id: &str,
        store: Arc<LocalStore>,
        transport: Arc<dyn SheetSyncTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncNotice>) {
        let (notices, receiver) = mpsc::unbounded_channel();
        let settings = SyncSettings::load(&store, user_id);
        let scheduler = Self {
            context: SyncContext {
                user_id: user_id.to_string(),
                store,
                transport,
                notices,
            },
            state: Arc::new(Mutex::new(SchedulerState {
                settings,
                visible: true,
                timer: None,
            })),
        };
        scheduler.restart_timer();
        (scheduler, receiver)
    }

    pub fn settings(&self) -> SyncSettings {
        self.with_state(|state| state.settings.clone())
            .unwrap_or_default()
    }

    pub fn is_polling(&self) -> bool {
        self.with_state(|state| state.timer.as_ref().is_some_and(|timer| !timer.is_finished()))
            .unwrap_or(false)
    }

    pub fn set_sheet_link(&self, sheet_link: &str) -> AppResult<()> {
        self.update_settings(|settings| settings.sheet_link = sheet_link.trim().to_string())
    }

    pub fn set_auto_sync(&self, enabled: bool) -> AppResult<()> {
        self.update_settings(|settings| settings.auto_sync = enabled)
    }

    /// Values outside 10..=300 seconds are clamped.
    pub fn set_interval_secs(&self, secs: u64) -> AppResult<()> {
        self.update_settings(|settings| settings.interval_secs = clamp_sync_interval(secs))
    }

    /// Page visibility; hiding suspends the timer, showing resumes it.
    pub fn set_visible(&self, visible: bool) {
        let changed = self
            .with_state(|state| {
                let changed = state.visible != visible;
                state.visible = visible;
                changed
            })
            .unwrap_or(false);
        if changed {
            self.restart_timer();
        }
    }

    /// Manual sync: always reports an outcome on the notice channel.
    pub async fn sync_now(&self) -> Option<SyncSheetResponse> {
        let sheet_link = self.settings().sheet_link;
        self.context.run(&sheet_link, SyncMode::Manual).await
    }

    /// Panel closed: tear the timer down.
    pub fn close(&self) {
        let _ = self.with_state(SchedulerState::clear_timer);
    }

    fn update_settings(&self, apply: impl FnOnce(&mut SyncSettings)) -> AppResult<()> {
        let settings = self
            .with_state(|state| {
                apply(&mut state.settings);
                state.settings.clone()
            })
            .ok_or_else(|| AppError::Internal("sync scheduler state poisoned".to_string()))?;
        settings.save(&self.context.store, &self.context.user_id)?;
        self.restart_timer();
        Ok(())
    }

    fn restart_timer(&self) {
        let context = self.context.clone();
        let _ = self.with_state(move |state| {
            state.clear_timer();
            if !state.visible || !state.settings.should_poll() {
                return;
            }

            let sheet_link = state.settings.sheet_link.clone();
            let period = Duration::from_secs(state.settings.interval_secs);
            tracing::debug!(
                user_id = %context.user_id,
                interval_secs = state.settings.interval_secs,
                "auto sync timer started"
            );
            state.timer = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    // Detached: clearing the timer stops future ticks only.
                    let context = context.clone();
                    let sheet_link = sheet_link.clone();
                    tokio::spawn(async move {
                        context.run(&sheet_link, SyncMode::Silent).await;
                    });
                }
            }));
        });
    }

    fn with_state<R>(&self, apply: impl FnOnce(&mut SchedulerState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut state| apply(&mut state))
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_new_leads, SheetSyncTransport, SyncFuture, SyncNotice, SyncScheduler};
    use crate::errors::AppError;
    use crate::models::SyncSheetResponse;
    use crate::sync_store::{LocalStore, SyncSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    struct FakeTransport {
        calls: AtomicUsize,
        reply: Mutex<Result<String, String>>,
        delay: Duration,
    }

    impl FakeTransport {
        fn replying(message: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Ok(message.to_string())),
                delay: Duration::ZERO,
            })
        }

        fn slow(message: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Ok(message.to_string())),
                delay,
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Err(message.to_string())),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SheetSyncTransport for FakeTransport {
        fn sync_sheet(&self, _sheet_url: String) -> SyncFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.lock().expect("reply lock").clone();
            let delay = self.delay;
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match reply {
                    Ok(message) => Ok(SyncSheetResponse {
                        success: true,
                        message,
                    }),
                    Err(message) => Err(AppError::Upstream(message)),
                }
            })
        }
    }

    fn store_with(settings: SyncSettings) -> Arc<LocalStore> {
        let store = Arc::new(LocalStore::in_memory());
        settings.save(&store, "u1").expect("seed settings");
        store
    }

    fn polling_settings(interval_secs: u64) -> SyncSettings {
        SyncSettings {
            sheet_link: "https://example.com/leads.csv".to_string(),
            auto_sync: true,
            interval_secs,
            last_sync: None,
        }
    }

    #[test]
    fn extracts_new_lead_count() {
        assert_eq!(parse_new_leads("3 New Leads added"), Some(3));
        assert_eq!(parse_new_leads("Synced: 12 new leads"), Some(12));
        assert_eq!(parse_new_leads("No new leads found"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_timer_when_auto_sync_disabled() {
        let transport = FakeTransport::replying("1 New Leads added");
        let store = store_with(SyncSettings {
            auto_sync: false,
            ..polling_settings(10)
        });
        let (scheduler, _notices) = SyncScheduler::open("u1", store, transport.clone());
        assert!(!scheduler.is_polling());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_once_per_interval() {
        let transport = FakeTransport::replying("No new leads found");
        let (scheduler, _notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), transport.clone());
        assert!(scheduler.is_polling());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(transport.calls(), 3);
        assert!(SyncSettings::load(&scheduler.context.store, "u1").last_sync.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_page_suspends_polling() {
        let transport = FakeTransport::replying("No new leads found");
        let (scheduler, _notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), transport.clone());

        scheduler.set_visible(false);
        assert!(!scheduler.is_polling());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls(), 0);

        scheduler.set_visible(true);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_never_stacks_timers() {
        let transport = FakeTransport::replying("No new leads found");
        let (scheduler, _notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), transport.clone());
        scheduler.set_interval_secs(20).expect("interval");
        scheduler.set_interval_secs(20).expect("interval");
        scheduler.set_sheet_link("https://example.com/other.csv").expect("link");

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(transport.calls(), 2);

        scheduler.set_auto_sync(false).expect("disable");
        assert!(!scheduler.is_polling());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_sync_lets_in_flight_request_finish() {
        let transport = FakeTransport::slow("2 New Leads added", Duration::from_secs(5));
        let (scheduler, mut notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), transport.clone());

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(transport.calls(), 1);
        assert!(notices.try_recv().is_err());

        scheduler.set_auto_sync(false).expect("disable");
        assert!(!scheduler.is_polling());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(
            notices.try_recv().expect("stale notice"),
            SyncNotice::Success("2 New Leads added".to_string())
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_polling() {
        let transport = FakeTransport::replying("No new leads found");
        let (scheduler, _notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), transport.clone());
        scheduler.close();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sync_with_empty_link_reports_error_without_calling() {
        let transport = FakeTransport::replying("1 New Leads added");
        let (scheduler, mut notices) =
            SyncScheduler::open("u1", Arc::new(LocalStore::in_memory()), transport.clone());

        assert!(scheduler.sync_now().await.is_none());
        assert_eq!(transport.calls(), 0);
        assert!(matches!(notices.try_recv(), Ok(SyncNotice::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sync_always_reports() {
        let transport = FakeTransport::replying("No new leads found");
        let store = store_with(SyncSettings {
            auto_sync: false,
            ..polling_settings(10)
        });
        let (scheduler, mut notices) = SyncScheduler::open("u1", store, transport.clone());
        scheduler.sync_now().await.expect("response");
        assert_eq!(
            notices.try_recv().expect("notice"),
            SyncNotice::Success("No new leads found".to_string())
        );

        let failing = FakeTransport::failing("connection refused");
        let store = store_with(SyncSettings {
            auto_sync: false,
            ..polling_settings(10)
        });
        let (scheduler, mut notices) = SyncScheduler::open("u1", store, failing);
        assert!(scheduler.sync_now().await.is_none());
        match notices.try_recv().expect("notice") {
            SyncNotice::Error(message) => assert!(message.contains("connection refused")),
            other => panic!("unexpected notice {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_sync_reports_only_new_leads() {
        let quiet = FakeTransport::replying("No new leads found");
        let (_scheduler, mut notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), quiet.clone());
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(quiet.calls(), 2);
        assert!(notices.try_recv().is_err());

        let busy = FakeTransport::replying("4 New Leads added");
        let (_scheduler, mut notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), busy.clone());
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(
            notices.try_recv().expect("notice"),
            SyncNotice::Success("4 New Leads added".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_sync_swallows_errors() {
        let failing = FakeTransport::failing("server down");
        let (scheduler, mut notices) =
            SyncScheduler::open("u1", store_with(polling_settings(10)), failing.clone());
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(failing.calls(), 3);
        assert!(notices.try_recv().is_err());
        assert!(scheduler.is_polling());
    }
}
