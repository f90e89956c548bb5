//! Command dispatcher.
//!
//! Tokenized commands fan out into tracked background work; the dispatcher
//! waits for the tracker to go idle under a single deadline. On deadline the
//! caller gets a timeout error while the work itself keeps running to
//! completion, its output dropped.

mod handlers;

pub(crate) use handlers::apply_setting;

use crate::errors::{Error, Result};
use crate::provider::{ProviderAccounts, ProviderRegistry};
use crate::registry::TenantRegistry;
use crate::sync::SyncEngine;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, instrument};

/// Free-text fallback consulted when no command matches the input.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

/// Default index: knows nothing.
pub struct EmptyIndex;

#[async_trait]
impl SearchIndex for EmptyIndex {
    async fn search(&self, _query: &str) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

/// Per-invocation collector for operator-visible output lines.
#[derive(Default)]
pub struct OutputSink {
    lines: Mutex<Vec<String>>,
}

impl OutputSink {
    pub fn ok(&self, line: impl Into<String>) {
        self.push(line.into());
    }

    pub fn fail(&self, line: impl Into<String>) {
        let line = line.into();
        error!("{line}");
        self.push(format!("error: {line}"));
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.lock())
    }

    fn push(&self, line: String) {
        self.lock().push(line);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counts outstanding handler work. Guards decrement on drop, so a panicking
/// handler still releases its slot.
#[derive(Default)]
pub struct WorkTracker {
    active: AtomicUsize,
    notify: Notify,
}

impl WorkTracker {
    pub fn start(self: &Arc<Self>) -> WorkGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        WorkGuard { tracker: self.clone() }
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct WorkGuard {
    tracker: Arc<WorkTracker>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.tracker.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.notify.notify_waiters();
        }
    }
}

/// Mutable console knobs, adjustable at runtime via `setting set`.
pub struct DispatchState {
    enabled: AtomicBool,
    timeout_ms: AtomicU64,
}

impl DispatchState {
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Acquire))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(timeout.as_millis() as u64, Ordering::Release);
    }
}

pub struct CommandDispatcher {
    ctx: handlers::HandlerCtx,
    state: Arc<DispatchState>,
}

impl CommandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        registry: Arc<TenantRegistry>,
        engine: Arc<SyncEngine>,
        accounts: Arc<ProviderAccounts>,
        providers: Arc<ProviderRegistry>,
        search: Arc<dyn SearchIndex>,
        state: Arc<DispatchState>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            ctx: handlers::HandlerCtx {
                pool,
                registry,
                engine,
                accounts,
                providers,
                search,
                state: state.clone(),
                provider_timeout,
                sink: Arc::new(OutputSink::default()),
            },
            state,
        }
    }

    /// Runs one tokenized command to completion or deadline. The returned
    /// lines are everything the handlers wrote; after a timeout the work is
    /// left running but its output is dropped.
    #[instrument(skip(self), err)]
    pub async fn dispatch(&self, args: &[String]) -> Result<Vec<String>> {
        if args.is_empty() {
            return Ok(vec![]);
        }
        if !self.state.enabled() && args[0] != "setting" {
            return Ok(vec![
                "console is disabled; run 'setting set enable 1'".to_string(),
            ]);
        }

        let sink = Arc::new(OutputSink::default());
        let tracker = Arc::new(WorkTracker::default());

        let ctx = handlers::HandlerCtx {
            sink: sink.clone(),
            ..self.ctx.clone()
        };
        let args = args.to_vec();
        let guard = tracker.start();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = handlers::run(&ctx, &args).await {
                ctx.sink.fail(e.user_message());
            }
        });

        let timeout = self.state.timeout();
        match tokio::time::timeout(timeout, tracker.wait_idle()).await {
            Ok(()) => Ok(sink.take()),
            Err(_) => Err(Error::Timeout { timeout }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::accounts::Accounts;
    use crate::db::models::accounts::AccountUpsert;
    use crate::provider::nimbus::NimbusFactory;
    use crate::registry::Tenant;
    use crate::types::ProviderKind;
    use sqlx::PgPool;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: test
    cluster:
      server: https://127.0.0.1:6443
users:
  - name: test
    user:
      token: not-a-real-token
contexts:
  - name: test
    context:
      cluster: test
      user: test
current-context: test
"#;

    fn dispatcher_with(
        pool: PgPool,
        search: Arc<dyn SearchIndex>,
        timeout: Duration,
    ) -> CommandDispatcher {
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(NimbusFactory::new(
            "http://127.0.0.1:1".parse().unwrap(),
            "hn".to_string(),
        )));
        let providers = Arc::new(providers);
        let registry = Arc::new(TenantRegistry::new(
            pool.clone(),
            providers.clone(),
            Duration::from_secs(5),
        ));
        let engine = Arc::new(SyncEngine::new(pool.clone(), 100));
        CommandDispatcher::new(
            pool,
            registry,
            engine,
            Arc::new(ProviderAccounts::default()),
            providers,
            search,
            Arc::new(DispatchState::new(true, timeout)),
            Duration::from_secs(5),
        )
    }

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn tracker_waits_for_outstanding_guards() {
        let tracker = Arc::new(WorkTracker::default());
        let guard = tracker.start();
        tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        assert!(
            tokio::time::timeout(Duration::from_millis(5), tracker.wait_idle())
                .await
                .is_err()
        );
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tracker_is_idle_with_no_work() {
        let tracker = WorkTracker::default();
        tokio::time::timeout(Duration::from_millis(5), tracker.wait_idle())
            .await
            .unwrap();
    }

    struct SleepyIndex;

    #[async_trait]
    impl SearchIndex for SleepyIndex {
        async fn search(&self, _query: &str) -> crate::errors::Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn slow_handler_hits_the_deadline(pool: PgPool) {
        let dispatcher = dispatcher_with(pool, Arc::new(SleepyIndex), Duration::from_millis(50));
        let err = dispatcher.dispatch(&args(&["no-such-command"])).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    struct CannedIndex;

    #[async_trait]
    impl SearchIndex for CannedIndex {
        async fn search(&self, query: &str) -> crate::errors::Result<Vec<String>> {
            Ok(vec![format!("docs: {query}")])
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn unknown_command_falls_back_to_search(pool: PgPool) {
        let dispatcher = dispatcher_with(pool, Arc::new(CannedIndex), Duration::from_secs(5));
        let lines = dispatcher
            .dispatch(&args(&["how", "do", "i", "resize"]))
            .await
            .unwrap();
        assert_eq!(lines, vec!["docs: how do i resize"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn handler_errors_become_output_lines(pool: PgPool) {
        let dispatcher = dispatcher_with(pool, Arc::new(EmptyIndex), Duration::from_secs(5));
        let lines = dispatcher
            .dispatch(&args(&["kube", "pods", "ghost"]))
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("error:"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn detach_of_unknown_cluster_reports_success(pool: PgPool) {
        let dispatcher = dispatcher_with(pool, Arc::new(EmptyIndex), Duration::from_secs(5));
        let lines = dispatcher
            .dispatch(&args(&["cluster", "detach", "ghost"]))
            .await
            .unwrap();
        assert_eq!(lines, vec!["detached ghost"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn cluster_list_shows_aliases_and_expiry(pool: PgPool) {
        // The listing reads the mirror, so joining through a separate
        // registry over the same pool is visible to the dispatcher.
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(NimbusFactory::new(
            "http://127.0.0.1:1".parse().unwrap(),
            "hn".to_string(),
        )));
        let registry =
            TenantRegistry::new(pool.clone(), Arc::new(providers), Duration::from_secs(5));
        let tenant = Tenant::new(
            "prod-1".to_string(),
            vec!["p1".to_string()],
            ProviderKind::Nimbus,
            "{}".to_string(),
            KUBECONFIG.as_bytes().to_vec(),
            // 2100-01-01T00:00:00Z
            4_102_444_800,
        )
        .await
        .unwrap();
        registry.join(tenant).await.unwrap();

        let dispatcher = dispatcher_with(pool, Arc::new(EmptyIndex), Duration::from_secs(5));
        let lines = dispatcher.dispatch(&args(&["cluster", "list"])).await.unwrap();
        assert_eq!(lines, vec!["prod-1\tnimbus\tp1\t2100-01-01"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn account_list_flags_sessions_without_login(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        Accounts::new(&mut conn)
            .ensure(&AccountUpsert {
                id: "42-default".to_string(),
                email: "ops@example.com".to_string(),
                password: "pw".to_string(),
                project_id: "default".to_string(),
            })
            .await
            .unwrap();
        drop(conn);

        let dispatcher = dispatcher_with(pool, Arc::new(EmptyIndex), Duration::from_secs(5));
        let lines = dispatcher.dispatch(&args(&["account", "list"])).await.unwrap();
        assert_eq!(lines, vec!["42-default\tops@example.com\tdefault\toffline"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn disabled_console_only_accepts_settings(pool: PgPool) {
        let dispatcher = dispatcher_with(pool, Arc::new(EmptyIndex), Duration::from_secs(5));

        dispatcher
            .dispatch(&args(&["setting", "set", "enable", "0"]))
            .await
            .unwrap();
        let lines = dispatcher.dispatch(&args(&["cluster", "list"])).await.unwrap();
        assert_eq!(lines, vec!["console is disabled; run 'setting set enable 1'"]);

        dispatcher
            .dispatch(&args(&["setting", "set", "enable", "1"]))
            .await
            .unwrap();
        let lines = dispatcher.dispatch(&args(&["cluster", "list"])).await.unwrap();
        assert_eq!(lines, vec!["no clusters joined"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn timeout_setting_is_applied_live(pool: PgPool) {
        let dispatcher = dispatcher_with(pool, Arc::new(SleepyIndex), Duration::from_secs(30));
        dispatcher
            .dispatch(&args(&["setting", "set", "timeout", "50ms"]))
            .await
            .unwrap();
        let err = dispatcher.dispatch(&args(&["no-such-command"])).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
