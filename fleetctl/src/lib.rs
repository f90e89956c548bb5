//! fleetctl: operator console for inspecting and reconciling a fleet of
//! managed Kubernetes clusters through their cloud control plane.
//!
//! Three cores sit on a shared Postgres mirror: the tenant registry (cached,
//! authenticated cluster handles), the sync engine (idempotent mirroring of
//! the cloud resource graph), and the command dispatcher (tokenized commands
//! under a single deadline).

pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod kube_api;
pub mod provider;
pub mod registry;
pub mod sync;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use errors::{Error, Result};

use crate::db::handlers::settings::Settings;
use crate::dispatch::{CommandDispatcher, DispatchState, EmptyIndex};
use crate::provider::nimbus::NimbusFactory;
use crate::provider::{ProviderAccounts, ProviderRegistry};
use crate::registry::TenantRegistry;
use crate::sync::SyncEngine;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

pub struct Application {
    pub config: Config,
    pub pool: PgPool,
    pub dispatcher: Arc<CommandDispatcher>,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.pool.max_connections)
            .min_connections(config.database.pool.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.pool.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.database.pool.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.database.pool.max_lifetime_secs))
            .connect(&config.database.url)
            .await?;
        MIGRATOR.run(&pool).await?;

        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(NimbusFactory::new(
            config.provider.api_url.clone(),
            config.provider.region.clone(),
        )));
        let providers = Arc::new(providers);

        // A failed boot login is not fatal: the console still serves registry
        // and settings commands, and `account add` can mint sessions later.
        let accounts = match provider::connect_all(&pool, &providers, config.provider_timeout).await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "provider logins failed, starting with no sessions");
                ProviderAccounts::default()
            }
        };
        if accounts.is_empty() {
            warn!("no provider sessions; use 'account add' to log in");
        }

        let registry = Arc::new(TenantRegistry::new(
            pool.clone(),
            providers.clone(),
            config.provider_timeout,
        ));
        let engine = Arc::new(SyncEngine::new(pool.clone(), config.sync.batch_size));

        let state = Arc::new(DispatchState::new(config.enabled, config.command_timeout));
        // Persisted settings win over the config file.
        let mut conn = pool.acquire().await?;
        for record in Settings::new(&mut conn).list().await? {
            if let Err(e) = dispatch::apply_setting(&state, &record.name, &record.value) {
                warn!(setting = %record.name, error = %e, "ignoring stored setting");
            }
        }
        drop(conn);

        let dispatcher = Arc::new(CommandDispatcher::new(
            pool.clone(),
            registry,
            engine,
            Arc::new(accounts),
            providers,
            Arc::new(EmptyIndex),
            state,
            config.provider_timeout,
        ));

        Ok(Self {
            config,
            pool,
            dispatcher,
        })
    }

    /// Line-oriented console loop: one whitespace-tokenized command per stdin
    /// line until EOF or shutdown.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                    if args.is_empty() {
                        continue;
                    }
                    match self.dispatcher.dispatch(&args).await {
                        Ok(output) => {
                            for line in output {
                                println!("{line}");
                            }
                        }
                        Err(e) => eprintln!("{}", e.user_message()),
                    }
                }
            }
        }
        Ok(())
    }
}
