//! Command handlers behind the dispatcher.

use super::{DispatchState, OutputSink, SearchIndex};
use crate::db::errors::DbError;
use crate::db::handlers::accounts::Accounts;
use crate::db::handlers::settings::Settings;
use crate::errors::{Error, Result};
use crate::provider::{ProviderAccounts, ProviderAdapter, ProviderRegistry};
use crate::registry::{Tenant, TenantRegistry};
use crate::sync::SyncEngine;
use crate::types::PROVISIONED;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub(crate) struct HandlerCtx {
    pub pool: PgPool,
    pub registry: Arc<TenantRegistry>,
    pub engine: Arc<SyncEngine>,
    pub accounts: Arc<ProviderAccounts>,
    pub providers: Arc<ProviderRegistry>,
    pub search: Arc<dyn SearchIndex>,
    pub state: Arc<DispatchState>,
    pub provider_timeout: Duration,
    pub sink: Arc<OutputSink>,
}

pub(crate) async fn run(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    match args[0].as_str() {
        "cluster" => cluster_cmd(ctx, &args[1..]).await,
        "account" => account_cmd(ctx, &args[1..]).await,
        "sync" => sync_cmd(ctx, &args[1..]).await,
        "clean" => clean_cmd(ctx, &args[1..]).await,
        "kube" => kube_cmd(ctx, &args[1..]).await,
        "setting" => setting_cmd(ctx, &args[1..]).await,
        _ => search_cmd(ctx, args).await,
    }
}

async fn cluster_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("list") => {
            let entries = ctx.registry.list().await?;
            if entries.is_empty() {
                ctx.sink.ok("no clusters joined");
                return Ok(());
            }
            for entry in entries {
                let aliases = if entry.aliases.is_empty() {
                    "-".to_string()
                } else {
                    entry.aliases.join(",")
                };
                let expires = chrono::DateTime::from_timestamp(entry.expire, 0)
                    .filter(|_| entry.expire > 0)
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string());
                ctx.sink.ok(format!(
                    "{}\t{}\t{}\t{}",
                    entry.name, entry.provider, aliases, expires
                ));
            }
            Ok(())
        }
        Some("detach") => {
            let name = args
                .get(1)
                .ok_or_else(|| Error::validation("usage: cluster detach <name>"))?;
            ctx.registry.detach(name).await?;
            ctx.sink.ok(format!("detached {name}"));
            Ok(())
        }
        _ => Err(Error::validation("usage: cluster <list | detach NAME>")),
    }
}

async fn account_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("add") => {
            let (email, password) = match (args.get(1), args.get(2)) {
                (Some(email), Some(password)) => (email, password),
                _ => return Err(Error::validation("usage: account add <email> <password> [project]")),
            };
            let project = args.get(3).map(String::as_str).unwrap_or("");
            for factory in ctx.providers.factories() {
                let adapter = factory
                    .login_account(&ctx.pool, email, password, project, ctx.provider_timeout)
                    .await?;
                ctx.sink
                    .ok(format!("logged in as {} ({})", adapter.account_id(), factory.kind()));
                ctx.accounts.insert(adapter);
            }
            Ok(())
        }
        Some("list") => {
            let mut conn = ctx.pool.acquire().await.map_err(DbError::from)?;
            let records = Accounts::new(&mut conn).list().await?;
            if records.is_empty() {
                ctx.sink.ok("no accounts stored");
                return Ok(());
            }
            let live: HashSet<String> = ctx
                .accounts
                .all()
                .iter()
                .map(|a| a.account_id().to_string())
                .collect();
            for record in records {
                let session = if live.contains(&record.id) { "live" } else { "offline" };
                ctx.sink.ok(format!(
                    "{}\t{}\t{}\t{session}",
                    record.id, record.email, record.project_id
                ));
            }
            Ok(())
        }
        _ => Err(Error::validation("usage: account <add EMAIL PASSWORD [PROJECT] | list>")),
    }
}

async fn sync_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    let (what, email) = match (args.first(), args.get(1)) {
        (Some(what), Some(email)) => (what.as_str(), email.as_str()),
        _ => {
            return Err(Error::validation(
                "usage: sync <cluster|tenant|server|attachment|volume|firewall|pool|node-pool|all> <email>",
            ))
        }
    };
    let adapters = ctx.accounts.get(email);
    if adapters.is_empty() {
        return Err(Error::not_found("account", email));
    }

    for adapter in adapters {
        match what {
            "cluster" => {
                let n = ctx.engine.sync_clusters(adapter.as_ref()).await?;
                ctx.sink.ok(format!("{}: {n} clusters", adapter.account_id()));
            }
            "tenant" => sync_tenants(ctx, adapter.as_ref()).await?,
            "server" => {
                let n = ctx.engine.sync_servers(adapter.as_ref()).await?;
                ctx.sink.ok(format!("{}: {n} servers", adapter.account_id()));
            }
            "attachment" => {
                let server = args.get(2).ok_or_else(|| {
                    Error::validation("usage: sync attachment <email> <server>")
                })?;
                let n = ctx
                    .engine
                    .sync_server_attachments(adapter.as_ref(), server)
                    .await?;
                ctx.sink.ok(format!("{server}: {n} attachments"));
            }
            "volume" => {
                let n = ctx.engine.sync_volumes(adapter.as_ref()).await?;
                ctx.sink.ok(format!("{}: {n} volumes", adapter.account_id()));
            }
            "firewall" => {
                let n = ctx.engine.sync_firewalls(adapter.as_ref()).await?;
                ctx.sink.ok(format!("{}: {n} firewalls", adapter.account_id()));
            }
            "pool" => sync_pools(ctx, adapter.as_ref()).await?,
            "node-pool" => sync_pool_nodes(ctx, adapter.as_ref()).await?,
            "all" => {
                let account = adapter.account_id().to_string();
                ctx.engine.sync_clusters(adapter.as_ref()).await?;
                ctx.engine.sync_servers(adapter.as_ref()).await?;
                ctx.engine.sync_volumes(adapter.as_ref()).await?;
                ctx.engine.sync_firewalls(adapter.as_ref()).await?;
                sync_pools(ctx, adapter.as_ref()).await?;
                sync_pool_nodes(ctx, adapter.as_ref()).await?;
                ctx.sink.ok(format!("{account}: full sync complete"));
            }
            other => {
                return Err(Error::validation(format!("unknown sync target '{other}'")));
            }
        }
    }
    Ok(())
}

async fn sync_pools(ctx: &HandlerCtx, adapter: &dyn ProviderAdapter) -> Result<()> {
    let clusters = ctx.engine.mirrored_clusters(adapter.account_id()).await?;
    for cluster in clusters {
        let n = ctx.engine.sync_pools(adapter, &cluster.id).await?;
        ctx.sink.ok(format!("{}: {n} pools", cluster.name));
    }
    Ok(())
}

async fn sync_pool_nodes(ctx: &HandlerCtx, adapter: &dyn ProviderAdapter) -> Result<()> {
    let clusters = ctx.engine.mirrored_clusters(adapter.account_id()).await?;
    for cluster in clusters {
        for pool in ctx.engine.mirrored_pools(&cluster.id).await? {
            let n = ctx.engine.sync_pool_nodes(adapter, &cluster.id, &pool.id).await?;
            ctx.sink.ok(format!("{}/{}: {n} nodes", cluster.name, pool.name));
        }
    }
    Ok(())
}

/// Onboards every provisioned mirrored cluster as a tenant and harvests its
/// pod-to-volume links. Clusters that fell out of the provisioned state get
/// their mirrored footprint and registry entry dropped.
async fn sync_tenants(ctx: &HandlerCtx, adapter: &dyn ProviderAdapter) -> Result<()> {
    let account = adapter.account_id();
    for row in ctx.engine.mirrored_clusters(account).await? {
        if row.status != PROVISIONED {
            ctx.engine.detach_cluster(account, &row.id, &row.name).await?;
            ctx.registry.detach(&row.name).await?;
            ctx.sink
                .ok(format!("{}: detached (status {})", row.name, row.status));
            continue;
        }

        let cluster = adapter.get_cluster(&row.id).await?;
        let metadata = adapter.tenant_metadata(&row.id);
        match Tenant::from_provider(adapter, &cluster, metadata).await {
            Ok(tenant) => {
                let tenant = ctx.registry.join(tenant).await?;
                match ctx.engine.link_tenant_volumes(account, &tenant).await {
                    Ok(n) => ctx.sink.ok(format!("{}: joined, {n} volume links", row.name)),
                    Err(e) => {
                        warn!(cluster = %row.name, error = %e, "volume link walk failed");
                        ctx.sink.ok(format!("{}: joined, volume links skipped", row.name));
                    }
                }
            }
            Err(e) => ctx.sink.fail(format!("{}: {}", row.name, e.user_message())),
        }
    }
    Ok(())
}

async fn clean_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    let email = args
        .first()
        .ok_or_else(|| Error::validation("usage: clean <email> [project]"))?;
    let project = args.get(1).map(String::as_str);

    let mut adapters = ctx.accounts.get(email);
    if let Some(project) = project {
        adapters.retain(|a| a.project_id() == project);
    }
    if adapters.is_empty() {
        return Err(Error::not_found("account", email));
    }

    for adapter in adapters {
        let account = adapter.account_id();
        for row in ctx.engine.mirrored_clusters(account).await? {
            ctx.registry.detach(&row.name).await?;
        }
        ctx.engine.clean(account).await?;
        ctx.sink.ok(format!("{account}: cleaned"));
    }
    Ok(())
}

async fn kube_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    let (what, name) = match (args.first(), args.get(1)) {
        (Some(what), Some(name)) => (what.as_str(), name.as_str()),
        _ => {
            return Err(Error::validation(
                "usage: kube <pods|nodes|volumes|metrics|ping> <cluster>",
            ))
        }
    };
    let tenant = ctx.registry.pick(name).await?;

    match what {
        "pods" => {
            let pods = tenant.kube().list_pods("").await?;
            ctx.sink.ok(format!("{}: {} pods", tenant.name(), pods.len()));
            for pod in pods {
                ctx.sink.ok(pod.metadata.name.unwrap_or_default());
            }
        }
        "nodes" => {
            let nodes = tenant.kube().list_nodes().await?;
            ctx.sink.ok(format!("{}: {} nodes", tenant.name(), nodes.len()));
            for node in nodes {
                ctx.sink.ok(node.metadata.name.unwrap_or_default());
            }
        }
        "volumes" => {
            let volumes = tenant.kube().list_persistent_volumes().await?;
            ctx.sink
                .ok(format!("{}: {} persistent volumes", tenant.name(), volumes.len()));
            for volume in volumes {
                ctx.sink.ok(volume.metadata.name.unwrap_or_default());
            }
        }
        "metrics" => {
            let metrics = tenant.kube().get_pod_metrics().await?;
            for pod in metrics {
                let name = pod.metadata.name.unwrap_or_default();
                for container in pod.containers {
                    let cpu = container
                        .usage
                        .get("cpu")
                        .map(|q| q.0.clone())
                        .unwrap_or_default();
                    let memory = container
                        .usage
                        .get("memory")
                        .map(|q| q.0.clone())
                        .unwrap_or_default();
                    ctx.sink
                        .ok(format!("{name}/{}\tcpu={cpu}\tmemory={memory}", container.name));
                }
            }
        }
        "ping" => {
            let version = tenant.kube().ping().await?;
            ctx.sink.ok(format!("{}: {version}", tenant.name()));
        }
        other => return Err(Error::validation(format!("unknown kube target '{other}'"))),
    }
    Ok(())
}

async fn setting_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    let mut conn = ctx.pool.acquire().await.map_err(DbError::from)?;
    let mut repo = Settings::new(&mut conn);

    match args.first().map(String::as_str) {
        Some("list") => {
            for record in repo.list().await? {
                ctx.sink.ok(format!("{} = {}", record.name, record.value));
            }
            Ok(())
        }
        Some("get") => {
            let name = args
                .get(1)
                .ok_or_else(|| Error::validation("usage: setting get <name>"))?;
            match repo.get(name).await? {
                Some(value) => ctx.sink.ok(format!("{name} = {value}")),
                None => ctx.sink.ok(format!("{name} is unset")),
            }
            Ok(())
        }
        Some("set") => {
            let (name, value) = match (args.get(1), args.get(2)) {
                (Some(name), Some(value)) => (name.as_str(), value.as_str()),
                _ => return Err(Error::validation("usage: setting set <name> <value>")),
            };
            apply_setting(&ctx.state, name, value)?;
            repo.set(name, value).await?;
            ctx.sink.ok(format!("{name} = {value}"));
            Ok(())
        }
        _ => Err(Error::validation("usage: setting <list | get NAME | set NAME VALUE>")),
    }
}

/// Applies a recognized setting to live dispatcher state; unknown names are
/// stored but have no effect until something reads them.
pub(crate) fn apply_setting(state: &DispatchState, name: &str, value: &str) -> Result<()> {
    match name {
        "enable" => {
            state.set_enabled(matches!(value, "1" | "true" | "on"));
            Ok(())
        }
        "timeout" => {
            let timeout = humantime::parse_duration(value)
                .map_err(|e| Error::validation(format!("bad timeout '{value}': {e}")))?;
            state.set_timeout(timeout);
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn search_cmd(ctx: &HandlerCtx, args: &[String]) -> Result<()> {
    let query = args.join(" ");
    let results = ctx.search.search(&query).await?;
    if results.is_empty() {
        ctx.sink.ok(format!("unknown command '{query}' and nothing found for it"));
        return Ok(());
    }
    for line in results {
        ctx.sink.ok(line);
    }
    Ok(())
}
