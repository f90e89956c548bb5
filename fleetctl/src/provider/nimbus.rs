//! Nimbus control-plane client.
//!
//! Token-authenticated JSON API. Sessions are scoped to one (account,
//! project) pair; the account id mirrored rows are keyed by is derived from
//! the billing account the token endpoint reports.

use crate::db::errors::DbError;
use crate::db::handlers::accounts::Accounts;
use crate::db::models::accounts::{AccountRecord, AccountUpsert};
use crate::errors::{Error, Result};
use crate::provider::{
    CloudCluster, CloudFirewall, CloudServer, CloudVolume, ProviderAdapter, ProviderFactory,
    WorkerNode, WorkerPool,
};
use crate::registry::tenant::Tenant;
use crate::types::ProviderKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_PROJECT: &str = "default";

/// Persisted per-tenant metadata: enough to re-authenticate and find the
/// backing cluster again. The registry stores this as an opaque JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusMetadata {
    pub account: String,
    pub cluster: String,
}

#[derive(Debug, Clone)]
pub struct NimbusFactory {
    api_url: Url,
    region: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    auth_method: &'static str,
    email: &'a str,
    password: &'a str,
    project_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    billing_account_id: String,
}

#[derive(Debug, Deserialize)]
struct ClusterList {
    clusters: Vec<CloudCluster>,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<CloudServer>,
}

#[derive(Debug, Deserialize)]
struct VolumeList {
    volumes: Vec<CloudVolume>,
}

#[derive(Debug, Deserialize)]
struct FirewallList {
    firewalls: Vec<CloudFirewall>,
}

#[derive(Debug, Deserialize)]
struct PoolDetail {
    #[serde(default)]
    nodes: Vec<WorkerNode>,
}

/// Makes sure a url has a trailing slash, so `join` appends instead of
/// replacing the last path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

impl NimbusFactory {
    pub fn new(api_url: Url, region: String) -> Self {
        Self { api_url, region }
    }

    /// Authenticates against the token endpoint. When `pool` is given the
    /// account row is bootstrapped on first login (existing rows are left
    /// untouched).
    #[instrument(skip(self, pool, password), err)]
    pub async fn login(
        &self,
        pool: Option<&PgPool>,
        email: &str,
        password: &str,
        project: &str,
        timeout: Duration,
    ) -> Result<NimbusProvider> {
        let project = if project.is_empty() { DEFAULT_PROJECT } else { project };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::provider)?;

        let url = ensure_slash(&self.api_url)
            .join("v1/tokens")
            .map_err(Error::provider)?;
        let response = client
            .post(url)
            .json(&TokenRequest {
                auth_method: "password",
                email,
                password,
                project_id: project,
            })
            .send()
            .await
            .map_err(Error::provider)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("token request failed: {status} - {body}")));
        }
        let token: TokenResponse = response.json().await.map_err(Error::provider)?;

        // Accounts without billing enabled get a synthetic id so their rows
        // still have a stable scope.
        let account_id = if token.billing_account_id.is_empty() {
            format!("fakeid:{email}-{project}")
        } else {
            format!("{}-{project}", token.billing_account_id)
        };
        debug!(account = %account_id, "nimbus login succeeded");

        if let Some(pool) = pool {
            let mut conn = pool.acquire().await.map_err(DbError::from)?;
            Accounts::new(&mut conn)
                .ensure(&AccountUpsert {
                    id: account_id.clone(),
                    email: email.to_string(),
                    password: password.to_string(),
                    project_id: project.to_string(),
                })
                .await?;
        }

        Ok(NimbusProvider {
            client,
            api_url: self.api_url.clone(),
            region: self.region.clone(),
            token: token.token,
            account_id,
            email: email.to_string(),
            project_id: project.to_string(),
        })
    }
}

#[async_trait]
impl ProviderFactory for NimbusFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nimbus
    }

    async fn connect(
        &self,
        account: &AccountRecord,
        timeout: Duration,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let provider = self
            .login(None, &account.email, &account.password, &account.project_id, timeout)
            .await?;
        Ok(Arc::new(provider))
    }

    async fn login_account(
        &self,
        pool: &PgPool,
        email: &str,
        password: &str,
        project: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let provider = self.login(Some(pool), email, password, project, timeout).await?;
        Ok(Arc::new(provider))
    }

    #[instrument(skip(self, pool, metadata), err)]
    async fn tenant_from_metadata(
        &self,
        pool: &PgPool,
        metadata: &str,
        timeout: Duration,
    ) -> Result<Tenant> {
        let meta: NimbusMetadata = serde_json::from_str(metadata)
            .map_err(|e| Error::validation(format!("bad tenant metadata: {e}")))?;

        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        let account = Accounts::new(&mut conn)
            .get(&meta.account)
            .await?
            .ok_or_else(|| Error::not_found("account", &meta.account))?;
        drop(conn);

        let provider = self
            .login(None, &account.email, &account.password, &account.project_id, timeout)
            .await?;
        let cluster = provider.get_cluster(&meta.cluster).await?;
        Tenant::from_provider(&provider, &cluster, metadata.to_string()).await
    }
}

pub struct NimbusProvider {
    client: Client,
    api_url: Url,
    region: String,
    token: String,
    account_id: String,
    email: String,
    project_id: String,
}

// The session token never goes through Debug.
impl fmt::Debug for NimbusProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NimbusProvider")
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl NimbusProvider {
    fn url(&self, path: &str) -> Result<Url> {
        ensure_slash(&self.api_url).join(path).map_err(Error::provider)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .header("X-Auth-Token", &self.token)
            .query(&[("region", self.region.as_str())])
            .send()
            .await
            .map_err(Error::provider)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("GET {path} failed: {status} - {body}")));
        }
        response.json().await.map_err(Error::provider)
    }
}

#[async_trait]
impl ProviderAdapter for NimbusProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nimbus
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn email(&self) -> &str {
        &self.email
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn tenant_metadata(&self, cluster: &str) -> String {
        // Serialization of a two-string struct cannot fail.
        serde_json::to_string(&NimbusMetadata {
            account: self.account_id.clone(),
            cluster: cluster.to_string(),
        })
        .unwrap_or_default()
    }

    async fn list_clusters(&self) -> Result<Vec<CloudCluster>> {
        let list: ClusterList = self.get_json("v1/clusters").await?;
        Ok(list.clusters)
    }

    async fn get_cluster(&self, id: &str) -> Result<CloudCluster> {
        self.get_json(&format!("v1/clusters/{id}")).await
    }

    async fn get_kubeconfig(&self, cluster: &str) -> Result<Vec<u8>> {
        let path = format!("v1/clusters/{cluster}/kubeconfig");
        let response = self
            .client
            .get(self.url(&path)?)
            .header("X-Auth-Token", &self.token)
            .query(&[("region", self.region.as_str())])
            .send()
            .await
            .map_err(Error::provider)?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Provider(format!("GET {path} failed: {status}")));
        }
        let body = response.bytes().await.map_err(Error::provider)?;
        Ok(body.to_vec())
    }

    async fn list_pools(&self, cluster: &str) -> Result<Vec<WorkerPool>> {
        let detail = self.get_cluster(cluster).await?;
        Ok(detail.worker_pools)
    }

    async fn list_pool_nodes(&self, cluster: &str, pool: &str) -> Result<Vec<WorkerNode>> {
        let detail: PoolDetail = self
            .get_json(&format!("v1/clusters/{cluster}/pools/{pool}"))
            .await?;
        Ok(detail.nodes)
    }

    async fn list_servers(&self) -> Result<Vec<CloudServer>> {
        let list: ServerList = self.get_json("v1/servers").await?;
        Ok(list.servers)
    }

    async fn get_server(&self, id: &str) -> Result<CloudServer> {
        self.get_json(&format!("v1/servers/{id}")).await
    }

    async fn list_volumes(&self) -> Result<Vec<CloudVolume>> {
        let list: VolumeList = self.get_json("v1/volumes").await?;
        Ok(list.volumes)
    }

    async fn list_firewalls(&self) -> Result<Vec<CloudFirewall>> {
        let list: FirewallList = self.get_json("v1/firewalls").await?;
        Ok(list.firewalls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn factory(server: &MockServer) -> NimbusFactory {
        NimbusFactory::new(server.uri().parse().unwrap(), "hn".to_string())
    }

    async fn mount_token(server: &MockServer, billing: Option<&str>) {
        let mut body = json!({"token": "tok-1"});
        if let Some(billing) = billing {
            body["billing_account_id"] = json!(billing);
        }
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .and(body_partial_json(json!({"auth_method": "password"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    #[test_log::test]
    async fn login_composes_billing_account_id() {
        let server = MockServer::start().await;
        mount_token(&server, Some("42")).await;

        let provider = factory(&server)
            .login(None, "ops@example.com", "pw", "prod", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(provider.account_id(), "42-prod");
        assert_eq!(provider.project_id(), "prod");
    }

    #[tokio::test]
    #[test_log::test]
    async fn login_without_billing_gets_synthetic_id() {
        let server = MockServer::start().await;
        mount_token(&server, None).await;

        let provider = factory(&server)
            .login(None, "ops@example.com", "pw", "", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(provider.account_id(), "fakeid:ops@example.com-default");
    }

    #[tokio::test]
    #[test_log::test]
    async fn login_surfaces_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = factory(&server)
            .login(None, "ops@example.com", "wrong", "", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    #[test_log::test]
    async fn listings_carry_token_and_region() {
        let server = MockServer::start().await;
        mount_token(&server, Some("42")).await;
        Mock::given(method("GET"))
            .and(path("/v1/servers"))
            .and(header("X-Auth-Token", "tok-1"))
            .and(query_param("region", "hn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [{
                    "id": "s1",
                    "status": "ACTIVE",
                    "zone": "hn-a",
                    "created_at": "2025-01-01T00:00:00Z",
                    "updated_at": "2025-01-02T00:00:00Z",
                    "attached_volumes": ["v1", "v2"]
                }]
            })))
            .mount(&server)
            .await;

        let provider = factory(&server)
            .login(None, "ops@example.com", "pw", "", Duration::from_secs(5))
            .await
            .unwrap();
        let servers = provider.list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].attached_volumes, vec!["v1", "v2"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn login_bootstraps_account_once(pool: sqlx::PgPool) {
        let server = MockServer::start().await;
        mount_token(&server, Some("42")).await;

        let factory = factory(&server);
        factory
            .login_account(&pool, "ops@example.com", "pw", "", Duration::from_secs(5))
            .await
            .unwrap();
        factory
            .login_account(&pool, "ops@example.com", "other", "", Duration::from_secs(5))
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let account = Accounts::new(&mut conn).get("42-default").await.unwrap().unwrap();
        assert_eq!(account.password, "pw");
    }
}
