//! Firewalls and their rules, flattened into two tables.

use crate::db::errors::Result;
use crate::db::models::resources::{FirewallRow, FirewallRuleRow};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Firewalls<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Firewalls<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[FirewallRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut created = Vec::with_capacity(chunk.len());
            let mut updated = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                created.push(row.created_at);
                updated.push(row.updated_at);
            }
            sqlx::query(
                "INSERT INTO firewalls (id, account, created_at, updated_at)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::timestamptz[], $4::timestamptz[])
                 ON CONFLICT (id) DO UPDATE SET
                     account = EXCLUDED.account,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&created)
            .bind(&updated)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_account(&mut self, account: &str) -> Result<Vec<FirewallRow>> {
        let rows = sqlx::query_as::<_, FirewallRow>(
            "SELECT id, account, created_at, updated_at
             FROM firewalls WHERE account = $1 ORDER BY id",
        )
        .bind(account)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM firewalls WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct FirewallRules<'c> {
    db: &'c mut PgConnection,
}

impl<'c> FirewallRules<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[FirewallRuleRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut firewalls = Vec::with_capacity(chunk.len());
            let mut directions = Vec::with_capacity(chunk.len());
            let mut cidrs = Vec::with_capacity(chunk.len());
            let mut created = Vec::with_capacity(chunk.len());
            let mut updated = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                firewalls.push(row.firewall.clone());
                directions.push(row.direction.clone());
                cidrs.push(row.cidr.clone());
                created.push(row.created_at);
                updated.push(row.updated_at);
            }
            sqlx::query(
                "INSERT INTO firewall_rules (id, account, firewall, direction, cidr, created_at, updated_at)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[],
                                      $5::text[], $6::timestamptz[], $7::timestamptz[])
                 ON CONFLICT (id) DO UPDATE SET
                     account = EXCLUDED.account,
                     firewall = EXCLUDED.firewall,
                     direction = EXCLUDED.direction,
                     cidr = EXCLUDED.cidr,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&firewalls)
            .bind(&directions)
            .bind(&cidrs)
            .bind(&created)
            .bind(&updated)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_firewall(&mut self, firewall: &str) -> Result<Vec<FirewallRuleRow>> {
        let rows = sqlx::query_as::<_, FirewallRuleRow>(
            "SELECT id, account, firewall, direction, cidr, created_at, updated_at
             FROM firewall_rules WHERE firewall = $1 ORDER BY id",
        )
        .bind(firewall)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM firewall_rules WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_firewall_and_rule_upsert(pool: PgPool) {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut conn = pool.acquire().await.unwrap();

        Firewalls::new(&mut conn)
            .upsert_batch(
                &[FirewallRow {
                    id: "fw1".to_string(),
                    account: "acc-1".to_string(),
                    created_at: ts,
                    updated_at: ts,
                }],
                100,
            )
            .await
            .unwrap();

        let rule = FirewallRuleRow {
            id: "r1".to_string(),
            account: "acc-1".to_string(),
            firewall: "fw1".to_string(),
            direction: "ingress".to_string(),
            cidr: "0.0.0.0/0".to_string(),
            created_at: ts,
            updated_at: ts,
        };
        let mut rules = FirewallRules::new(&mut conn);
        rules.upsert_batch(&[rule.clone()], 100).await.unwrap();
        let mut tightened = rule;
        tightened.cidr = "10.0.0.0/8".to_string();
        rules.upsert_batch(&[tightened], 100).await.unwrap();

        let stored = rules.list_by_firewall("fw1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].cidr, "10.0.0.0/8");
    }
}
