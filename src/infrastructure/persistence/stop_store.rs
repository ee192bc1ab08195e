//! C5: SQLite-backed `symbol -> StopContract` store.

use crate::domain::errors::StoreError;
use crate::domain::ports::StopStore;
use crate::domain::types::{StopContract, StopStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;

pub struct SqliteStopStore {
    pool: SqlitePool,
}

impl SqliteStopStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn status_str(status: StopStatus) -> &'static str {
    match status {
        StopStatus::Active => "Active",
        StopStatus::Closed => "Closed",
    }
}

fn row_to_contract(row: &sqlx::sqlite::SqliteRow) -> Result<StopContract, StoreError> {
    let decimal = |col: &str| -> Result<Decimal, StoreError> {
        let raw: String = row.try_get(col).map_err(|e| StoreError::Io(e.to_string()))?;
        Decimal::from_str(&raw).map_err(|e| StoreError::Io(e.to_string()))
    };
    let status_raw: String = row.try_get("status").map_err(|e| StoreError::Io(e.to_string()))?;
    let status = if status_raw == "Active" { StopStatus::Active } else { StopStatus::Closed };

    Ok(StopContract {
        symbol: row.try_get("symbol").map_err(|e| StoreError::Io(e.to_string()))?,
        entry_price: decimal("entry_price")?,
        quantity: decimal("quantity")?,
        stop_loss: decimal("stop_loss")?,
        take_profit: decimal("take_profit")?,
        backup_stop_order_id: row.try_get("backup_stop_order_id").map_err(|e| StoreError::Io(e.to_string()))?,
        backup_tp_order_id: row.try_get("backup_tp_order_id").map_err(|e| StoreError::Io(e.to_string()))?,
        status,
        created_at: row.try_get("created_at").map_err(|e| StoreError::Io(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| StoreError::Io(e.to_string()))?,
    })
}

#[async_trait]
impl StopStore for SqliteStopStore {
    async fn put(&self, contract: StopContract) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stops (symbol, entry_price, quantity, stop_loss, take_profit,
                                backup_stop_order_id, backup_tp_order_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(symbol) DO UPDATE SET
                entry_price = excluded.entry_price,
                quantity = excluded.quantity,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                backup_stop_order_id = excluded.backup_stop_order_id,
                backup_tp_order_id = excluded.backup_tp_order_id,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&contract.symbol)
        .bind(contract.entry_price.to_string())
        .bind(contract.quantity.to_string())
        .bind(contract.stop_loss.to_string())
        .bind(contract.take_profit.to_string())
        .bind(&contract.backup_stop_order_id)
        .bind(&contract.backup_tp_order_id)
        .bind(status_str(contract.status))
        .bind(contract.created_at)
        .bind(contract.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn get_active(&self, symbol: &str) -> Result<Option<StopContract>, StoreError> {
        let row = sqlx::query("SELECT * FROM stops WHERE symbol = ?1 AND status = 'Active'")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        row.as_ref().map(row_to_contract).transpose()
    }

    async fn load_all_active(&self) -> Result<Vec<StopContract>, StoreError> {
        let rows = sqlx::query("SELECT * FROM stops WHERE status = 'Active'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        rows.iter().map(row_to_contract).collect()
    }

    async fn mark_closed(&self, symbol: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE stops SET status = 'Closed', updated_at = unixepoch() WHERE symbol = ?1 AND status = 'Active'",
        )
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(symbol.to_string()));
        }
        Ok(())
    }

    async fn attach_backup(&self, symbol: &str, stop_order_id: &str, tp_order_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE stops SET backup_stop_order_id = ?1, backup_tp_order_id = ?2, updated_at = unixepoch() WHERE symbol = ?3 AND status = 'Active'",
        )
        .bind(stop_order_id)
        .bind(tp_order_id)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(symbol.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    async fn store() -> SqliteStopStore {
        let db = Database::new("sqlite::memory:").await.unwrap();
        SqliteStopStore::new(db.pool)
    }

    fn contract(symbol: &str) -> StopContract {
        StopContract {
            symbol: symbol.to_string(),
            entry_price: Decimal::from(100),
            quantity: Decimal::from(100),
            stop_loss: Decimal::from(94),
            take_profit: Decimal::from(115),
            backup_stop_order_id: None,
            backup_tp_order_id: None,
            status: StopStatus::Active,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_active_round_trips() {
        let store = store().await;
        store.put(contract("0700.HK")).await.unwrap();
        let loaded = store.get_active("0700.HK").await.unwrap().unwrap();
        assert_eq!(loaded.entry_price, Decimal::from(100));
    }

    #[tokio::test]
    async fn mark_closed_excludes_from_active_set() {
        let store = store().await;
        store.put(contract("AAPL.US")).await.unwrap();
        store.mark_closed("AAPL.US").await.unwrap();
        assert!(store.get_active("AAPL.US").await.unwrap().is_none());
        assert!(store.load_all_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attach_backup_persists_order_ids() {
        let store = store().await;
        store.put(contract("0700.HK")).await.unwrap();
        store.attach_backup("0700.HK", "stop-1", "tp-1").await.unwrap();
        let loaded = store.get_active("0700.HK").await.unwrap().unwrap();
        assert_eq!(loaded.backup_stop_order_id.as_deref(), Some("stop-1"));
    }
}
