//! C6: persisted order history.

use crate::domain::errors::StoreError;
use crate::domain::ports::OrderStore;
use crate::domain::types::{OrderRecord, OrderSide, OrderState};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;

pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

fn state_str(state: OrderState) -> &'static str {
    match state {
        OrderState::PendingSubmit => "PendingSubmit",
        OrderState::Live => "Live",
        OrderState::PartiallyFilled => "PartiallyFilled",
        OrderState::Filled => "Filled",
        OrderState::Failed => "Failed",
        OrderState::Cancelled => "Cancelled",
    }
}

fn parse_state(raw: &str) -> OrderState {
    match raw {
        "Live" => OrderState::Live,
        "PartiallyFilled" => OrderState::PartiallyFilled,
        "Filled" => OrderState::Filled,
        "Failed" => OrderState::Failed,
        "Cancelled" => OrderState::Cancelled,
        _ => OrderState::PendingSubmit,
    }
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<OrderRecord, StoreError> {
    let get = |col: &str| -> Result<String, StoreError> {
        row.try_get(col).map_err(|e| StoreError::Io(e.to_string()))
    };
    let side_raw: String = get("side")?;
    let state_raw: String = get("state")?;
    let quantity = Decimal::from_str(&get("quantity")?).map_err(|e| StoreError::Io(e.to_string()))?;
    let price = Decimal::from_str(&get("price")?).map_err(|e| StoreError::Io(e.to_string()))?;

    Ok(OrderRecord {
        id: get("id")?,
        symbol: get("symbol")?,
        side: if side_raw == "Buy" { OrderSide::Buy } else { OrderSide::Sell },
        quantity,
        price,
        state: parse_state(&state_raw),
        submitted_at: row.try_get("submitted_at").map_err(|e| StoreError::Io(e.to_string()))?,
        broker_order_id: row.try_get("broker_order_id").map_err(|e| StoreError::Io(e.to_string()))?,
    })
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn save(&self, order: &OrderRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, symbol, side, quantity, price, state, submitted_at, broker_order_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                broker_order_id = excluded.broker_order_id
            "#,
        )
        .bind(&order.id)
        .bind(&order.symbol)
        .bind(side_str(order.side))
        .bind(order.quantity.to_string())
        .bind(order.price.to_string())
        .bind(state_str(order.state))
        .bind(order.submitted_at)
        .bind(&order.broker_order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn find_by_client_id(&self, client_order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?1")
            .bind(client_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn today_buy_symbols(&self) -> Result<HashSet<String>, StoreError> {
        let start_of_day = chrono::Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let rows = sqlx::query(
            "SELECT DISTINCT symbol FROM orders WHERE side = 'Buy' AND submitted_at >= ?1 AND state != 'Failed' AND state != 'Cancelled'",
        )
        .bind(start_of_day)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("symbol").map_err(|e| StoreError::Io(e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    async fn store() -> SqliteOrderStore {
        let db = Database::new("sqlite::memory:").await.unwrap();
        SqliteOrderStore::new(db.pool)
    }

    fn order(id: &str, symbol: &str, side: OrderSide, submitted_at: i64) -> OrderRecord {
        OrderRecord {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: Decimal::from(100),
            price: Decimal::from(50),
            state: OrderState::Filled,
            submitted_at,
            broker_order_id: Some("b1".to_string()),
        }
    }

    #[tokio::test]
    async fn save_then_find_by_client_id_round_trips() {
        let store = store().await;
        let now = chrono::Utc::now().timestamp();
        store.save(&order("sig-1", "0700.HK", OrderSide::Buy, now)).await.unwrap();
        let found = store.find_by_client_id("sig-1").await.unwrap().unwrap();
        assert_eq!(found.symbol, "0700.HK");
    }

    #[tokio::test]
    async fn today_buy_symbols_excludes_sells_and_old_orders() {
        let store = store().await;
        let now = chrono::Utc::now().timestamp();
        store.save(&order("sig-1", "0700.HK", OrderSide::Buy, now)).await.unwrap();
        store.save(&order("sig-2", "AAPL.US", OrderSide::Sell, now)).await.unwrap();
        store.save(&order("sig-3", "9988.HK", OrderSide::Buy, now - 10 * 86400)).await.unwrap();

        let symbols = store.today_buy_symbols().await.unwrap();
        assert!(symbols.contains("0700.HK"));
        assert!(!symbols.contains("AAPL.US"));
        assert!(!symbols.contains("9988.HK"));
    }
}
