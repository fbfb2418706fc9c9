use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::ScrapeError;
use crate::model::{CardSeed, SalesRecord, SetSeed};

/// Outcome of an idempotent sale insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The sale was already on record. Pagination re-serves rows freely, so
    /// this is routine, never an error.
    Duplicate,
}

/// Persistence sink for harvested sales.
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Inserts one sale unless an identical one is already recorded for the
    /// card.
    async fn insert_sale(
        &self,
        card_id: i64,
        sale: &SalesRecord,
    ) -> Result<InsertOutcome, ScrapeError>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL UNIQUE,
        name TEXT NOT NULL,
        abbreviation TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS cards (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        set_id INTEGER NOT NULL REFERENCES sets(id),
        tcgplayer_id INTEGER NOT NULL,
        product_id INTEGER NOT NULL,
        product_name TEXT NOT NULL,
        product_url TEXT NOT NULL,
        number INTEGER NOT NULL DEFAULT 0,
        rarity TEXT NOT NULL DEFAULT '',
        condition TEXT NOT NULL,
        printing TEXT NOT NULL,
        UNIQUE (product_id, condition, printing)
    )",
    "CREATE TABLE IF NOT EXISTS card_sales (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        card_id INTEGER NOT NULL REFERENCES cards(id),
        order_date TEXT NOT NULL,
        purchase_price REAL NOT NULL,
        shipping_price REAL NOT NULL,
        quantity INTEGER NOT NULL,
        UNIQUE (card_id, order_date, purchase_price, quantity)
    )",
];

/// SQLite-backed catalog and sales store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists.
    pub async fn open(url: &str) -> Result<Self, ScrapeError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "database ready");
        Ok(store)
    }

    /// An isolated in-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, ScrapeError> {
        // A pooled in-memory database must stay on one connection; every
        // connection would otherwise get its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), ScrapeError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Creates or refreshes the set row, returning its id.
    pub async fn upsert_set(&self, set: &SetSeed) -> Result<i64, ScrapeError> {
        let id = sqlx::query_scalar(
            "INSERT INTO sets (group_id, name, abbreviation)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (group_id) DO UPDATE SET name = ?2, abbreviation = ?3
             RETURNING id",
        )
        .bind(set.group_id)
        .bind(&set.name)
        .bind(&set.abbreviation)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Inserts a card variant if it is not cataloged yet, returning the row
    /// id either way.
    pub async fn insert_card(&self, set_id: i64, card: &CardSeed) -> Result<i64, ScrapeError> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO cards
                 (set_id, tcgplayer_id, product_id, product_name, product_url,
                  number, rarity, condition, printing)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (product_id, condition, printing) DO NOTHING
             RETURNING id",
        )
        .bind(set_id)
        .bind(card.tcgplayer_id)
        .bind(card.product_id)
        .bind(&card.product_name)
        .bind(&card.product_url)
        .bind(card.number)
        .bind(&card.rarity)
        .bind(&card.condition)
        .bind(&card.printing)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(id),
            None => {
                let id = sqlx::query_scalar(
                    "SELECT id FROM cards
                     WHERE product_id = ?1 AND condition = ?2 AND printing = ?3",
                )
                .bind(card.product_id)
                .bind(&card.condition)
                .bind(&card.printing)
                .fetch_one(&self.pool)
                .await?;
                Ok(id)
            }
        }
    }
}

#[async_trait]
impl SaleStore for SqliteStore {
    async fn insert_sale(
        &self,
        card_id: i64,
        sale: &SalesRecord,
    ) -> Result<InsertOutcome, ScrapeError> {
        let result = sqlx::query(
            "INSERT INTO card_sales
                 (card_id, order_date, purchase_price, shipping_price, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (card_id, order_date, purchase_price, quantity) DO NOTHING",
        )
        .bind(card_id)
        .bind(sale.order_date)
        .bind(sale.purchase_price)
        .bind(sale.shipping_price)
        .bind(sale.quantity)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_set() -> SetSeed {
        SetSeed {
            group_id: 23874,
            name: "Example Horizons".into(),
            abbreviation: "exh".into(),
        }
    }

    pub(crate) fn sample_card(product_id: i64) -> CardSeed {
        CardSeed {
            tcgplayer_id: 5000 + product_id,
            product_id,
            product_name: format!("Example Card {product_id}"),
            product_url: format!("https://www.tcgplayer.com/product/{product_id}/example"),
            number: 1,
            rarity: "R".into(),
            condition: "Near Mint".into(),
            printing: "Normal".into(),
        }
    }

    pub(crate) fn sample_sale() -> SalesRecord {
        SalesRecord {
            order_date: Utc.with_ymd_and_hms(2024, 6, 3, 18, 41, 12).unwrap(),
            purchase_price: 4.39,
            shipping_price: 1.27,
            quantity: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_sales_are_absorbed() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let set_id = store.upsert_set(&sample_set()).await.unwrap();
        let card_id = store.insert_card(set_id, &sample_card(1)).await.unwrap();

        let sale = sample_sale();
        assert_eq!(
            store.insert_sale(card_id, &sale).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_sale(card_id, &sale).await.unwrap(),
            InsertOutcome::Duplicate
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM card_sales")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn same_sale_on_another_card_is_distinct() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let set_id = store.upsert_set(&sample_set()).await.unwrap();
        let first = store.insert_card(set_id, &sample_card(1)).await.unwrap();
        let second = store.insert_card(set_id, &sample_card(2)).await.unwrap();

        let sale = sample_sale();
        assert_eq!(
            store.insert_sale(first, &sale).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_sale(second, &sale).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn reseeding_a_set_is_idempotent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.upsert_set(&sample_set()).await.unwrap();
        let second = store.upsert_set(&sample_set()).await.unwrap();
        assert_eq!(first, second);

        let card = sample_card(1);
        let set_id = first;
        let a = store.insert_card(set_id, &card).await.unwrap();
        let b = store.insert_card(set_id, &card).await.unwrap();
        assert_eq!(a, b);
    }
}
