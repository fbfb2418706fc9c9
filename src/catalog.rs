use async_trait::async_trait;

use crate::error::ScrapeError;
use crate::model::CardRef;
use crate::store::SqliteStore;

/// Supplies the batch of card variants to scrape.
#[async_trait]
pub trait CardCatalog: Send + Sync {
    /// The set's cards with no recorded sales yet, in catalog order. Cards
    /// that already have sales were harvested by an earlier run and are
    /// skipped so interrupted batches can resume cheaply.
    async fn cards_to_scrape(&self, group_id: i64) -> Result<Vec<CardRef>, ScrapeError>;
}

#[async_trait]
impl CardCatalog for SqliteStore {
    async fn cards_to_scrape(&self, group_id: i64) -> Result<Vec<CardRef>, ScrapeError> {
        let cards = sqlx::query_as::<_, CardRef>(
            "SELECT c.id, c.product_id, c.product_name, c.product_url,
                    c.condition, c.printing
             FROM cards c
             JOIN sets s ON s.id = c.set_id
             LEFT JOIN card_sales cs ON cs.card_id = c.id
             WHERE s.group_id = ?1
             GROUP BY c.id
             HAVING COUNT(cs.id) = 0
             ORDER BY c.id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cards)
    }
}
