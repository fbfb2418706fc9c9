use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// One sale as captured from the sales-history payload. Immutable once
/// parsed; identity for dedup purposes is (card, order date, price,
/// quantity) and lives in the store's uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRecord {
    pub order_date: DateTime<Utc>,
    pub purchase_price: f64,
    pub shipping_price: f64,
    pub quantity: i64,
}

/// The wire shape of the sales-history endpoint: `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
struct SalesPayload {
    data: Vec<SalesRecord>,
}

/// Decodes an intercepted response body into sale records.
///
/// The decode is strict about the fields it needs and ignores the rest of
/// the payload; any shape mismatch is an error rather than a partial result.
pub fn parse_sales_payload(body: &str) -> Result<Vec<SalesRecord>, ScrapeError> {
    let payload: SalesPayload =
        serde_json::from_str(body).map_err(|err| ScrapeError::MalformedResponse(err.to_string()))?;
    Ok(payload.data)
}

/// The sale with the earliest order date, over the full accumulated set.
/// Pages can arrive out of chronological order, so this must never be
/// computed over the latest batch alone.
pub fn oldest_sale(records: &[SalesRecord]) -> Option<&SalesRecord> {
    records.iter().min_by_key(|record| record.order_date)
}

/// A catalog entry to scrape: one card variant with its product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CardRef {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_url: String,
    pub condition: String,
    pub printing: String,
}

impl CardRef {
    /// Product page URL with the variant pinned through query parameters, so
    /// the sales widget serves this condition/printing.
    pub fn variant_url(&self) -> String {
        format!(
            "{}?Language=English&Condition={}&Printing={}",
            self.product_url,
            self.condition.replace(' ', "+"),
            self.printing.replace(' ', "+"),
        )
    }
}

/// One queued unit of work: scrape a single card's recent sales.
///
/// Jobs are immutable values; a retry enqueues a fresh copy via
/// [`ScrapeJob::with_incremented_attempt`] instead of mutating shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeJob {
    pub card: CardRef,
    /// Position in the batch, for progress display.
    pub index: usize,
    /// Batch size, for progress display.
    pub total: usize,
    /// 1-based attempt counter.
    pub attempt: u32,
}

impl ScrapeJob {
    pub fn new(card: CardRef, index: usize, total: usize) -> Self {
        Self {
            card,
            index,
            total,
            attempt: 1,
        }
    }

    /// A fresh copy for requeueing, preserving the batch position.
    pub fn with_incremented_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// A set row as seeded into the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct SetSeed {
    pub group_id: i64,
    pub name: String,
    pub abbreviation: String,
}

/// A card as seeded into the catalog, before it has an identity.
#[derive(Debug, Clone, Deserialize)]
pub struct CardSeed {
    pub tcgplayer_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_url: String,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub rarity: String,
    pub condition: String,
    pub printing: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn record(day: u32, price: f64) -> SalesRecord {
        SalesRecord {
            order_date: Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap(),
            purchase_price: price,
            shipping_price: 1.27,
            quantity: 1,
        }
    }

    #[test]
    fn parses_a_real_shaped_payload() {
        let body = r#"{
            "previousPage": "Yes",
            "nextPage": "Yes",
            "resultCount": 2,
            "data": [
                {
                    "condition": "Near Mint",
                    "variant": "Normal",
                    "language": "English",
                    "quantity": 1,
                    "title": "Example Card",
                    "listingType": "ListingWithoutPhotos",
                    "customListingId": "",
                    "purchasePrice": 4.39,
                    "shippingPrice": 0.0,
                    "orderDate": "2024-06-03T18:41:12.503+00:00"
                },
                {
                    "quantity": 2,
                    "purchasePrice": 4.15,
                    "shippingPrice": 1.27,
                    "orderDate": "2024-06-01T09:30:00.000+00:00"
                }
            ]
        }"#;

        let records = parse_sales_payload(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].purchase_price, 4.39);
        assert_eq!(records[1].quantity, 2);
    }

    #[test]
    fn rejects_payloads_missing_required_fields() {
        let body = r#"{"data": [{"purchasePrice": 4.39, "quantity": 1}]}"#;
        assert!(matches!(
            parse_sales_payload(body),
            Err(ScrapeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_non_json_bodies() {
        assert!(matches!(
            parse_sales_payload("<html>rate limited</html>"),
            Err(ScrapeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn oldest_sale_scans_the_full_set() {
        // Out-of-order pages must not fool the cutoff check.
        let records = vec![record(10, 4.0), record(2, 5.0), record(20, 3.0)];
        let oldest = oldest_sale(&records).unwrap();
        assert_eq!(oldest.purchase_price, 5.0);
    }

    #[test]
    fn oldest_sale_of_empty_set_is_none() {
        assert!(oldest_sale(&[]).is_none());
    }

    #[test]
    fn variant_url_pins_condition_and_printing() {
        let card = CardRef {
            id: 1,
            product_id: 477236,
            product_name: "Example Card".into(),
            product_url: "https://www.tcgplayer.com/product/477236/example".into(),
            condition: "Near Mint".into(),
            printing: "Foil".into(),
        };
        assert_eq!(
            card.variant_url(),
            "https://www.tcgplayer.com/product/477236/example?Language=English&Condition=Near+Mint&Printing=Foil"
        );
    }

    #[test]
    fn requeue_copies_preserve_batch_position() {
        let job = ScrapeJob::new(
            CardRef {
                id: 7,
                product_id: 1,
                product_name: "Card".into(),
                product_url: "https://example.test/p/1".into(),
                condition: "Near Mint".into(),
                printing: "Normal".into(),
            },
            3,
            120,
        );
        let retry = job.with_incremented_attempt();
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.index, 3);
        assert_eq!(retry.total, 120);
        // The original is untouched.
        assert_eq!(job.attempt, 1);
    }
}
