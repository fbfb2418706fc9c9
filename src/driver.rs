use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use crate::browser::{human_delay, ResponseWaiter, SessionPage};
use crate::classifier::{ResponseMatcher, SalesEndpoint};
use crate::config::ScrapeConfig;
use crate::error::ScrapeError;
use crate::model::{oldest_sale, parse_sales_payload, SalesRecord, ScrapeJob};
use crate::store::SaleStore;

/// Opens the sales-history modal on the product page.
const MODAL_ACTIVATOR: &str = "div.modal__activator";

/// Fetches the next page of sales inside the modal.
const LOAD_MORE_BUTTON: &str = "button.sales-history-snapshot__load-more__button";

/// Harvests one card's recent sales on the given page, returning how many
/// records were collected.
///
/// The walk: register the response wait, navigate to the card's variant
/// page, capture the initial payload, open the sales-history modal, then
/// keep clicking load-more until the oldest collected sale falls outside
/// the recency window. Each batch is persisted as it arrives, so a later
/// failure never loses the records already seen; the store absorbs the
/// replays when the job is retried from scratch.
///
/// Any failure propagates to the caller; partial pagination state on the
/// rendered page cannot be resumed, so the whole job is the unit of retry.
pub async fn harvest_card(
    session: &SessionPage,
    job: &ScrapeJob,
    store: &dyn SaleStore,
    config: &ScrapeConfig,
) -> Result<usize, ScrapeError> {
    let card = &job.card;
    let endpoint = SalesEndpoint::for_product(card.product_id, config.probe_limit);

    // Subscribe before navigating; the widget fires its fetch while the
    // page is still loading.
    let waiter =
        ResponseWaiter::subscribe(session, ResponseMatcher::InitialSales(endpoint)).await?;
    session
        .goto(&card.variant_url(), config.navigation_timeout())
        .await?;

    let body = waiter.recv(config.response_timeout()).await?;
    let mut sales = parse_sales_payload(&body)?;
    persist_batch(store, card.id, &sales).await?;
    debug!(card = %card.product_name, records = sales.len(), "initial payload captured");

    human_delay(config.human_delay_min_ms, config.human_delay_max_ms).await;
    session
        .click(MODAL_ACTIVATOR, config.element_timeout())
        .await?;

    let threshold = Utc::now() - ChronoDuration::days(config.recency_window_days);
    while within_window(&sales, threshold) {
        let waiter = ResponseWaiter::subscribe(
            session,
            ResponseMatcher::PagedSales {
                probe_limit: config.probe_limit,
            },
        )
        .await?;

        human_delay(config.human_delay_min_ms, config.human_delay_max_ms).await;
        session
            .click(LOAD_MORE_BUTTON, config.element_timeout())
            .await?;

        let body = waiter.recv(config.response_timeout()).await?;
        let batch = parse_sales_payload(&body)?;
        persist_batch(store, card.id, &batch).await?;
        debug!(card = %card.product_name, records = batch.len(), "load-more payload captured");
        sales.extend(batch);
    }

    info!(
        card = %card.product_name,
        records = sales.len(),
        "sales history harvested"
    );
    Ok(sales.len())
}

/// Whether pagination still has ground to cover: true while the oldest
/// collected sale is newer than the threshold. An empty accumulation means
/// the card has no sales at all, so there is nothing more to page through.
fn within_window(records: &[SalesRecord], threshold: DateTime<Utc>) -> bool {
    oldest_sale(records).is_some_and(|sale| sale.order_date > threshold)
}

async fn persist_batch(
    store: &dyn SaleStore,
    card_id: i64,
    records: &[SalesRecord],
) -> Result<(), ScrapeError> {
    for record in records {
        // Duplicates come back as a benign outcome; the widget re-serves
        // rows across pages and retries replay whole pages.
        store.insert_sale(card_id, record).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sale(order_date: DateTime<Utc>) -> SalesRecord {
        SalesRecord {
            order_date,
            purchase_price: 4.39,
            shipping_price: 0.0,
            quantity: 1,
        }
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::days(days)
    }

    #[test]
    fn recent_batches_keep_pagination_going() {
        let threshold = days_ago(7);
        let records = vec![sale(days_ago(1)), sale(days_ago(3))];
        assert!(within_window(&records, threshold));
    }

    #[test]
    fn an_old_enough_first_payload_means_zero_iterations() {
        let threshold = days_ago(7);
        let records = vec![sale(days_ago(2)), sale(days_ago(10))];
        assert!(!within_window(&records, threshold));
    }

    #[test]
    fn cutoff_uses_the_oldest_across_all_pages() {
        // Later pages may be newer than earlier ones; only the minimum over
        // the full accumulation may stop the loop.
        let threshold = days_ago(7);
        let mut records = vec![sale(days_ago(9)), sale(days_ago(1))];
        assert!(!within_window(&records, threshold));

        records.remove(0);
        assert!(within_window(&records, threshold));
    }

    #[test]
    fn a_card_with_no_sales_pages_zero_times() {
        let threshold = days_ago(7);
        assert!(!within_window(&[], threshold));
    }

    #[test]
    fn timestamp_order_is_respected_exactly() {
        let threshold = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let on_threshold = vec![sale(threshold)];
        assert!(!within_window(&on_threshold, threshold));
    }
}
