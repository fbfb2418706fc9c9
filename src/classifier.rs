//! Picks the real paginated sales-history fetch out of the page's network
//! traffic. The site fires a cheap single-row probe against the same
//! endpoint before the full fetch; matching that probe instead of the real
//! payload silently yields an empty result, so every check here fails
//! closed.

/// Base of the marketplace API that serves sales history.
const LATEST_SALES_BASE: &str = "https://mpapi.tcgplayer.com/v2/product";

/// Path fragment shared by every sales-history request, regardless of card.
const LATEST_SALES_PATH: &str = "/latestsales?mpfev=";

/// The per-card sales-history endpoint, with the probe discriminator.
#[derive(Debug, Clone)]
pub struct SalesEndpoint {
    prefix: String,
    probe_limit: u64,
}

impl SalesEndpoint {
    pub fn for_product(product_id: i64, probe_limit: u64) -> Self {
        Self {
            prefix: format!("{LATEST_SALES_BASE}/{product_id}/latestsales?mpfev"),
            probe_limit,
        }
    }
}

/// Which requests a [`ResponseWaiter`](crate::browser::ResponseWaiter)
/// should treat as the payload it is waiting for.
#[derive(Debug, Clone)]
pub enum ResponseMatcher {
    /// The card's initial sales fetch, matched by endpoint prefix.
    InitialSales(SalesEndpoint),
    /// A load-more page, matched generically across cards.
    PagedSales { probe_limit: u64 },
}

impl ResponseMatcher {
    /// Decides membership for one intercepted request.
    pub fn matches(&self, url: &str, method: &str, post_data: Option<&str>) -> bool {
        match self {
            ResponseMatcher::InitialSales(endpoint) => {
                url.starts_with(&endpoint.prefix)
                    && !is_probe_request(post_data, endpoint.probe_limit)
            }
            ResponseMatcher::PagedSales { probe_limit } => {
                url.contains(LATEST_SALES_PATH)
                    && method.eq_ignore_ascii_case("POST")
                    && !is_probe_request(post_data, *probe_limit)
            }
        }
    }
}

/// True unless the request body parses and carries a page-sized `limit`.
/// An absent body, unparseable JSON or a missing `limit` field all count as
/// the probe: there is no safe way to treat them as the real fetch.
fn is_probe_request(post_data: Option<&str>, probe_limit: u64) -> bool {
    match requested_limit(post_data) {
        Some(limit) => limit == probe_limit,
        None => true,
    }
}

fn requested_limit(post_data: Option<&str>) -> Option<u64> {
    let body: serde_json::Value = serde_json::from_str(post_data?).ok()?;
    body.get("limit")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_URL: &str = "https://mpapi.tcgplayer.com/v2/product/477236/latestsales?mpfev=3278";

    fn initial() -> ResponseMatcher {
        ResponseMatcher::InitialSales(SalesEndpoint::for_product(477236, 1))
    }

    fn paged() -> ResponseMatcher {
        ResponseMatcher::PagedSales { probe_limit: 1 }
    }

    #[test]
    fn accepts_the_page_sized_fetch() {
        let body = r#"{"listingType":"All","limit":25,"offset":0}"#;
        assert!(initial().matches(CARD_URL, "POST", Some(body)));
        assert!(paged().matches(CARD_URL, "POST", Some(body)));
    }

    #[test]
    fn rejects_the_single_row_probe() {
        let body = r#"{"listingType":"All","limit":1,"offset":0}"#;
        assert!(!initial().matches(CARD_URL, "POST", Some(body)));
        assert!(!paged().matches(CARD_URL, "POST", Some(body)));
    }

    #[test]
    fn rejects_other_products() {
        let body = r#"{"limit":25}"#;
        let other = "https://mpapi.tcgplayer.com/v2/product/999999/latestsales?mpfev=3278";
        assert!(!initial().matches(other, "POST", Some(body)));
        // The generic matcher deliberately spans products.
        assert!(paged().matches(other, "POST", Some(body)));
    }

    #[test]
    fn rejects_unrelated_endpoints() {
        let body = r#"{"limit":25}"#;
        let url = "https://mpapi.tcgplayer.com/v2/product/477236/details";
        assert!(!initial().matches(url, "POST", Some(body)));
        assert!(!paged().matches(url, "POST", Some(body)));
    }

    #[test]
    fn paged_matcher_requires_post() {
        let body = r#"{"limit":25}"#;
        assert!(!paged().matches(CARD_URL, "GET", Some(body)));
    }

    #[test]
    fn fails_closed_on_malformed_bodies() {
        assert!(!initial().matches(CARD_URL, "POST", Some("limit=25")));
        assert!(!initial().matches(CARD_URL, "POST", Some("")));
        assert!(!initial().matches(CARD_URL, "POST", None));
        assert!(!paged().matches(CARD_URL, "POST", Some("{\"limit\":\"25\"}")));
    }

    #[test]
    fn fails_closed_on_missing_limit_field() {
        let body = r#"{"listingType":"All","offset":0}"#;
        assert!(!initial().matches(CARD_URL, "POST", Some(body)));
        assert!(!paged().matches(CARD_URL, "POST", Some(body)));
    }

    #[test]
    fn probe_limit_is_a_knob() {
        // A site-side change to the probe size only needs a config bump.
        let matcher = ResponseMatcher::PagedSales { probe_limit: 5 };
        assert!(!matcher.matches(CARD_URL, "POST", Some(r#"{"limit":5}"#)));
        assert!(matcher.matches(CARD_URL, "POST", Some(r#"{"limit":1}"#)));
    }
}
