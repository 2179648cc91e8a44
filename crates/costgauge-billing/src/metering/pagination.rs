//! Depagination of billing API results

use crate::client::{BillingClient, CostQuery};
use costgauge_common::{CostRecord, Error, Result};
use tracing::{debug, instrument};

/// Fetch every page of `query`, concatenating records in page order.
///
/// Stops after the first page without a continuation token. A page count
/// above `max_pages`, or a token repeated by consecutive pages, is reported
/// as `Error::Pagination`.
#[instrument(skip(client, query), fields(client = client.name(), range = %query.range))]
pub async fn fetch_all<C>(client: &C, query: &CostQuery, max_pages: usize) -> Result<Vec<CostRecord>>
where
    C: BillingClient + ?Sized,
{
    let mut records = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if pages >= max_pages {
            return Err(Error::Pagination(format!(
                "more than {} pages for {}",
                max_pages, query.range
            )));
        }

        let page = client.fetch_page(query, token.as_deref()).await?;
        pages += 1;
        records.extend(page.records);

        match page.next_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(Error::Pagination(format!(
                    "continuation token repeated after page {}",
                    pages
                )));
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(pages, records = records.len(), "Fetched all pages");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use chrono::NaiveDate;
    use costgauge_common::{DateRange, Granularity, Page};
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 5).unwrap()
    }

    fn query() -> CostQuery {
        CostQuery::new(DateRange::trailing(day(), 7), Granularity::Daily).grouped_by("User")
    }

    fn record(key: &str) -> CostRecord {
        CostRecord::new(day(), key, dec!(1)).unwrap()
    }

    #[tokio::test]
    async fn test_three_pages_three_calls() {
        let client = ScriptedClient::new(vec![
            Ok(Page::new(vec![record("a")], Some("t1".into()))),
            Ok(Page::new(vec![record("b")], Some("t2".into()))),
            Ok(Page::last(vec![record("c")])),
        ]);

        let records = fetch_all(&client, &query(), 10).await.unwrap();

        assert_eq!(client.calls(), 3);
        assert_eq!(client.tokens_seen(), vec![None, Some("t1".into()), Some("t2".into())]);
        let keys: Vec<_> = records.iter().map(|r| r.group_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_repeated_token() {
        let client = ScriptedClient::repeating(Page::new(vec![record("a")], Some("same".into())));
        let err = fetch_all(&client, &query(), 1000).await.unwrap_err();
        assert!(matches!(err, Error::Pagination(_)));
        assert!(err.is_upstream());
        // Second call repeats the token
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_max_pages_exceeded() {
        let client = ScriptedClient::new(vec![
            Ok(Page::new(vec![], Some("t1".into()))),
            Ok(Page::new(vec![], Some("t2".into()))),
            Ok(Page::last(vec![])),
        ]);
        let err = fetch_all(&client, &query(), 2).await.unwrap_err();
        assert!(matches!(err, Error::Pagination(_)));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let client = ScriptedClient::new(vec![
            Ok(Page::new(vec![record("a")], Some("t1".into()))),
            Err(Error::Upstream("throttled".into())),
        ]);
        let err = fetch_all(&client, &query(), 10).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn test_empty_single_page() {
        let client = ScriptedClient::new(vec![Ok(Page::last(vec![]))]);
        let records = fetch_all(&client, &query(), 10).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(client.calls(), 1);
    }
}
