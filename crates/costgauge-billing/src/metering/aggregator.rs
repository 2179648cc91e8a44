//! Cost aggregation
//!
//! Groups depaginated cost records by a key and sums their amounts with exact
//! decimal arithmetic. Results are built fresh for every export cycle.

use super::pagination::fetch_all;
use crate::client::{BillingClient, CostMetric, CostQuery};
use chrono::NaiveDate;
use costgauge_common::{
    CostRecord, DateRange, Granularity, KeyMode, Result, DEFAULT_MAX_PAGES, DEFAULT_TAG_KEY,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Summed amount per key
pub type AggregateResult<K> = BTreeMap<K, Decimal>;

/// Group `records` by `key_fn` and sum amounts within each group
pub fn aggregate<K, F>(records: &[CostRecord], key_fn: F) -> AggregateResult<K>
where
    K: Ord,
    F: Fn(&CostRecord) -> K,
{
    let mut result = AggregateResult::new();
    for record in records {
        *result.entry(key_fn(record)).or_insert(Decimal::ZERO) += record.amount;
    }
    result
}

/// Key-wise sum of two aggregates
pub fn merge<K: Ord>(mut a: AggregateResult<K>, b: AggregateResult<K>) -> AggregateResult<K> {
    for (key, amount) in b {
        *a.entry(key).or_insert(Decimal::ZERO) += amount;
    }
    a
}

/// Whole-range total per group key
pub fn by_group_key(record: &CostRecord) -> String {
    record.group_key.clone()
}

/// Per-date amount per group key
pub fn by_date_and_group_key(record: &CostRecord) -> (NaiveDate, String) {
    (record.period_start, record.group_key.clone())
}

/// Per-period amount, ignoring the group key
pub fn by_period(record: &CostRecord) -> NaiveDate {
    record.period_start
}

/// Aggregate for one window, keyed according to its `KeyMode`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowAggregate {
    Total(AggregateResult<String>),
    ByDate(AggregateResult<(NaiveDate, String)>),
    ByPeriod(AggregateResult<NaiveDate>),
}

impl WindowAggregate {
    pub fn from_records(records: &[CostRecord], mode: KeyMode) -> Self {
        match mode {
            KeyMode::Total => WindowAggregate::Total(aggregate(records, by_group_key)),
            KeyMode::ByDate => WindowAggregate::ByDate(aggregate(records, by_date_and_group_key)),
            KeyMode::ByPeriod => WindowAggregate::ByPeriod(aggregate(records, by_period)),
        }
    }

    pub fn key_mode(&self) -> KeyMode {
        match self {
            WindowAggregate::Total(_) => KeyMode::Total,
            WindowAggregate::ByDate(_) => KeyMode::ByDate,
            WindowAggregate::ByPeriod(_) => KeyMode::ByPeriod,
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        match self {
            WindowAggregate::Total(m) => m.len(),
            WindowAggregate::ByDate(m) => m.len(),
            WindowAggregate::ByPeriod(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum over every key
    pub fn total(&self) -> Decimal {
        match self {
            WindowAggregate::Total(m) => m.values().copied().sum(),
            WindowAggregate::ByDate(m) => m.values().copied().sum(),
            WindowAggregate::ByPeriod(m) => m.values().copied().sum(),
        }
    }
}

/// Drives the billing client and aggregates what it returns
#[derive(Clone)]
pub struct CostAggregator {
    client: Arc<dyn BillingClient>,
    tag_key: String,
    metric: CostMetric,
    max_pages: usize,
}

impl CostAggregator {
    pub fn new(client: Arc<dyn BillingClient>) -> Self {
        Self {
            client,
            tag_key: DEFAULT_TAG_KEY.to_string(),
            metric: CostMetric::default(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_tag_key(mut self, tag_key: impl Into<String>) -> Self {
        self.tag_key = tag_key.into();
        self
    }

    pub fn with_metric(mut self, metric: CostMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn client(&self) -> &Arc<dyn BillingClient> {
        &self.client
    }

    /// Build the upstream query for a range and key mode
    pub fn query(&self, range: DateRange, granularity: Granularity, mode: KeyMode) -> CostQuery {
        let query = CostQuery::new(range, granularity).with_metric(self.metric);
        if mode.is_grouped() {
            query.grouped_by(self.tag_key.clone())
        } else {
            query
        }
    }

    /// Fetch every page for `range` and aggregate it according to `mode`
    #[instrument(skip(self), fields(client = self.client.name()))]
    pub async fn collect(
        &self,
        range: DateRange,
        granularity: Granularity,
        mode: KeyMode,
    ) -> Result<WindowAggregate> {
        let query = self.query(range, granularity, mode);
        let records = fetch_all(self.client.as_ref(), &query, self.max_pages).await?;
        let result = WindowAggregate::from_records(&records, mode);
        debug!(records = records.len(), keys = result.len(), "Aggregated cost records");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use costgauge_common::Page;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(day: NaiveDate, key: &str, amount: Decimal) -> CostRecord {
        CostRecord::new(day, key, amount).unwrap()
    }

    fn sample() -> Vec<CostRecord> {
        vec![
            record(date(2024, 5, 5), "alice", dec!(10.00)),
            record(date(2024, 5, 5), "bob", dec!(5.00)),
            record(date(2024, 5, 6), "alice", dec!(2.50)),
        ]
    }

    #[test]
    fn test_group_by_key() {
        let result = aggregate(&sample(), by_group_key);
        assert_eq!(result.len(), 2);
        assert_eq!(result["alice"], dec!(12.50));
        assert_eq!(result["bob"], dec!(5.00));
    }

    #[test]
    fn test_group_by_date_and_key() {
        let result = aggregate(&sample(), by_date_and_group_key);
        assert_eq!(result.len(), 3);
        assert_eq!(result[&(date(2024, 5, 5), "alice".to_string())], dec!(10.00));
        assert_eq!(result[&(date(2024, 5, 5), "bob".to_string())], dec!(5.00));
        assert_eq!(result[&(date(2024, 5, 6), "alice".to_string())], dec!(2.50));
    }

    #[test]
    fn test_group_by_period() {
        let result = aggregate(&sample(), by_period);
        assert_eq!(result[&date(2024, 5, 5)], dec!(15.00));
        assert_eq!(result[&date(2024, 5, 6)], dec!(2.50));
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&[], by_group_key).is_empty());
        assert!(WindowAggregate::from_records(&[], KeyMode::ByDate).is_empty());
    }

    #[test]
    fn test_concatenation_equals_merged_pages() {
        let page_one = vec![
            record(date(2024, 5, 5), "alice", dec!(0.01)),
            record(date(2024, 5, 5), "bob", dec!(3.333)),
        ];
        let page_two = vec![
            record(date(2024, 5, 6), "alice", dec!(0.02)),
            record(date(2024, 5, 6), "carol", dec!(7)),
        ];
        let page_three = vec![record(date(2024, 5, 7), "bob", dec!(0.667))];

        let all: Vec<_> = page_one
            .iter()
            .chain(&page_two)
            .chain(&page_three)
            .cloned()
            .collect();

        let whole = aggregate(&all, by_group_key);
        let merged = merge(
            merge(
                aggregate(&page_one, by_group_key),
                aggregate(&page_two, by_group_key),
            ),
            aggregate(&page_three, by_group_key),
        );
        assert_eq!(whole, merged);

        // Order of pages does not matter either
        let reversed = merge(
            aggregate(&page_three, by_group_key),
            merge(
                aggregate(&page_two, by_group_key),
                aggregate(&page_one, by_group_key),
            ),
        );
        assert_eq!(whole, reversed);
        assert_eq!(whole["bob"], dec!(4.000));
    }

    #[test]
    fn test_cent_precision_is_exact() {
        let records: Vec<_> = (0..1000)
            .map(|_| record(date(2024, 5, 5), "alice", dec!(0.01)))
            .collect();
        let result = aggregate(&records, by_group_key);
        assert_eq!(result["alice"], dec!(10.00));
    }

    #[test]
    fn test_window_aggregate_total() {
        let result = WindowAggregate::from_records(&sample(), KeyMode::Total);
        assert_eq!(result.key_mode(), KeyMode::Total);
        assert_eq!(result.len(), 2);
        assert_eq!(result.total(), dec!(17.50));
    }

    #[tokio::test]
    async fn test_collect_depaginates() {
        let records = sample();
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(Page::new(records[..1].to_vec(), Some("t1".into()))),
            Ok(Page::new(records[1..2].to_vec(), Some("t2".into()))),
            Ok(Page::last(records[2..].to_vec())),
        ]));
        let aggregator = CostAggregator::new(client.clone());

        let range = DateRange::trailing(date(2024, 5, 6), 1);
        let result = aggregator
            .collect(range, Granularity::Daily, KeyMode::Total)
            .await
            .unwrap();

        assert_eq!(client.calls(), 3);
        match result {
            WindowAggregate::Total(m) => {
                assert_eq!(m["alice"], dec!(12.50));
                assert_eq!(m["bob"], dec!(5.00));
            }
            other => panic!("unexpected aggregate {:?}", other),
        }
    }

    #[test]
    fn test_query_grouping_follows_key_mode() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let aggregator = CostAggregator::new(client).with_tag_key("Team");
        let range = DateRange::trailing(date(2024, 5, 6), 7);

        let grouped = aggregator.query(range, Granularity::Daily, KeyMode::ByDate);
        assert_eq!(grouped.group_by.as_deref(), Some("Team"));

        let ungrouped = aggregator.query(range, Granularity::Monthly, KeyMode::ByPeriod);
        assert!(ungrouped.group_by.is_none());
    }
}
