//! AWS Cost Explorer client.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use costgauge_common::{CostRecord, Error, Page, Result, TOTAL_GROUP_KEY, UNTAGGED_GROUP_KEY};
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::models::{
    AwsErrorBody, GetCostAndUsageRequest, GetCostAndUsageResponse, GroupDefinition, MetricValue,
    TimePeriod,
};
use super::signing::{Credentials, Signer};
use crate::client::{BillingClient, CostQuery};

const SERVICE: &str = "ce";
const TARGET: &str = "AWSInsightsIndexService.GetCostAndUsage";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Default Cost Explorer region; the API is only served from us-east-1
pub const DEFAULT_REGION: &str = "us-east-1";

/// Cost Explorer client settings
#[derive(Debug, Clone)]
pub struct CostExplorerConfig {
    pub region: String,
    /// Overrides `https://ce.<region>.amazonaws.com`
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for CostExplorerConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// `GetCostAndUsage` over the JSON 1.1 protocol, SigV4 signed
#[derive(Debug, Clone)]
pub struct CostExplorerClient {
    client: Client,
    signer: Signer,
    url: Url,
    host: String,
}

impl CostExplorerClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint is not a valid URL or the HTTP
    /// client cannot be built.
    pub fn new(credentials: Credentials, config: CostExplorerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ce.{}.amazonaws.com", config.region));
        let url = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid Cost Explorer endpoint {}: {}", endpoint, e)))?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::Config(format!("endpoint {} has no host", endpoint)));
            }
        };

        let client = Client::builder()
            .user_agent(format!("costgauge/{}", costgauge_common::VERSION))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            signer: Signer::new(credentials, config.region, SERVICE),
            url,
            host,
        })
    }

    /// Create a client with credentials from the environment
    pub fn from_env(config: CostExplorerConfig) -> Result<Self> {
        Self::new(Credentials::from_env()?, config)
    }

    fn build_request(query: &CostQuery, token: Option<&str>) -> GetCostAndUsageRequest {
        GetCostAndUsageRequest {
            time_period: TimePeriod {
                start: query.range.start().format("%Y-%m-%d").to_string(),
                end: query.range.exclusive_end().format("%Y-%m-%d").to_string(),
            },
            granularity: query.granularity.as_str().to_string(),
            metrics: vec![query.metric.as_str().to_string()],
            group_by: query
                .group_by
                .iter()
                .map(|tag| GroupDefinition {
                    kind: "TAG".to_string(),
                    key: tag.clone(),
                })
                .collect(),
            next_page_token: token.map(str::to_string),
        }
    }

    /// Convert one response into records
    fn convert(query: &CostQuery, response: GetCostAndUsageResponse) -> Result<Page> {
        let metric = query.metric.as_str();
        let mut records = Vec::new();

        for result in &response.results_by_time {
            let period_start = parse_date(&result.time_period.start)?;

            match &query.group_by {
                Some(tag) => {
                    for group in &result.groups {
                        let raw = group.keys.first().map(String::as_str).unwrap_or_default();
                        let value = group.metrics.get(metric).ok_or_else(|| {
                            Error::Upstream(format!("group {} is missing metric {}", raw, metric))
                        })?;
                        push_record(
                            &mut records,
                            period_start,
                            tag_value(tag, raw),
                            parse_amount(value)?,
                        )?;
                    }
                }
                None => {
                    // Ungrouped periods with no spend may omit the metric
                    if let Some(value) = result.total.get(metric) {
                        push_record(
                            &mut records,
                            period_start,
                            TOTAL_GROUP_KEY.to_string(),
                            parse_amount(value)?,
                        )?;
                    }
                }
            }
        }

        Ok(Page::new(records, response.next_page_token))
    }
}

/// Append a record, skipping credit and refund lines.
///
/// Negative lines are dropped with a warning. The window id comes from the
/// enclosing cycle span.
fn push_record(
    records: &mut Vec<CostRecord>,
    period_start: NaiveDate,
    group_key: String,
    amount: Decimal,
) -> Result<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        warn!(
            group_key = %group_key,
            date = %period_start,
            amount = %amount,
            "Skipping negative cost line"
        );
        return Ok(());
    }
    records.push(CostRecord::new(period_start, group_key, amount)?);
    Ok(())
}

/// Strip the `<tag>$` prefix Cost Explorer puts on tag group keys
fn tag_value(tag: &str, raw: &str) -> String {
    let value = raw
        .strip_prefix(tag)
        .and_then(|rest| rest.strip_prefix('$'))
        .unwrap_or(raw);
    if value.is_empty() {
        UNTAGGED_GROUP_KEY.to_string()
    } else {
        value.to_string()
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Upstream(format!("invalid period start {:?}: {}", s, e)))
}

fn parse_amount(value: &MetricValue) -> Result<Decimal> {
    Decimal::from_str(&value.amount)
        .or_else(|_| Decimal::from_scientific(&value.amount))
        .map_err(|e| Error::Upstream(format!("invalid amount {:?}: {}", value.amount, e)))
}

#[async_trait]
impl BillingClient for CostExplorerClient {
    fn name(&self) -> &'static str {
        "cost-explorer"
    }

    #[instrument(skip(self, query), fields(range = %query.range, granularity = %query.granularity))]
    async fn fetch_page(&self, query: &CostQuery, token: Option<&str>) -> Result<Page> {
        let body = serde_json::to_vec(&Self::build_request(query, token))
            .map_err(|e| Error::Upstream(format!("failed to encode request: {}", e)))?;

        let signed = self.signer.sign_post(
            &self.host,
            &[("content-type", CONTENT_TYPE), ("x-amz-target", TARGET)],
            &body,
            Utc::now(),
        )?;

        debug!(url = %self.url, has_token = token.is_some(), "Requesting cost and usage page");

        let mut request = self
            .client
            .post(self.url.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", TARGET)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Upstream(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<AwsErrorBody>(&text) {
                Ok(err) => format!(
                    "{} {}: {}",
                    status.as_u16(),
                    err.short_kind(),
                    err.message.as_deref().unwrap_or("")
                ),
                Err(_) => format!("{} {}", status.as_u16(), text),
            };
            warn!(status = status.as_u16(), "Cost Explorer returned an error");
            return Err(Error::Upstream(message));
        }

        let parsed: GetCostAndUsageResponse = serde_json::from_str(&text)?;
        Self::convert(query, parsed)
    }
}
