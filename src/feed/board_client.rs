//! HTTP adapter for an external load board exposing postings and a bid
//! endpoint on one base URL.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{FeedSource, LoadPosting};

use super::types::{BidRequest, BidResponse, PostingResponse};
use super::{BidGateway, BidOutcome, LoadFeed};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a load board. One instance serves both the posting feed
/// and bid submission, since boards expose both on the same surface.
pub struct LoadBoardClient {
    client: Client,
    base_url: String,
    source: FeedSource,
}

impl LoadBoardClient {
    pub fn new(base_url: impl Into<String>, source: FeedSource) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            source,
        })
    }

    pub fn source(&self) -> FeedSource {
        self.source
    }
}

#[async_trait]
impl LoadFeed for LoadBoardClient {
    async fn poll_postings(&self) -> Result<Vec<LoadPosting>> {
        let url = format!("{}/postings", self.base_url);

        debug!(url = %url, "Fetching postings");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch postings")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Postings request failed: {} - {}", status, body);
        }

        let items: Vec<PostingResponse> = response
            .json()
            .await
            .context("Failed to parse postings response")?;

        Ok(items
            .into_iter()
            .filter_map(|p| p.into_posting(self.source))
            .collect())
    }
}

#[async_trait]
impl BidGateway for LoadBoardClient {
    async fn submit_bid(&self, posting_id: &str, amount: Decimal) -> Result<BidOutcome> {
        let url = format!("{}/bids", self.base_url);

        debug!(url = %url, posting_id = %posting_id, amount = %amount, "Submitting bid");

        let request = BidRequest {
            posting_id: posting_id.to_string(),
            amount,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to submit bid")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bid request failed: {} - {}", status, body);
        }

        let body: BidResponse = response
            .json()
            .await
            .context("Failed to parse bid response")?;

        Ok(BidOutcome {
            accepted: body.accepted,
            final_rate: body.final_rate,
        })
    }
}
