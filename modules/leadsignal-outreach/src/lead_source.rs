use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use leadsignal_common::Candidate;
use leadsignal_scout::Scout;

/// Where a cycle gets its candidates from.
#[async_trait]
pub trait LeadSource: Send + Sync {
    /// Candidates in discovery order.
    async fn candidates(&self) -> Result<Vec<Candidate>>;
}

#[async_trait]
impl LeadSource for Scout {
    async fn candidates(&self) -> Result<Vec<Candidate>> {
        let (candidates, _stats) = self.scan(Utc::now()).await?;
        Ok(candidates)
    }
}
