use async_trait::async_trait;
use serde::Deserialize;
use shared_types::Amount;

use super::ledger::{EscrowLedger, LedgerError};

/// Client for a settlement service exposing
/// `POST {base}/holds`, `POST {base}/holds/{key}/settle` and
/// `POST {base}/holds/{key}/cancel`. The idempotency key travels in the
/// `Idempotency-Key` header as well as the path.
#[derive(Debug, Clone)]
pub struct HttpEscrowLedger {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HoldResponse {
    hold_ref: String,
}

impl HttpEscrowLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(
        &self,
        path: &str,
        key: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, LedgerError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Idempotency-Key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
            Err(LedgerError::Transient(format!("{status}: {body}")))
        } else {
            Err(LedgerError::Rejected(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl EscrowLedger for HttpEscrowLedger {
    async fn hold(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<String, LedgerError> {
        let response = self
            .post(
                "/holds",
                idempotency_key,
                serde_json::json!({
                    "key": idempotency_key,
                    "from": from,
                    "to": to,
                    "amount": amount,
                }),
            )
            .await?;
        let hold: HoldResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Rejected(format!("malformed hold response: {e}")))?;
        Ok(hold.hold_ref)
    }

    async fn settle(&self, idempotency_key: &str) -> Result<(), LedgerError> {
        self.post(
            &format!("/holds/{idempotency_key}/settle"),
            idempotency_key,
            serde_json::json!({}),
        )
        .await
        .map(|_| ())
    }

    async fn cancel(&self, idempotency_key: &str) -> Result<(), LedgerError> {
        self.post(
            &format!("/holds/{idempotency_key}/cancel"),
            idempotency_key,
            serde_json::json!({}),
        )
        .await
        .map(|_| ())
    }
}
