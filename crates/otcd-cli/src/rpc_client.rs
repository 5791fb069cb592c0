use anyhow::{bail, Context};

use otcd_rpc::RpcDealStatus;

/// Simple JSON-RPC 2.0 client used by the CLI to talk to a running
/// otcd-node. Uses raw HTTP POST with serde_json rather than the full
/// jsonrpsee client to keep the CLI binary lean and dependency-minimal.
pub struct OtcRpcClient {
    url: String,
    client: reqwest::Client,
}

impl OtcRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to node at {}", self.url))?;

        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            bail!("RPC error: {}", err);
        }

        Ok(json["result"].clone())
    }

    pub async fn status(&self, deal_id: &str) -> anyhow::Result<RpcDealStatus> {
        let result = self.call("otc_status", serde_json::json!([deal_id])).await?;
        serde_json::from_value(result).context("parsing status response")
    }

    pub async fn fill_details(
        &self,
        deal_id: &str,
        token: &str,
        payback_address: &str,
        recipient_address: &str,
        email: Option<String>,
    ) -> anyhow::Result<RpcDealStatus> {
        let params = serde_json::json!({
            "deal_id": deal_id,
            "token": token,
            "payback_address": payback_address,
            "recipient_address": recipient_address,
            "email": email,
        });
        let result = self.call("otc_fillDetails", serde_json::json!([params])).await?;
        serde_json::from_value(result).context("parsing fillDetails response")
    }

    pub async fn cancel(&self, deal_id: &str, token: &str) -> anyhow::Result<RpcDealStatus> {
        let result = self.call("otc_cancel", serde_json::json!([deal_id, token])).await?;
        serde_json::from_value(result).context("parsing cancel response")
    }
}
