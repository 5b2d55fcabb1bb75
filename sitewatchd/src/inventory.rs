use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use shared::types::Site;
use crate::config::InventoryConfig;

/// Source of the site list, fetched fresh every cycle.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn fetch_sites(&self) -> Result<Vec<Site>>;
}

/// Inventory served as `{"data": [...]}` behind a bearer token.
pub struct ApiInventory {
    client: Client,
    url: String,
    token: String,
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<Vec<RawSite>>,
}

#[derive(Deserialize)]
struct RawSite {
    id: Option<i64>,
    domain: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    vps_ip: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

impl ApiInventory {
    pub fn new(config: &InventoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build inventory HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl Inventory for ApiInventory {
    async fn fetch_sites(&self) -> Result<Vec<Site>> {
        tracing::debug!(url = %self.url, "Fetching site inventory");

        let resp = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("No response from inventory API at {}", self.url))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("Inventory API returned {}{}", status, status_hint(status)));
        }

        let body = resp
            .text()
            .await
            .context("Failed to read inventory response")?;
        let sites = parse_sites(&body)?;

        tracing::info!(count = sites.len(), "Fetched site inventory");
        Ok(sites)
    }
}

fn status_hint(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => " (check the API token)",
        StatusCode::NOT_FOUND => " (check the inventory URL)",
        StatusCode::TOO_MANY_REQUESTS => " (rate limited)",
        _ => "",
    }
}

/// Parses the envelope, dropping entries without an id or domain.
pub fn parse_sites(body: &str) -> Result<Vec<Site>> {
    let envelope: Envelope =
        serde_json::from_str(body).context("Inventory response is not valid JSON")?;
    let raw = envelope
        .data
        .ok_or_else(|| anyhow!("Inventory response has no `data` array"))?;

    let sites = raw
        .into_iter()
        .filter_map(|s| {
            let domain = s.domain.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
            match (s.id, domain) {
                (Some(id), Some(domain)) => Some(Site {
                    id,
                    domain,
                    status: s.status,
                    vps_ip: s.vps_ip,
                    address: s.address,
                }),
                (id, _) => {
                    tracing::warn!(?id, "Skipping inventory entry without id or domain");
                    None
                }
            }
        })
        .collect();

    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        let body = r#"{"data": [
            {"id": 1, "domain": "a.com", "status": "active", "vps_ip": "10.0.0.1"},
            {"id": 2, "domain": " b.com ", "address": "host-b"},
            {"id": 3, "domain": ""},
            {"domain": "noid.com"}
        ]}"#;

        let sites = parse_sites(body).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].vps_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(sites[1].domain, "b.com");
        assert_eq!(sites[1].address.as_deref(), Some("host-b"));
    }

    #[test]
    fn test_missing_data_is_error() {
        assert!(parse_sites(r#"{"items": []}"#).is_err());
        assert!(parse_sites("not json").is_err());
    }

    #[test]
    fn test_empty_data_is_empty_list() {
        assert!(parse_sites(r#"{"data": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_status_hints() {
        assert_eq!(status_hint(StatusCode::UNAUTHORIZED), " (check the API token)");
        assert_eq!(status_hint(StatusCode::BAD_GATEWAY), "");
    }
}
