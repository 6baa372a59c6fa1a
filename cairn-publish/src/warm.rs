//! Gateway warm fetch after a production publication.
//!
//! Requests the new root and each of its top-level entries through an HTTP
//! gateway so the first real visitor does not pay for content discovery.
//! Nothing here can fail a run.

use std::time::Duration;

use reqwest::{Client, Url};

use cairn_core::{Cid, Link};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub requested: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct GatewayWarmer {
    client: Client,
    gateway: String,
    timeout: Duration,
}

impl GatewayWarmer {
    pub fn new(gateway: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            gateway: gateway.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Fetch `root` and every top-level link in order.
    pub async fn warm(&self, root: &Cid, links: &[Link]) -> WarmReport {
        let mut report = WarmReport::default();
        let base = match Url::parse(&self.gateway) {
            Ok(gateway) => directory_url(&gateway, &["ipfs", root.as_str()]),
            Err(e) => {
                tracing::warn!(gateway = %self.gateway, error = %e, "invalid gateway url");
                None
            }
        };
        let Some(base) = base else {
            report.requested = links.len() + 1;
            report.failed = report.requested;
            return report;
        };

        let targets = std::iter::once(("", Some(base.clone()))).chain(
            links
                .iter()
                .map(|l| (l.name.as_str(), directory_url(&base, &[l.name.as_str()]))),
        );
        for (name, url) in targets {
            report.requested += 1;
            let result = match &url {
                Some(url) => self.fetch(url).await,
                None => Err("link name is not addressable".to_string()),
            };
            if let Err(reason) = result {
                report.failed += 1;
                tracing::warn!(root = %root, link = name, reason = %reason, "warm fetch failed");
            }
        }
        tracing::info!(
            root = %root,
            requested = report.requested,
            failed = report.failed,
            "gateway warmed"
        );
        report
    }

    async fn fetch(&self, url: &Url) -> Result<(), String> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        response.bytes().await.map_err(|e| e.to_string())?;
        tracing::debug!(url = %url, "warm fetch ok");
        Ok(())
    }
}

/// `base` with `segments` appended, each percent-encoded, plus a trailing `/`.
fn directory_url(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().ok()?;
        path.pop_if_empty().extend(segments).push("");
    }
    Some(url)
}
