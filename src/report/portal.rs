//! ReportPortal client
//!
//! Strictly best effort: every public method swallows its own errors after
//! logging them at warn, so reporting-service availability can never change
//! the outcome of a test run. Constructed disabled when the `RP_*`
//! environment is absent.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::multipart;
use serde_json::json;

use crate::report::types::CaseStatus;
use crate::utils::config::PortalSettings;

pub struct Portal {
    inner: Option<Inner>,
    launch_uuid: Option<String>,
}

struct Inner {
    http: reqwest::Client,
    settings: PortalSettings,
}

#[derive(serde::Deserialize)]
struct CreatedEntry {
    id: String,
}

fn status_str(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Passed => "PASSED",
        CaseStatus::Failed => "FAILED",
        CaseStatus::Skipped => "SKIPPED",
    }
}

impl Portal {
    /// Build from `RP_*` env vars; disabled when they are absent.
    pub fn from_env() -> Self {
        match PortalSettings::from_env() {
            Some(settings) => {
                log::info!(
                    "ReportPortal enabled: {} project={}",
                    settings.endpoint,
                    settings.project
                );
                Self {
                    inner: Some(Inner {
                        http: reqwest::Client::new(),
                        settings,
                    }),
                    launch_uuid: None,
                }
            }
            None => Self::disabled(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            launch_uuid: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Open a launch for this run. Best effort.
    pub async fn start_launch(&mut self) {
        let Some(inner) = &self.inner else { return };
        match inner.start_launch().await {
            Ok(uuid) => self.launch_uuid = Some(uuid),
            Err(e) => log::warn!("ReportPortal launch not started: {:#}", e),
        }
    }

    /// Open a test item under the current launch. Returns the item uuid,
    /// or None when reporting is disabled or the call failed.
    pub async fn start_item(&self, name: &str) -> Option<String> {
        let inner = self.inner.as_ref()?;
        let launch = self.launch_uuid.as_deref()?;
        match inner.start_item(launch, name).await {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                log::warn!("ReportPortal item not started for '{}': {:#}", name, e);
                None
            }
        }
    }

    /// Attach a failure message and screenshot to an item. Best effort.
    pub async fn attach_failure(
        &self,
        item_uuid: &str,
        message: &str,
        screenshot: Option<(&str, Vec<u8>)>,
    ) {
        let Some(inner) = &self.inner else { return };
        let Some(launch) = self.launch_uuid.as_deref() else {
            return;
        };
        if let Err(e) = inner
            .log_failure(launch, item_uuid, message, screenshot)
            .await
        {
            log::warn!("ReportPortal failure attachment skipped: {:#}", e);
        }
    }

    /// Close a test item with its final status. Best effort.
    pub async fn finish_item(&self, item_uuid: &str, status: CaseStatus) {
        let Some(inner) = &self.inner else { return };
        let Some(launch) = self.launch_uuid.as_deref() else {
            return;
        };
        if let Err(e) = inner.finish_item(launch, item_uuid, status).await {
            log::warn!("ReportPortal item not finished: {:#}", e);
        }
    }

    /// Close the launch. Best effort.
    pub async fn finish_launch(&mut self) {
        let Some(inner) = &self.inner else { return };
        let Some(launch) = self.launch_uuid.take() else {
            return;
        };
        if let Err(e) = inner.finish_launch(&launch).await {
            log::warn!("ReportPortal launch not finished: {:#}", e);
        }
    }
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/{}/{}",
            self.settings.endpoint, self.settings.project, path
        )
    }

    async fn start_launch(&self) -> Result<String> {
        let body = json!({
            "name": self.settings.launch,
            "startTime": Utc::now().to_rfc3339(),
            "mode": "DEFAULT",
        });
        let created: CreatedEntry = self
            .http
            .post(self.url("launch"))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("launch request failed")?
            .error_for_status()
            .context("launch request rejected")?
            .json()
            .await
            .context("launch response unparsable")?;
        Ok(created.id)
    }

    async fn start_item(&self, launch_uuid: &str, name: &str) -> Result<String> {
        let body = json!({
            "name": name,
            "type": "TEST",
            "launchUuid": launch_uuid,
            "startTime": Utc::now().to_rfc3339(),
        });
        let created: CreatedEntry = self
            .http
            .post(self.url("item"))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("item request failed")?
            .error_for_status()
            .context("item request rejected")?
            .json()
            .await
            .context("item response unparsable")?;
        Ok(created.id)
    }

    async fn finish_item(
        &self,
        launch_uuid: &str,
        item_uuid: &str,
        status: CaseStatus,
    ) -> Result<()> {
        let body = json!({
            "endTime": Utc::now().to_rfc3339(),
            "status": status_str(status),
            "launchUuid": launch_uuid,
        });
        self.http
            .put(self.url(&format!("item/{}", item_uuid)))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("finish item request failed")?
            .error_for_status()
            .context("finish item request rejected")?;
        Ok(())
    }

    async fn log_failure(
        &self,
        launch_uuid: &str,
        item_uuid: &str,
        message: &str,
        screenshot: Option<(&str, Vec<u8>)>,
    ) -> Result<()> {
        let mut entry = json!({
            "launchUuid": launch_uuid,
            "itemUuid": item_uuid,
            "time": Utc::now().to_rfc3339(),
            "level": "ERROR",
            "message": message,
        });

        let mut form = multipart::Form::new();
        if let Some((filename, bytes)) = screenshot {
            entry["file"] = json!({ "name": filename });
            let file_part = multipart::Part::bytes(bytes)
                .file_name(filename.to_string())
                .mime_str("image/png")?;
            form = form.part("file", file_part);
        }

        let json_part = multipart::Part::text(json!([entry]).to_string())
            .mime_str("application/json")?;
        form = form.part("json_request_part", json_part);

        self.http
            .post(self.url("log"))
            .bearer_auth(&self.settings.api_key)
            .multipart(form)
            .send()
            .await
            .context("log request failed")?
            .error_for_status()
            .context("log request rejected")?;
        Ok(())
    }

    async fn finish_launch(&self, launch_uuid: &str) -> Result<()> {
        let body = json!({ "endTime": Utc::now().to_rfc3339() });
        self.http
            .put(self.url(&format!("launch/{}/finish", launch_uuid)))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("finish launch request failed")?
            .error_for_status()
            .context("finish launch request rejected")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_str(CaseStatus::Passed), "PASSED");
        assert_eq!(status_str(CaseStatus::Failed), "FAILED");
        assert_eq!(status_str(CaseStatus::Skipped), "SKIPPED");
    }

    #[tokio::test]
    async fn test_disabled_portal_is_a_no_op() {
        let mut portal = Portal::disabled();
        assert!(!portal.is_enabled());

        // none of these may error or panic without a backend
        portal.start_launch().await;
        assert_eq!(portal.start_item("search_smoke").await, None);
        portal
            .attach_failure("no-item", "boom", Some(("shot.png", vec![0u8; 4])))
            .await;
        portal.finish_item("no-item", CaseStatus::Failed).await;
        portal.finish_launch().await;
    }

    #[tokio::test]
    async fn test_unreachable_portal_never_panics() {
        // Enabled but pointing nowhere: every call must degrade to a warn.
        let mut portal = Portal {
            inner: Some(Inner {
                http: reqwest::Client::new(),
                settings: PortalSettings {
                    endpoint: "http://127.0.0.1:1".to_string(),
                    api_key: "token".to_string(),
                    project: "qa".to_string(),
                    launch: "smoke".to_string(),
                },
            }),
            launch_uuid: None,
        };

        portal.start_launch().await;
        // launch never opened, so item creation short-circuits
        assert_eq!(portal.start_item("search_smoke").await, None);
        portal.finish_launch().await;
    }
}
