//! Account information, didimo listing and on-demand features.
//!
//! These endpoints live under `/v2` and answer plain JSON; success is
//! exactly 200.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::HttpClient;
use crate::error::ServiceError;
use crate::types::{JobId, JobStatus};

const LIST_PATH: &str = "/v2/didimo/list";
const PROFILE_PATH: &str = "/v2/profile";

/// One row of the didimo listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedDidimo {
    /// Didimo key
    pub key: JobId,
    /// Remote status
    pub status: JobStatus,
    /// Completion percent, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,
    /// Input type the didimo was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// Creation timestamp as sent by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    models: Vec<ListedDidimo>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    total_list_size: Option<u64>,
}

/// Didimos gathered from one or more listing pages
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DidimoList {
    /// Rows in service order
    pub didimos: Vec<ListedDidimo>,
    /// Pages fetched
    pub pages: usize,
    /// Total didimos in the account, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Account tier and points balance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Tier name
    pub tier_label: String,
    /// Points balance
    pub points: serde_json::Value,
    /// Features the tier can request
    #[serde(default)]
    pub available_features: serde_json::Value,
    /// Points expiring next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_expiration_points: Option<serde_json::Value>,
    /// When they expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_expiration_date: Option<String>,
}

/// Profile plus the size of the didimo listing
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccountSummary {
    /// Tier, points and features
    #[serde(flatten)]
    pub profile: AccountProfile,
    /// Didimos in the account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_didimos: Option<u64>,
}

/// Key of a didimo produced by an on-demand feature
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutedJob {
    /// New didimo key
    pub key: JobId,
    /// Remaining response fields, kept for JSON output
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|e| ServiceError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

impl HttpClient {
    async fn send_v2(&self, path: &str, request: reqwest::RequestBuilder) -> Result<String, ServiceError> {
        let transport = |e: reqwest::Error| ServiceError::Transport {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let response = self.authorized(request).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if status != reqwest::StatusCode::OK {
            return Err(ServiceError::Http {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        debug!(path, bytes = body.len(), "service response");
        Ok(body)
    }

    async fn get_v2<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let body = self
            .send_v2(path, self.http.get(self.config.endpoint(path)))
            .await?;
        decode(path, &body)
    }

    /// Fetch up to `max_pages` listing pages (10 didimos each), following
    /// the `next` links the service hands out.
    pub async fn list_didimos(&self, max_pages: usize) -> Result<DidimoList, ServiceError> {
        let mut list = DidimoList::default();
        let mut path = LIST_PATH.to_string();

        while list.pages < max_pages {
            let page: ListPage = self.get_v2(&path).await?;
            list.pages += 1;
            list.total = list.total.or(page.total_list_size);
            list.didimos.extend(page.models);

            match page.next {
                Some(next) => path = format!("/v2{}", next),
                None => break,
            }
        }
        Ok(list)
    }

    /// Tier, points and features, plus how many didimos the account holds
    pub async fn account(&self) -> Result<AccountSummary, ServiceError> {
        let profile: AccountProfile = self.get_v2(PROFILE_PATH).await?;
        let first_page: ListPage = self.get_v2(LIST_PATH).await?;
        Ok(AccountSummary {
            profile,
            total_didimos: first_page.total_list_size,
        })
    }

    /// Request high fidelity blendshapes for didimo `id`
    pub async fn execute_blendshapes(&self, id: &JobId) -> Result<ExecutedJob, ServiceError> {
        let path = format!("/v2/didimo/{}/execute/blendshapes", urlencoding::encode(id.as_str()));
        self.get_v2(&path).await
    }

    /// Deform the model in `vertex` to match the shape of didimo `id`
    pub async fn execute_vertexdeform(&self, id: &JobId, vertex: &Path) -> Result<ExecutedJob, ServiceError> {
        let path = format!("/v2/didimo/{}/execute/vertexdeform", urlencoding::encode(id.as_str()));
        let bytes = tokio::fs::read(vertex).await.map_err(|e| ServiceError::Io {
            path: vertex.to_path_buf(),
            reason: e.to_string(),
        })?;

        let body = self
            .send_v2(&path, self.http.post(self.config.endpoint(&path)).body(bytes))
            .await?;
        decode(&path, &body)
    }
}
