//! ACK API client implementation.
//!
//! Requests use the ROA signature scheme (HMAC-SHA1 over a canonical request
//! string, sent as `Authorization: acs <key-id>:<signature>`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha1::Sha1;
use tracing::{debug, info, warn};

use super::models::{
    AckCluster, AckErrorBody, AckNodePool, ScaleNodePoolRequest, ScaleNodePoolResponse,
};
use crate::providers::traits::{
    CloudProviderError, ClusterDetail, ClusterState, NodePoolDetail, NodePoolProvider,
    NodePoolState, ScaleOutTask,
};

type HmacSha1 = Hmac<Sha1>;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// ACK OpenAPI version these endpoints belong to.
const API_VERSION: &str = "2015-12-15";

const ACCEPT: &str = "application/json";
const CONTENT_TYPE_JSON: &str = "application/json";

/// Alibaba Cloud Container Service (ACK) provider.
#[derive(Clone)]
pub struct Ack {
    /// HTTP client.
    client: Client,
    /// AccessKey ID.
    access_key_id: String,
    /// AccessKey secret.
    access_key_secret: String,
    /// Region the cluster lives in.
    region: String,
    /// API base URL.
    endpoint: String,
}

impl Ack {
    /// Create a new ACK provider.
    ///
    /// # Arguments
    /// * `access_key_id` - AccessKey ID
    /// * `access_key_secret` - AccessKey secret
    /// * `region` - Region ID (e.g., "cn-hangzhou")
    ///
    /// # Errors
    /// Returns error if credentials are empty or the HTTP client cannot be created.
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, CloudProviderError> {
        let access_key_id = access_key_id.into();
        let access_key_secret = access_key_secret.into();
        if access_key_id.trim().is_empty() || access_key_secret.trim().is_empty() {
            return Err(CloudProviderError::Config(
                "AccessKey ID and secret are required".to_string(),
            ));
        }

        let region = region.into();
        if region.trim().is_empty() {
            return Err(CloudProviderError::Config("Region is required".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(CloudProviderError::Http)?;

        let endpoint = format!("https://cs.{region}.aliyuncs.com");

        Ok(Self {
            client,
            access_key_id,
            access_key_secret,
            region,
            endpoint,
        })
    }

    /// Override the API base URL (private endpoints, tests).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Region this provider talks to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign and execute an ROA request.
    async fn roa_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl serde::Serialize>,
    ) -> Result<T, CloudProviderError> {
        debug!(path = %path, method = %method, "ACK request");

        let body = body.map(serde_json::to_vec).transpose()?;
        let content_type = if body.is_some() { CONTENT_TYPE_JSON } else { "" };
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut acs_headers = BTreeMap::new();
        acs_headers.insert("x-acs-signature-method".to_string(), "HMAC-SHA1".to_string());
        acs_headers.insert(
            "x-acs-signature-nonce".to_string(),
            uuid::Uuid::new_v4().to_string(),
        );
        acs_headers.insert("x-acs-signature-version".to_string(), "1.0".to_string());
        acs_headers.insert("x-acs-version".to_string(), API_VERSION.to_string());

        let to_sign = string_to_sign(
            method.as_str(),
            ACCEPT,
            content_type,
            &date,
            &acs_headers,
            path,
        );
        let signature = sign(&self.access_key_secret, &to_sign)?;

        let url = format!("{}{}", self.endpoint, path);
        let mut request = self
            .client
            .request(method, &url)
            .header("Accept", ACCEPT)
            .header("Date", &date)
            .header(
                "Authorization",
                format!("acs {}:{}", self.access_key_id, signature),
            );

        for (name, value) in &acs_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(body) = body {
            request = request.header("Content-Type", content_type).body(body);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                CloudProviderError::Serialization(e)
            });
        }

        let message = serde_json::from_str::<AckErrorBody>(&text)
            .ok()
            .filter(|body| !body.message.is_empty() || !body.code.is_empty())
            .map_or(text, |body| format!("{}: {}", body.code, body.message));

        if status == StatusCode::NOT_FOUND {
            Err(CloudProviderError::NotFound(message))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(CloudProviderError::Auth(message))
        } else {
            Err(CloudProviderError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Convert an ACK cluster to our type.
    fn to_cluster(cluster: &AckCluster) -> ClusterDetail {
        ClusterDetail {
            id: cluster.cluster_id.clone(),
            name: cluster.name.clone(),
            state: ClusterState::from_raw(&cluster.state),
        }
    }

    /// Convert an ACK node pool to our type.
    fn to_node_pool(pool: &AckNodePool) -> NodePoolDetail {
        NodePoolDetail {
            id: pool.nodepool_info.nodepool_id.clone(),
            name: pool.nodepool_info.name.clone(),
            state: NodePoolState::from_raw(&pool.status.state),
            total_nodes: pool.status.total_nodes,
        }
    }
}

/// Build the canonical string the ROA signature is computed over.
fn string_to_sign(
    method: &str,
    accept: &str,
    content_type: &str,
    date: &str,
    acs_headers: &BTreeMap<String, String>,
    resource: &str,
) -> String {
    // Content-MD5 is not sent, so its line stays empty.
    let mut out = format!("{method}\n{accept}\n\n{content_type}\n{date}\n");
    for (name, value) in acs_headers {
        out.push_str(&name.to_ascii_lowercase());
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push_str(resource);
    out
}

/// HMAC-SHA1 the string with the secret and base64 encode the digest.
fn sign(secret: &str, string_to_sign: &str) -> Result<String, CloudProviderError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| CloudProviderError::Config(format!("invalid signing key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl NodePoolProvider for Ack {
    async fn describe_cluster(
        &self,
        cluster_id: &str,
    ) -> Result<ClusterDetail, CloudProviderError> {
        let path = format!("/clusters/{cluster_id}");
        let cluster: AckCluster = self
            .roa_request(Method::GET, &path, None::<&()>)
            .await?;

        debug!(cluster_id = %cluster.cluster_id, state = %cluster.state, "Described cluster");
        Ok(Self::to_cluster(&cluster))
    }

    async fn describe_node_pool(
        &self,
        cluster_id: &str,
        node_pool_id: &str,
    ) -> Result<NodePoolDetail, CloudProviderError> {
        let path = format!("/clusters/{cluster_id}/nodepools/{node_pool_id}");
        let pool: AckNodePool = self
            .roa_request(Method::GET, &path, None::<&()>)
            .await?;

        debug!(
            node_pool_id = %pool.nodepool_info.nodepool_id,
            state = %pool.status.state,
            total_nodes = pool.status.total_nodes,
            "Described node pool"
        );
        Ok(Self::to_node_pool(&pool))
    }

    async fn scale_out_node_pool(
        &self,
        cluster_id: &str,
        node_pool_id: &str,
        count: u64,
    ) -> Result<ScaleOutTask, CloudProviderError> {
        if count == 0 {
            return Err(CloudProviderError::Config(
                "Scale-out count must be at least 1".to_string(),
            ));
        }

        info!(
            cluster_id = %cluster_id,
            node_pool_id = %node_pool_id,
            count,
            "Scaling out node pool"
        );

        let path = format!("/clusters/{cluster_id}/nodepools/{node_pool_id}");
        let body = ScaleNodePoolRequest { count };
        let response: ScaleNodePoolResponse = self
            .roa_request(Method::POST, &path, Some(&body))
            .await?;

        let task_id = response.task_id.ok_or_else(|| {
            CloudProviderError::InvalidResponse(format!(
                "scale response without task_id (request {})",
                response.request_id.as_deref().unwrap_or("unknown")
            ))
        })?;

        info!(node_pool_id = %node_pool_id, task_id = %task_id, "Scale-out accepted");
        Ok(ScaleOutTask { task_id })
    }
}
