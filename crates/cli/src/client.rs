//! Engine HTTP client

use flowdbg_common::{
    Context, CreateSessionRequest, CreateSessionResponse, Error, FlowDetail, FlowList,
    FlowSummary, Result, ServiceInfo, SessionSnapshot,
};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Client for the debug engine's REST endpoints
#[derive(Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base: Url,
}

fn transport(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

impl EngineClient {
    /// Create a client for the engine at `base`
    pub fn new(base: &str) -> Result<Self> {
        let mut url = Url::parse(base)
            .map_err(|e| Error::InvalidConfig(format!("invalid server URL {}: {}", base, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "server URL must be http or https: {}",
                base
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(transport)?;

        Ok(Self { http, base: url })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Endpoint under the base; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig(format!("cannot use {} as a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Stream endpoint for a session; `http` maps to `ws`, `https` to `wss`
    pub fn websocket_url(&self, session_id: &str) -> Result<Url> {
        let mut url = self.url(&["debug", "sessions", session_id, "ws"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidConfig(format!("cannot use {} for {}", scheme, url)))?;
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        debug!("GET {}", url);
        let response = self.http.get(url).send().await.map_err(transport)?;
        decode(response).await
    }

    /// Check if the engine is reachable
    pub async fn health_check(&self) -> bool {
        self.service_info().await.is_ok()
    }

    pub async fn service_info(&self) -> Result<ServiceInfo> {
        self.get(&["debug", ""]).await
    }

    pub async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        let list: FlowList = self.get(&["debug", "flows"]).await?;
        Ok(list.flows)
    }

    /// Flow steps plus its Mermaid diagram
    pub async fn flow_detail(&self, name: &str) -> Result<FlowDetail> {
        self.get(&["debug", "flows", name]).await
    }

    /// Create a session; the reply carries the id used by the stream
    pub async fn create_session(
        &self,
        flow_name: &str,
        initial_context: Context,
    ) -> Result<CreateSessionResponse> {
        let url = self.url(&["debug", "sessions"])?;
        let body = CreateSessionRequest {
            flow_name: flow_name.to_string(),
            initial_context,
        };
        debug!("POST {} ({})", url, flow_name);
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        self.get(&["debug", "sessions", session_id]).await
    }
}

/// Decode a success body, or turn a `{"detail": ...}` body into `Error::Api`
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(transport);
    }

    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => match body.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(detail) => detail.to_string(),
            None => body.to_string(),
        },
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}
