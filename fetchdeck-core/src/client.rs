use crate::{
    config::Config,
    error::{JobError, SubmitFailure},
    types::{Artifact, JobId, JobParameters, JobState, MediaKind, StatusSnapshot},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_DISPOSITION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 无法从响应头得到文件名时使用的名字
pub const DEFAULT_FILENAME: &str = "download";

/// 远程下载服务的三个操作
#[async_trait]
pub trait JobClient: Send + Sync {
    /// 创建下载任务，返回任务 id
    async fn submit(&self, parameters: &JobParameters) -> Result<JobId, JobError>;

    /// 读取一次任务状态
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusSnapshot, JobError>;

    /// 获取已完成任务的产物
    async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact, JobError>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    #[serde(rename = "type")]
    kind: MediaKind,
    resolution: &'a str,
    filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder: Option<&'a str>,
}

impl<'a> From<&'a JobParameters> for SubmitRequest<'a> {
    fn from(p: &'a JobParameters) -> Self {
        Self {
            url: &p.url,
            kind: p.kind,
            resolution: p.resolution.as_deref().unwrap_or(""),
            filename: p.requested_filename.as_deref().unwrap_or(""),
            folder: p.folder.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    status: Option<String>,
    progress: Option<f64>,
    error: Option<String>,
}

impl TryFrom<ProgressResponse> for StatusSnapshot {
    type Error = JobError;

    fn try_from(resp: ProgressResponse) -> Result<Self, Self::Error> {
        let status = resp
            .status
            .ok_or_else(|| JobError::TransientFetch("response has no status field".into()))?;
        let state = JobState::from_wire(&status).ok_or(JobError::Protocol { status })?;
        let progress = resp.progress.unwrap_or(0.0);

        Ok(match state {
            JobState::Error => StatusSnapshot::failed(
                progress,
                resp.error.unwrap_or_else(|| "Unknown error".to_string()),
            ),
            state => StatusSnapshot::new(state, progress),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FolderResponse {
    folder: String,
}

/// 基于 reqwest 的下载服务客户端
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    client: Client,
    base_url: String,
}

impl HttpJobClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// 查询服务端默认保存目录
    pub async fn default_folder(&self) -> Result<String> {
        let resp = self.client.get(self.endpoint("default-folder")).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("HTTP error: {}", resp.status()));
        }
        Ok(resp.json::<FolderResponse>().await?.folder)
    }
}

#[async_trait]
impl JobClient for HttpJobClient {
    async fn submit(&self, parameters: &JobParameters) -> Result<JobId, JobError> {
        let resp = self
            .client
            .post(self.endpoint("download"))
            .json(&SubmitRequest::from(parameters))
            .send()
            .await
            .map_err(|e| JobError::submission(SubmitFailure::Network, e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| JobError::submission(SubmitFailure::Network, e.to_string()))?;
        let parsed = serde_json::from_str::<SubmitResponse>(&body);

        if !status.is_success() {
            let message = parsed
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(JobError::submission(SubmitFailure::Rejected, message));
        }

        let parsed = parsed.map_err(|e| {
            JobError::submission(SubmitFailure::Malformed, format!("invalid response: {e}"))
        })?;
        match parsed.id {
            Some(id) if !id.is_empty() => Ok(JobId::new(id)),
            _ => Err(JobError::submission(
                SubmitFailure::MissingId,
                parsed.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
        }
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusSnapshot, JobError> {
        let resp = self
            .client
            .get(self.endpoint(&format!("progress/{job_id}")))
            .send()
            .await
            .map_err(|e| JobError::TransientFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(JobError::TransientFetch(format!(
                "HTTP error: {}",
                resp.status()
            )));
        }

        let body = resp
            .json::<ProgressResponse>()
            .await
            .map_err(|e| JobError::TransientFetch(e.to_string()))?;
        StatusSnapshot::try_from(body)
    }

    async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact, JobError> {
        let resp = self
            .client
            .get(self.endpoint(&format!("file/{job_id}")))
            .send()
            .await
            .map_err(|e| JobError::ArtifactFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(JobError::ArtifactFetch(format!(
                "HTTP error: {}",
                resp.status()
            )));
        }

        let suggested_filename = suggested_filename(
            resp.headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
        );

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| JobError::ArtifactFetch(format!("Stream error: {e}")))?;
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(job_id = %job_id, size = bytes.len(), filename = %suggested_filename, "Artifact received");
        Ok(Artifact {
            bytes,
            suggested_filename,
        })
    }
}

/// 从 `Content-Disposition` 头中取出文件名
///
/// 支持 `attachment; filename="clip.mp4"` 与不带引号的形式，
/// 头不存在或无法解析时返回 [`DEFAULT_FILENAME`]。
pub fn suggested_filename(content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(|value| {
            // ASCII 小写不改变字节偏移
            let start = value.to_ascii_lowercase().find("filename=")? + "filename=".len();
            let rest = value[start..].trim_start();
            let name = match rest.strip_prefix('"') {
                Some(quoted) => quoted.split('"').next()?,
                None => rest.split(';').next()?,
            };
            let name = name.replace('"', "");
            let name = name.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}
