use serde::{Deserialize, Serialize};
use std::fmt;

/// 远程服务返回的任务标识符（不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 下载类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// 视频
    #[default]
    Video,
    /// 仅音频
    Audio,
}

/// 提交下载任务时的参数，提交后不可变
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    /// 媒体页面 URL，不能为空
    pub url: String,
    /// 视频或音频
    pub kind: MediaKind,
    /// 目标分辨率（高度），例如 "720"
    pub resolution: Option<String>,
    /// 期望的文件名（不含扩展名）
    pub requested_filename: Option<String>,
    /// 服务端保存目录
    pub folder: Option<String>,
}

impl JobParameters {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// 一次已提交的下载任务
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub parameters: JobParameters,
}

/// 远程任务状态（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// 排队中
    Queued,
    /// 正在下载
    Downloading,
    /// 已完成
    Completed,
    /// 失败
    Error,
}

impl JobState {
    /// 解析服务端的状态字符串，未知值返回 None
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            // 服务端在工作线程启动前会短暂报告 "starting"
            "queued" | "starting" => Some(Self::Queued),
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: JobState,
    /// 0..=100，服务端不保证单调
    pub progress: f64,
    /// 仅在 state 为 Error 时存在
    pub error_detail: Option<String>,
}

impl StatusSnapshot {
    pub fn new(state: JobState, progress: f64) -> Self {
        Self {
            state,
            progress,
            error_detail: None,
        }
    }

    pub fn failed(progress: f64, detail: impl Into<String>) -> Self {
        Self {
            state: JobState::Error,
            progress,
            error_detail: Some(detail.into()),
        }
    }
}

/// 轮询器每个 tick 的观测结果
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// 成功读取到状态
    Snapshot(StatusSnapshot),
    /// 本次查询失败（网络、解析或协议错误），不影响任务逻辑状态
    TrackingFailed,
}

impl Observation {
    pub fn state(&self) -> Option<JobState> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot.state),
            Self::TrackingFailed => None,
        }
    }
}

/// 已完成任务的产物
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub suggested_filename: String,
}

/// 供界面渲染的派生状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedUiState {
    pub status_message: String,
    pub progress_percent: f64,
}

/// 会话事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 新任务已提交并开始轮询
    JobStarted { job_id: JobId },
    /// 界面状态更新
    StatusChanged(DerivedUiState),
    /// 产物已交给保存器
    ArtifactSaved {
        job_id: JobId,
        filename: String,
        size: u64,
    },
    /// 任务以错误结束（远程失败或产物获取失败），会话停在此处
    JobFailed { job_id: JobId, reason: String },
    /// 任务被取消或被新任务替换
    JobCancelled { job_id: JobId },
    /// 会话已重置，可以提交新任务
    SessionReset,
}
