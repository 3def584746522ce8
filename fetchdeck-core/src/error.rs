use thiserror::Error;

/// 提交失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFailure {
    /// 请求未能到达服务端
    Network,
    /// 服务端返回了非成功状态
    Rejected,
    /// 成功响应中缺少任务 id
    MissingId,
    /// 响应体无法解析
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("job submission failed: {message}")]
    Submission {
        reason: SubmitFailure,
        message: String,
    },

    #[error("status fetch failed: {0}")]
    TransientFetch(String),

    #[error("unrecognized job status {status:?}")]
    Protocol { status: String },

    #[error("artifact fetch failed: {0}")]
    ArtifactFetch(String),

    #[error("saving artifact failed: {0}")]
    Save(String),

    #[error("{0} is not supported")]
    UnsupportedOperation(&'static str),
}

impl JobError {
    pub(crate) fn submission(reason: SubmitFailure, message: impl Into<String>) -> Self {
        Self::Submission {
            reason,
            message: message.into(),
        }
    }

    /// 单次轮询失败，轮询继续
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch(_) | Self::Protocol { .. })
    }
}
