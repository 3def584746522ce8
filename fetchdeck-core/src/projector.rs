//! 把状态快照投影成界面文案和进度。

use crate::{
    error::{JobError, SubmitFailure},
    types::{DerivedUiState, JobId, JobState, Observation},
};
use std::time::Duration;

pub const VALIDATION_MESSAGE: &str = "⚠️ Please enter a URL.";
pub const STARTING_MESSAGE: &str = "⏳ Starting download...";
pub const COMPLETED_MESSAGE: &str = "✅ Download complete!";
pub const TRACKING_ERROR_MESSAGE: &str = "❌ Error tracking progress.";
pub const ARTIFACT_ERROR_MESSAGE: &str = "❌ Error fetching file";

/// 根据上一次的界面状态和最新观测计算新的界面状态
///
/// 没有绑定任务时总是返回空状态。错误快照和查询失败不改变进度。
pub fn project(
    previous: &DerivedUiState,
    observation: Option<&Observation>,
    job_id: Option<&JobId>,
) -> DerivedUiState {
    if job_id.is_none() {
        return DerivedUiState::default();
    }

    let Some(observation) = observation else {
        return previous.clone();
    };

    match observation {
        Observation::Snapshot(snapshot) => match snapshot.state {
            JobState::Queued | JobState::Downloading => DerivedUiState {
                status_message: format!("⏳ {}...", snapshot.state),
                progress_percent: clamp_progress(snapshot.progress),
            },
            JobState::Completed => DerivedUiState {
                status_message: COMPLETED_MESSAGE.to_string(),
                progress_percent: 100.0,
            },
            JobState::Error => DerivedUiState {
                status_message: format!(
                    "❌ Error: {}",
                    snapshot.error_detail.as_deref().unwrap_or("Unknown error")
                ),
                progress_percent: previous.progress_percent,
            },
        },
        Observation::TrackingFailed => DerivedUiState {
            status_message: TRACKING_ERROR_MESSAGE.to_string(),
            progress_percent: previous.progress_percent,
        },
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

pub(crate) fn submission_failed_message(err: &JobError) -> String {
    match err {
        JobError::Submission {
            reason: SubmitFailure::Network,
            message,
        } => format!("❌ Network error: {message}"),
        JobError::Submission { message, .. } => format!("❌ Error: {message}"),
        other => format!("❌ Error: {other}"),
    }
}

pub(crate) fn artifact_saved_message(reset_delay: Duration) -> String {
    format!(
        "{COMPLETED_MESSAGE} Resetting in {} seconds...",
        reset_delay.as_secs()
    )
}
