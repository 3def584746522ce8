use crate::{
    client::JobClient,
    completion::{CompletionHandler, SaveTrigger, SavedArtifact},
    config::Config,
    error::JobError,
    poller::{PollSink, StatusPoller, TickControl},
    projector::{self, ARTIFACT_ERROR_MESSAGE, STARTING_MESSAGE, VALIDATION_MESSAGE},
    state::{BoundJob, PollSession},
    types::{DerivedUiState, Job, JobId, JobParameters, JobState, Observation, SessionEvent},
};
use async_trait::async_trait;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

/// 单任务下载会话
///
/// 持有当前任务 id、轮询器与界面状态。启动新任务前总是先停止旧的轮询器，
/// 任何时刻最多只有一个轮询器在运行。会话被 drop 时停止所有后台任务。
pub struct JobSession {
    shared: Arc<Shared>,
}

struct Shared {
    client: Arc<dyn JobClient>,
    completion: CompletionHandler,
    poll_interval: Duration,
    reset_delay: Duration,
    token: CancellationToken,
    state: RwLock<PollSession>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl JobSession {
    /// 创建新的会话
    ///
    /// # 参数
    /// * `client` - 远程下载服务客户端
    /// * `saver` - 产物保存器
    /// * `config` - 轮询间隔与重置延迟
    /// * `owner` - 所有者的取消令牌，取消后会话内的轮询全部停止
    ///
    /// # 返回
    /// 返回会话实例和事件接收器
    pub fn new(
        client: Arc<dyn JobClient>,
        saver: Arc<dyn SaveTrigger>,
        config: &Config,
        owner: &CancellationToken,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(1024);

        let shared = Shared {
            completion: CompletionHandler::new(Arc::clone(&client), saver),
            client,
            poll_interval: config.poll_interval(),
            reset_delay: config.reset_delay(),
            token: owner.child_token(),
            state: RwLock::new(PollSession::default()),
            event_tx,
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            event_rx,
        )
    }

    /// 提交新任务并开始轮询
    ///
    /// URL 为空时不发出任何请求。提交失败时保留原有任务和轮询器。
    /// 会话关闭后返回 [`JobError::UnsupportedOperation`]。
    pub async fn start(&self, parameters: JobParameters) -> Result<JobId, JobError> {
        if self.shared.token.is_cancelled() {
            return Err(JobError::UnsupportedOperation("start after shutdown"));
        }

        if parameters.url.trim().is_empty() {
            self.shared.publish_message(VALIDATION_MESSAGE.to_string()).await;
            return Err(JobError::Validation("URL must not be empty".into()));
        }

        self.shared.publish_message(STARTING_MESSAGE.to_string()).await;

        let job_id = match self.shared.client.submit(&parameters).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, url = %parameters.url, "Job submission failed");
                self.shared
                    .publish_message(projector::submission_failed_message(&e))
                    .await;
                return Err(e);
            }
        };

        tracing::info!(job_id = %job_id, url = %parameters.url, kind = ?parameters.kind, "Job submitted");
        self.shared
            .bind(Job {
                id: job_id.clone(),
                parameters,
            })
            .await;
        Ok(job_id)
    }

    /// 放弃当前任务并清空界面状态
    ///
    /// 不会中止远程任务；进行中的查询结果会被丢弃。
    pub async fn cancel(&self) {
        let released = {
            let mut state = self.shared.state.write().await;
            state.ui = DerivedUiState::default();
            state.release()
        };

        if let Some(job_id) = released {
            tracing::info!(job_id = %job_id, "Job cancelled");
            self.shared.emit(SessionEvent::JobCancelled { job_id });
        }
        self.shared
            .emit(SessionEvent::StatusChanged(DerivedUiState::default()));
    }

    /// 远程服务不支持暂停
    pub fn pause(&self) -> Result<(), JobError> {
        Err(JobError::UnsupportedOperation("pause"))
    }

    /// 远程服务不支持恢复
    pub fn resume(&self) -> Result<(), JobError> {
        Err(JobError::UnsupportedOperation("resume"))
    }

    /// 停止会话内所有后台任务并清空界面状态，之后不能再提交
    pub async fn shutdown(&self) {
        self.shared.token.cancel();
        let released = {
            let mut state = self.shared.state.write().await;
            state.ui = DerivedUiState::default();
            state.release()
        };

        if let Some(job_id) = released {
            tracing::info!(job_id = %job_id, "Session shut down");
            self.shared.emit(SessionEvent::JobCancelled { job_id });
        }
        self.shared
            .emit(SessionEvent::StatusChanged(DerivedUiState::default()));
    }

    /// 当前界面状态
    pub async fn state(&self) -> DerivedUiState {
        self.shared.state.read().await.ui.clone()
    }

    /// 当前绑定的任务
    pub async fn current_job(&self) -> Option<Job> {
        let state = self.shared.state.read().await;
        state.current.as_ref().map(|bound| bound.job.clone())
    }

    pub async fn active_job(&self) -> Option<JobId> {
        let state = self.shared.state.read().await;
        state.current.as_ref().map(|bound| bound.job.id.clone())
    }

    /// 是否有轮询器在运行
    pub async fn is_polling(&self) -> bool {
        self.shared.state.read().await.is_polling()
    }
}

impl Drop for JobSession {
    fn drop(&mut self) {
        self.shared.token.cancel();
    }
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // 事件只是通知，状态以 JobSession::state 为准；接收方积压时丢弃
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::debug!(?event, "Event channel full, dropping event");
        }
    }

    /// 只改文案，不动进度
    async fn publish_message(&self, message: String) {
        let ui = {
            let mut state = self.state.write().await;
            state.ui.status_message = message;
            state.ui.clone()
        };
        self.emit(SessionEvent::StatusChanged(ui));
    }

    /// 仅当 `job_id` 仍是当前任务时更新界面状态
    async fn publish_for(&self, job_id: &JobId, message: String, progress: Option<f64>) -> bool {
        let ui = {
            let mut state = self.state.write().await;
            if !state.is_current(job_id) {
                return false;
            }
            state.ui.status_message = message;
            if let Some(progress) = progress {
                state.ui.progress_percent = progress;
            }
            state.ui.clone()
        };
        self.emit(SessionEvent::StatusChanged(ui));
        true
    }

    /// 绑定新任务：先停止旧轮询器，再启动新的
    async fn bind(self: &Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        let (replaced, ui) = {
            let mut state = self.state.write().await;
            let replaced = state.release();

            let cancel = self.token.child_token();
            let mut poller = StatusPoller::new(
                job_id.clone(),
                Arc::clone(&self.client),
                self.poll_interval,
                cancel.child_token(),
            );
            poller.start(Arc::new(SessionSink {
                shared: Arc::downgrade(self),
            }));

            state.current = Some(BoundJob::new(job, poller, cancel));
            state.ui = DerivedUiState {
                status_message: STARTING_MESSAGE.to_string(),
                progress_percent: 0.0,
            };
            (replaced, state.ui.clone())
        };

        if let Some(previous) = replaced {
            tracing::info!(job_id = %previous, next = %job_id, "Job replaced");
            self.emit(SessionEvent::JobCancelled { job_id: previous });
        }
        self.emit(SessionEvent::JobStarted { job_id });
        self.emit(SessionEvent::StatusChanged(ui));
    }

    /// 应用一次 tick，过期任务的 tick 被忽略
    async fn apply(&self, job_id: &JobId, observation: Observation) -> TickControl {
        let failure = match &observation {
            Observation::Snapshot(s) if s.state == JobState::Error => Some(
                s.error_detail
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            _ => None,
        };

        let ui = {
            let mut state = self.state.write().await;
            if !state.is_current(job_id) {
                tracing::debug!(job_id = %job_id, "Ignoring tick for stale job");
                return TickControl::Stop;
            }
            let ui = projector::project(&state.ui, Some(&observation), Some(job_id));
            state.ui = ui.clone();
            ui
        };

        self.emit(SessionEvent::StatusChanged(ui));
        if let Some(reason) = failure {
            tracing::warn!(job_id = %job_id, reason = %reason, "Job failed remotely");
            self.emit(SessionEvent::JobFailed {
                job_id: job_id.clone(),
                reason,
            });
        }
        TickControl::Continue
    }

    /// 获取并保存产物，每个任务最多一次
    async fn complete(self: &Arc<Self>, job_id: &JobId) {
        complete_job(&Arc::downgrade(self), job_id).await;
    }

    /// 标记完成已触发，返回产物处理器和任务令牌
    async fn begin_completion(
        &self,
        job_id: &JobId,
    ) -> Option<(CompletionHandler, CancellationToken)> {
        let mut state = self.state.write().await;
        match state.bound_mut(job_id) {
            Some(bound) if !bound.completion_handled && !bound.cancel.is_cancelled() => {
                bound.completion_handled = true;
                Some((self.completion.clone(), bound.cancel.clone()))
            }
            _ => {
                tracing::debug!(job_id = %job_id, "Completion already handled or job not current");
                None
            }
        }
    }

    async fn finish_completion(
        self: &Arc<Self>,
        job_id: &JobId,
        token: CancellationToken,
        outcome: Result<SavedArtifact, JobError>,
    ) {
        if token.is_cancelled() {
            tracing::debug!(job_id = %job_id, "Ignoring artifact result for cancelled job");
            return;
        }

        match outcome {
            Ok(saved) => {
                tracing::info!(job_id = %job_id, filename = %saved.filename, size = saved.size, "Job completed");
                let message = projector::artifact_saved_message(self.reset_delay);
                if self.publish_for(job_id, message, Some(100.0)).await {
                    self.emit(SessionEvent::ArtifactSaved {
                        job_id: job_id.clone(),
                        filename: saved.filename,
                        size: saved.size,
                    });
                    self.schedule_reset(job_id.clone(), token);
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Artifact retrieval failed");
                if self
                    .publish_for(job_id, ARTIFACT_ERROR_MESSAGE.to_string(), None)
                    .await
                {
                    self.emit(SessionEvent::JobFailed {
                        job_id: job_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn schedule_reset(self: &Arc<Self>, job_id: JobId, token: CancellationToken) {
        let shared = Arc::downgrade(self);
        let delay = self.reset_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.reset_if_current(&job_id).await;
                    }
                }
            }
        });
    }

    async fn reset_if_current(&self, job_id: &JobId) {
        {
            let mut state = self.state.write().await;
            if !state.is_current(job_id) {
                return;
            }
            state.release();
            state.ui = DerivedUiState::default();
        }

        tracing::info!(job_id = %job_id, "Session reset");
        self.emit(SessionEvent::StatusChanged(DerivedUiState::default()));
        self.emit(SessionEvent::SessionReset);
    }
}

/// 产物获取期间不持有会话；会话释放或任务取消后结果被丢弃
async fn complete_job(shared: &Weak<Shared>, job_id: &JobId) {
    let begun = match shared.upgrade() {
        Some(shared) => shared.begin_completion(job_id).await,
        None => None,
    };
    let Some((completion, token)) = begun else {
        return;
    };

    let Some(outcome) = completion.handle(job_id, &token).await else {
        tracing::debug!(job_id = %job_id, "Artifact retrieval abandoned");
        return;
    };
    if let Some(shared) = shared.upgrade() {
        shared.finish_completion(job_id, token, outcome).await;
    }
}

/// 轮询器回调到会话；会话已释放时让轮询器停止
struct SessionSink {
    shared: Weak<Shared>,
}

#[async_trait]
impl PollSink for SessionSink {
    async fn observe(&self, job_id: &JobId, observation: Observation) -> TickControl {
        match self.shared.upgrade() {
            Some(shared) => shared.apply(job_id, observation).await,
            None => TickControl::Stop,
        }
    }

    async fn complete(&self, job_id: &JobId) {
        complete_job(&self.shared, job_id).await;
    }
}
