use crate::{
    poller::{PollerPhase, StatusPoller},
    types::{DerivedUiState, Job, JobId},
};
use tokio_util::sync::CancellationToken;

/// 当前绑定的任务及其轮询器
pub(crate) struct BoundJob {
    pub job: Job,
    pub poller: StatusPoller,
    /// 任务级取消令牌，覆盖轮询器和延迟重置
    pub cancel: CancellationToken,
    /// 产物获取已触发，防止重复的 completed 快照再次获取
    pub completion_handled: bool,
}

impl BoundJob {
    pub fn new(job: Job, poller: StatusPoller, cancel: CancellationToken) -> Self {
        Self {
            job,
            poller,
            cancel,
            completion_handled: false,
        }
    }

    fn teardown(mut self) -> JobId {
        self.cancel.cancel();
        self.poller.stop();
        self.job.id
    }
}

/// 会话的可变状态，只由 `JobSession` 持有
#[derive(Default)]
pub(crate) struct PollSession {
    pub current: Option<BoundJob>,
    pub ui: DerivedUiState,
}

impl PollSession {
    pub fn is_current(&self, job_id: &JobId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|bound| bound.job.id == *job_id)
    }

    pub fn bound_mut(&mut self, job_id: &JobId) -> Option<&mut BoundJob> {
        self.current
            .as_mut()
            .filter(|bound| bound.job.id == *job_id)
    }

    pub fn is_polling(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|bound| bound.poller.phase() == PollerPhase::Active)
    }

    /// 解除当前任务：取消令牌并停止轮询器，返回被解除的任务 id
    pub fn release(&mut self) -> Option<JobId> {
        self.current.take().map(BoundJob::teardown)
    }
}
