use crate::{
    client::JobClient,
    types::{JobId, JobState, Observation},
};
use async_trait::async_trait;
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// 轮询器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    /// 已创建，尚未开始
    Idle,
    /// 定时查询中
    Active,
    /// 已停止，不可恢复
    Stopped,
}

/// 接收方对一次 tick 的回应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    /// 接收方已不再跟踪该任务（例如任务已被替换）
    Stop,
}

/// 轮询结果的接收方
#[async_trait]
pub trait PollSink: Send + Sync {
    /// 每个 tick 调用一次，包括查询失败的 tick
    async fn observe(&self, job_id: &JobId, observation: Observation) -> TickControl;

    /// 观测到 completed 后调用一次；轮询器被取消时该调用会被丢弃
    async fn complete(&self, job_id: &JobId);
}

/// 绑定到单个任务的状态轮询器
///
/// 每个任务 id 对应一个新的轮询器，停止后不会重新启动。
/// 同一任务的查询严格串行：上一次查询处理完之前不会发出下一次。
pub struct StatusPoller {
    job_id: JobId,
    client: Arc<dyn JobClient>,
    interval: Duration,
    cancel: CancellationToken,
    phase: Arc<watch::Sender<PollerPhase>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn new(
        job_id: JobId,
        client: Arc<dyn JobClient>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (phase, _) = watch::channel(PollerPhase::Idle);
        Self {
            job_id,
            client,
            interval: interval.max(Duration::from_millis(1)),
            cancel,
            phase: Arc::new(phase),
            handle: None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn phase(&self) -> PollerPhase {
        *self.phase.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<PollerPhase> {
        self.phase.subscribe()
    }

    /// 开始定时查询，只在 Idle 状态下生效
    pub fn start(&mut self, sink: Arc<dyn PollSink>) {
        if self.phase() != PollerPhase::Idle {
            return;
        }
        self.phase.send_replace(PollerPhase::Active);

        tracing::info!(job_id = %self.job_id, interval_ms = self.interval.as_millis() as u64, "Poller started");
        self.handle = Some(tokio::spawn(run(
            self.job_id.clone(),
            Arc::clone(&self.client),
            self.interval,
            self.cancel.clone(),
            sink,
            Arc::clone(&self.phase),
        )));
    }

    /// 停止轮询，返回后不会再有 tick 触发
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        if self.phase.send_replace(PollerPhase::Stopped) == PollerPhase::Active {
            tracing::info!(job_id = %self.job_id, "Poller stopped");
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    job_id: JobId,
    client: Arc<dyn JobClient>,
    interval: Duration,
    cancel: CancellationToken,
    sink: Arc<dyn PollSink>,
    phase: Arc<watch::Sender<PollerPhase>>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = AssertUnwindSafe(client.fetch_status(&job_id)).catch_unwind() => res,
        };

        let observation = match fetched {
            Ok(Ok(snapshot)) => {
                tracing::debug!(job_id = %job_id, state = %snapshot.state, progress = snapshot.progress, "Status tick");
                Observation::Snapshot(snapshot)
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Status tick failed, polling continues");
                Observation::TrackingFailed
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, "Status fetch panicked, polling continues");
                Observation::TrackingFailed
            }
        };

        let state = observation.state();
        if sink.observe(&job_id, observation).await == TickControl::Stop {
            tracing::debug!(job_id = %job_id, "Sink no longer tracks job");
            break;
        }

        match state {
            Some(JobState::Completed) => {
                // 定时器先停，产物获取不算轮询
                mark_stopped(&phase, &job_id);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(job_id = %job_id, "Completion abandoned after cancellation");
                    }
                    _ = sink.complete(&job_id) => {}
                }
                break;
            }
            Some(JobState::Error) => break,
            _ => {}
        }
    }

    mark_stopped(&phase, &job_id);
}

fn mark_stopped(phase: &watch::Sender<PollerPhase>, job_id: &JobId) {
    if phase.send_replace(PollerPhase::Stopped) == PollerPhase::Active {
        tracing::info!(job_id = %job_id, "Poller stopped");
    }
}
