//! 测试用的脚本化客户端、记录型接收方与保存器。

use crate::{
    client::JobClient,
    completion::SaveTrigger,
    error::{JobError, SubmitFailure},
    poller::{PollSink, TickControl},
    types::{Artifact, JobId, JobParameters, JobState, Observation, StatusSnapshot},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

/// 一次状态查询的脚本结果，队列只剩最后一项时重复返回它
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Ok(StatusSnapshot),
    Fail(JobError),
    Panic,
}

impl Step {
    pub fn queued(progress: f64) -> Self {
        Self::Ok(StatusSnapshot::new(JobState::Queued, progress))
    }

    pub fn downloading(progress: f64) -> Self {
        Self::Ok(StatusSnapshot::new(JobState::Downloading, progress))
    }

    pub fn completed() -> Self {
        Self::Ok(StatusSnapshot::new(JobState::Completed, 100.0))
    }

    pub fn failed(detail: &str) -> Self {
        Self::Ok(StatusSnapshot::failed(0.0, detail))
    }
}

#[derive(Default)]
struct Script {
    next_id: usize,
    submit_error: Option<JobError>,
    artifact_error: Option<JobError>,
    statuses: HashMap<JobId, VecDeque<Step>>,
    submit_calls: usize,
    status_calls: HashMap<JobId, usize>,
    artifact_calls: HashMap<JobId, usize>,
    in_flight: usize,
    max_in_flight: usize,
}

/// 内存中的 [`JobClient`]，提交返回 job-1、job-2……
pub(crate) struct ScriptedClient {
    script: Mutex<Script>,
    status_delay: Duration,
    artifact_delay: Duration,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            status_delay: Duration::ZERO,
            artifact_delay: Duration::ZERO,
        }
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn with_artifact_delay(mut self, delay: Duration) -> Self {
        self.artifact_delay = delay;
        self
    }

    pub fn script(&self, job: &str, steps: Vec<Step>) {
        self.script
            .lock()
            .unwrap()
            .statuses
            .insert(JobId::new(job), steps.into());
    }

    pub fn fail_submit(&self, err: JobError) {
        self.script.lock().unwrap().submit_error = Some(err);
    }

    pub fn fail_artifact(&self, err: JobError) {
        self.script.lock().unwrap().artifact_error = Some(err);
    }

    pub fn submit_calls(&self) -> usize {
        self.script.lock().unwrap().submit_calls
    }

    pub fn status_calls(&self, job: &str) -> usize {
        let script = self.script.lock().unwrap();
        script
            .status_calls
            .get(&JobId::new(job))
            .copied()
            .unwrap_or(0)
    }

    pub fn artifact_calls(&self, job: &str) -> usize {
        let script = self.script.lock().unwrap();
        script
            .artifact_calls
            .get(&JobId::new(job))
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl JobClient for ScriptedClient {
    async fn submit(&self, parameters: &JobParameters) -> Result<JobId, JobError> {
        let mut script = self.script.lock().unwrap();
        script.submit_calls += 1;
        if let Some(err) = script.submit_error.clone() {
            return Err(err);
        }
        if parameters.url.is_empty() {
            return Err(JobError::submission(SubmitFailure::Rejected, "Missing URL"));
        }
        script.next_id += 1;
        Ok(JobId::new(format!("job-{}", script.next_id)))
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusSnapshot, JobError> {
        let step = {
            let mut script = self.script.lock().unwrap();
            *script.status_calls.entry(job_id.clone()).or_default() += 1;
            let step = match script.statuses.get_mut(job_id) {
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => None,
            };
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            step.unwrap_or_else(|| Step::queued(0.0))
        };

        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        self.script.lock().unwrap().in_flight -= 1;

        match step {
            Step::Ok(snapshot) => Ok(snapshot),
            Step::Fail(err) => Err(err),
            Step::Panic => panic!("scripted status panic"),
        }
    }

    async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact, JobError> {
        let error = {
            let mut script = self.script.lock().unwrap();
            *script.artifact_calls.entry(job_id.clone()).or_default() += 1;
            script.artifact_error.clone()
        };

        if !self.artifact_delay.is_zero() {
            tokio::time::sleep(self.artifact_delay).await;
        }
        if let Some(err) = error {
            return Err(err);
        }
        Ok(Artifact {
            bytes: format!("payload of {job_id}").into_bytes(),
            suggested_filename: format!("{job_id}.mp4"),
        })
    }
}

/// 记录所有 tick 的 [`PollSink`]
#[derive(Default)]
pub(crate) struct RecordingSink {
    observations: Mutex<Vec<Observation>>,
    completions: Mutex<Vec<JobId>>,
    stop: bool,
    complete_delay: Duration,
}

impl RecordingSink {
    /// 第一次观测后就要求停止
    pub fn stopping() -> Self {
        Self {
            stop: true,
            ..Default::default()
        }
    }

    /// `complete` 在返回前先等待 `delay`
    pub fn with_complete_delay(delay: Duration) -> Self {
        Self {
            complete_delay: delay,
            ..Default::default()
        }
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<JobId> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PollSink for RecordingSink {
    async fn observe(&self, _job_id: &JobId, observation: Observation) -> TickControl {
        self.observations.lock().unwrap().push(observation);
        if self.stop {
            TickControl::Stop
        } else {
            TickControl::Continue
        }
    }

    async fn complete(&self, job_id: &JobId) {
        if !self.complete_delay.is_zero() {
            tokio::time::sleep(self.complete_delay).await;
        }
        self.completions.lock().unwrap().push(job_id.clone());
    }
}

/// 把产物留在内存中的 [`SaveTrigger`]
#[derive(Default)]
pub(crate) struct RecordingSaver {
    saved: Mutex<Vec<Artifact>>,
    fail: bool,
    delay: Duration,
}

impl RecordingSaver {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// 每次保存耗时 `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn saved(&self) -> Vec<Artifact> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl SaveTrigger for RecordingSaver {
    async fn save(&self, artifact: &Artifact) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(anyhow!("disk full"));
        }
        self.saved.lock().unwrap().push(artifact.clone());
        Ok(())
    }
}
