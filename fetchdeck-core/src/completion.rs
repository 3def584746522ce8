use crate::{
    client::{DEFAULT_FILENAME, JobClient},
    error::JobError,
    types::{Artifact, JobId},
};
use anyhow::Result;
use async_trait::async_trait;
use fs_err::tokio as fs;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// 平台保存原语：把产物交给用户
#[async_trait]
pub trait SaveTrigger: Send + Sync {
    async fn save(&self, artifact: &Artifact) -> Result<()>;
}

/// 把产物写入本地目录，已存在的文件不会被覆盖
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 第 n 个候选路径：`clip.mp4`、`clip (1).mp4`、`clip (2).mp4`……
    fn candidate(&self, name: &str, n: usize) -> PathBuf {
        if n == 0 {
            return self.dir.join(name);
        }
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        match path.extension() {
            Some(ext) => self
                .dir
                .join(format!("{stem} ({n}).{}", ext.to_string_lossy())),
            None => self.dir.join(format!("{stem} ({n})")),
        }
    }
}

/// 只保留文件名的最后一段，避免写出目标目录
fn sanitize_filename(name: &str) -> String {
    Path::new(name.trim())
        .file_name()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

impl DirectorySaver {
    /// 创建一个独占的临时文件：`.clip.mp4.0.part`、`.clip.mp4.1.part`……
    async fn create_part(&self, name: &str) -> Result<(fs::File, PathBuf)> {
        let mut n = 0;
        loop {
            let path = self.dir.join(format!(".{name}.{n}.part"));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 把写完的临时文件链接到第一个空闲的候选路径
    async fn link_unique(&self, part: &Path, name: &str) -> Result<PathBuf> {
        let mut n = 0;
        loop {
            let path = self.candidate(name, n);
            match fs::hard_link(part, &path).await {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl SaveTrigger for DirectorySaver {
    async fn save(&self, artifact: &Artifact) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let name = sanitize_filename(&artifact.suggested_filename);

        // 最终文件名只在内容完整写入后才出现
        let (mut file, part) = self.create_part(&name).await?;
        let written = async {
            file.write_all(&artifact.bytes).await?;
            file.flush().await
        }
        .await;
        drop(file);

        let linked = match written {
            Ok(()) => self.link_unique(&part, &name).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = fs::remove_file(&part).await {
            tracing::warn!(error = %e, "Failed to remove temporary file");
        }

        let path = linked?;
        tracing::info!(path = %path.display(), size = artifact.bytes.len(), "Artifact saved");
        Ok(())
    }
}

/// 已保存产物的摘要
#[derive(Debug, Clone, PartialEq)]
pub struct SavedArtifact {
    pub filename: String,
    pub size: u64,
}

/// 任务完成后获取产物并保存，每次调用只尝试一次
#[derive(Clone)]
pub struct CompletionHandler {
    client: Arc<dyn JobClient>,
    saver: Arc<dyn SaveTrigger>,
}

impl CompletionHandler {
    pub fn new(client: Arc<dyn JobClient>, saver: Arc<dyn SaveTrigger>) -> Self {
        Self { client, saver }
    }

    /// 获取并保存产物
    ///
    /// # 参数
    /// * `job_id` - 已完成的任务
    /// * `cancel` - 任务的取消令牌
    ///
    /// # 返回
    /// 令牌在保存开始前被取消时返回 `None`，结果应被丢弃
    pub async fn handle(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> Option<Result<SavedArtifact, JobError>> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            res = self.client.fetch_artifact(job_id) => res,
        };
        let artifact = match fetched {
            Ok(artifact) => artifact,
            Err(e) => return Some(Err(e)),
        };
        if cancel.is_cancelled() {
            return None;
        }

        let summary = SavedArtifact {
            filename: artifact.suggested_filename.clone(),
            size: artifact.bytes.len() as u64,
        };
        // 保存一旦开始就在独立任务中跑完，调用方被中止也不会留下半个文件
        let saver = Arc::clone(&self.saver);
        let saving = tokio::spawn(async move { saver.save(&artifact).await });

        Some(match saving.await {
            Ok(Ok(())) => Ok(summary),
            Ok(Err(e)) => Err(JobError::Save(e.to_string())),
            Err(e) => Err(JobError::Save(e.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSaver, ScriptedClient};
    use std::time::Duration;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fetchdeck-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn artifact(name: &str, bytes: &[u8]) -> Artifact {
        Artifact {
            bytes: bytes.to_vec(),
            suggested_filename: name.to_string(),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        let cases = [
            ("clip.mp4", "clip.mp4"),
            ("../../etc/passwd", "passwd"),
            ("/tmp/evil.sh", "evil.sh"),
            ("  spaced name.mp3 ", "spaced name.mp3"),
            ("..", DEFAULT_FILENAME),
            ("", DEFAULT_FILENAME),
        ];
        for (input, expected) in cases {
            assert_eq!(sanitize_filename(input), expected, "{input:?}");
        }
    }

    #[tokio::test]
    async fn test_directory_saver_never_overwrites() -> Result<()> {
        let dir = temp_dir("saver");
        let saver = DirectorySaver::new(&dir);

        saver.save(&artifact("clip.mp4", b"first")).await?;
        saver.save(&artifact("clip.mp4", b"second")).await?;
        saver.save(&artifact("../clip.mp4", b"third")).await?;
        saver.save(&artifact("", b"nameless")).await?;

        assert_eq!(std::fs::read(dir.join("clip.mp4"))?, b"first");
        assert_eq!(std::fs::read(dir.join("clip (1).mp4"))?, b"second");
        assert_eq!(std::fs::read(dir.join("clip (2).mp4"))?, b"third");
        assert_eq!(std::fs::read(dir.join(DEFAULT_FILENAME))?, b"nameless");

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_saver_leaves_no_partial_files() -> Result<()> {
        let dir = temp_dir("parts");
        std::fs::create_dir_all(&dir)?;
        // 上次被打断留下的临时文件
        std::fs::write(dir.join(".clip.mp4.0.part"), b"trunc")?;
        let saver = DirectorySaver::new(&dir);

        saver.save(&artifact("clip.mp4", b"complete")).await?;

        assert_eq!(std::fs::read(dir.join("clip.mp4"))?, b"complete");
        let mut names: Vec<String> = std::fs::read_dir(&dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        names.sort();
        assert_eq!(names, vec![".clip.mp4.0.part", "clip.mp4"]);

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_saves_artifact() {
        let client = Arc::new(ScriptedClient::new());
        let saver = Arc::new(RecordingSaver::default());
        let handler = CompletionHandler::new(client.clone(), saver.clone());

        let saved = handler
            .handle(&JobId::new("job-7"), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(saved.filename, "job-7.mp4");
        assert_eq!(saved.size, "payload of job-7".len() as u64);
        assert_eq!(saver.saved().len(), 1);
        assert_eq!(client.artifact_calls("job-7"), 1);
    }

    #[tokio::test]
    async fn test_handle_artifact_failure_does_not_retry() {
        let client = Arc::new(ScriptedClient::new());
        client.fail_artifact(JobError::ArtifactFetch("HTTP error: 404 Not Found".into()));
        let saver = Arc::new(RecordingSaver::default());
        let handler = CompletionHandler::new(client.clone(), saver.clone());

        let err = handler
            .handle(&JobId::new("job-1"), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, JobError::ArtifactFetch(_)));
        assert_eq!(client.artifact_calls("job-1"), 1);
        assert!(saver.saved().is_empty());
    }

    #[tokio::test]
    async fn test_handle_save_failure() {
        let client = Arc::new(ScriptedClient::new());
        let handler = CompletionHandler::new(client, Arc::new(RecordingSaver::failing()));

        let err = handler
            .handle(&JobId::new("job-1"), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, JobError::Save("disk full".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_fetch_skips_save() {
        let client = Arc::new(ScriptedClient::new().with_artifact_delay(Duration::from_secs(3)));
        let saver = Arc::new(RecordingSaver::default());
        let handler = CompletionHandler::new(client.clone(), saver.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let outcome = handler.handle(&JobId::new("job-1"), &cancel).await;

        assert_eq!(outcome, None);
        assert_eq!(client.artifact_calls("job-1"), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(saver.saved().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_caller_does_not_interrupt_save() {
        let client = Arc::new(ScriptedClient::new());
        let saver = Arc::new(RecordingSaver::slow(Duration::from_secs(2)));
        let handler = CompletionHandler::new(client, saver.clone());

        let task = tokio::spawn(async move {
            handler
                .handle(&JobId::new("job-1"), &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(saver.saved().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let saved = saver.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].bytes, b"payload of job-1");
    }
}
