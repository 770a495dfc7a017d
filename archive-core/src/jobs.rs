//! 外部进程（录制、转封装、缩略图）监管

use async_trait::async_trait;
use common::{ArchiveError, JobStatus, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command as AsyncCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 20;

/// 任务名称
pub fn capture_job_name(basename: &str) -> String {
    format!("capture_{}", basename)
}

pub fn convert_job_name(basename: &str) -> String {
    format!("convert_{}", basename)
}

pub fn contact_sheet_job_name(basename: &str) -> String {
    format!("contact_sheet_{}", basename)
}

/// 启动参数
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            env: Vec::new(),
            cwd: None,
        }
    }
}

/// 进程退出信息
#[derive(Debug, Clone)]
pub struct JobExit {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr_tail: Vec<String>,
}

/// 进程监管接口
#[async_trait]
pub trait JobSupervisor: Send + Sync {
    /// 查询任务状态，未知任务视为已停止
    async fn status(&self, name: &str) -> JobStatus;

    /// 启动任务
    async fn start(&self, spec: JobSpec) -> Result<()>;

    /// 等待任务结束
    async fn wait(&self, name: &str) -> Result<JobExit>;

    /// 进度百分比
    fn progress(&self, name: &str) -> Option<f64>;
}

#[derive(Debug, Default)]
struct ProgressState {
    total_seconds: Option<f64>,
    percent: Option<f64>,
}

struct JobEntry {
    child: Mutex<Child>,
    progress: Arc<StdMutex<ProgressState>>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
}

/// 基于 tokio::process 的默认实现
#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    jobs: Arc<DashMap<String, Arc<JobEntry>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Option<Arc<JobEntry>> {
        self.jobs.get(name).map(|e| e.value().clone())
    }
}

#[async_trait]
impl JobSupervisor for ProcessSupervisor {
    async fn status(&self, name: &str) -> JobStatus {
        let Some(entry) = self.entry(name) else {
            return JobStatus::Stopped;
        };

        // 有人在 wait 时锁被占用，进程必然仍在运行
        let Ok(mut child) = entry.child.try_lock() else {
            return JobStatus::Running;
        };

        match child.try_wait() {
            Ok(None) => JobStatus::Running,
            Ok(Some(_)) => JobStatus::Stopped,
            Err(e) => {
                warn!("Failed to query job {}: {}", name, e);
                JobStatus::Error
            }
        }
    }

    async fn start(&self, spec: JobSpec) -> Result<()> {
        if self.status(&spec.name).await.is_running() {
            return Err(ArchiveError::JobFailed {
                job: spec.name,
                reason: "already running".to_string(),
            });
        }

        let mut cmd = AsyncCommand::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| ArchiveError::JobFailed {
            job: spec.name.clone(),
            reason: format!("Failed to execute {}: {}", spec.program, e),
        })?;

        let progress = Arc::new(StdMutex::new(ProgressState::default()));
        let stderr_tail = Arc::new(StdMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        if let Some(stderr) = child.stderr.take() {
            let progress = progress.clone();
            let tail = stderr_tail.clone();
            let job_name = spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut state) = progress.lock() {
                        update_progress(&mut state, &line);
                    }
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
                debug!("stderr closed for job {}", job_name);
            });
        }

        info!("Started job {} ({} {})", spec.name, spec.program, spec.args.join(" "));
        self.jobs.insert(
            spec.name,
            Arc::new(JobEntry {
                child: Mutex::new(child),
                progress,
                stderr_tail,
            }),
        );
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<JobExit> {
        let entry = self.entry(name).ok_or_else(|| ArchiveError::JobFailed {
            job: name.to_string(),
            reason: "no such job".to_string(),
        })?;

        let status = entry.child.lock().await.wait().await?;
        self.jobs.remove(name);

        let stderr_tail = entry
            .stderr_tail
            .lock()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();

        info!("Job {} exited with {}", name, status);
        Ok(JobExit {
            success: status.success(),
            code: status.code(),
            stderr_tail,
        })
    }

    fn progress(&self, name: &str) -> Option<f64> {
        let entry = self.entry(name)?;
        let state = entry.progress.lock().ok()?;
        state.percent
    }
}

/// 解析 ffmpeg 的 "Duration:" 与 "time=" 输出，只计算百分比
fn update_progress(state: &mut ProgressState, line: &str) {
    if let Some(rest) = line.trim_start().strip_prefix("Duration:") {
        if let Some(ts) = rest.split(',').next() {
            state.total_seconds = parse_timestamp(ts.trim());
        }
        return;
    }

    if let Some(idx) = line.find("time=") {
        let ts = line[idx + 5..].split_whitespace().next().unwrap_or("");
        if let (Some(current), Some(total)) = (parse_timestamp(ts), state.total_seconds) {
            if total > 0.0 {
                state.percent = Some((current / total * 100.0).clamp(0.0, 100.0));
            }
        }
    }
}

/// hh:mm:ss.xx → 秒
fn parse_timestamp(ts: &str) -> Option<f64> {
    let mut parts = ts.split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(h * 3600.0 + m * 60.0 + s)
}
