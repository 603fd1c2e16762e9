//! Sandbox Runner - one command, one isolated container, one outcome
//!
//! **Core Responsibility:**
//! Execute exactly one (command, stdin, limits) triple inside a fresh
//! container and report what happened as an `ExecutionOutcome`.
//!
//! **Critical Architectural Boundary:**
//! - Sandbox knows HOW to isolate and measure
//! - Sandbox does NOT compare output or grade anything
//! - Timeout / OOM / crash are outcomes, not errors
//! - `SandboxError` means the isolation itself failed
//!
//! **Enforcement:**
//! A monitor loop samples container memory every `sample_interval` and checks
//! the wall-clock deadline on the same tick. It races the process exit; the
//! loser is dropped. Docker's own memory limit sits slightly above the
//! requested one so the kernel OOM killer is only the backstop.

use crate::error::SandboxError;
use crate::workspace::Scratch;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, InspectContainerOptions,
    KillContainerOptions, ListContainersOptions, LogOutput, MemoryStats, MemoryStatsStats,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, HostConfigLogConfig};
use bollard::Docker;
use futures_util::stream::StreamExt;
use judgebox_common::types::{ExecutionLimits, ExecutionOutcome};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

const MANAGED_LABEL: &str = "judgebox.managed";
const WORKSPACE_MOUNT: &str = "/workspace";
const SCRATCH_MOUNT: &str = "/scratch";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Whether the workspace is writable for this execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Run,
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxRequest<'a> {
    pub image: &'a str,
    pub command: &'a [String],
    pub workspace: &'a Path,
    pub stdin: &'a str,
    pub limits: ExecutionLimits,
    pub phase: Phase,
}

#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn execute(&self, request: SandboxRequest<'_>) -> Result<ExecutionOutcome, SandboxError>;
}

/// One automatic retry on infrastructure failure, never more
pub async fn execute_with_retry(
    runner: &dyn SandboxRunner,
    request: SandboxRequest<'_>,
) -> Result<ExecutionOutcome, SandboxError> {
    match runner.execute(request).await {
        Ok(outcome) => Ok(outcome),
        Err(first) => {
            warn!(error = %first, phase = ?request.phase, "sandbox failure, retrying once");
            runner.execute(request).await
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub sample_interval: Duration,
    pub output_limit_bytes: usize,
    /// Parent for scratch directories (system temp dir if unset)
    pub scratch_root: Option<PathBuf>,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub tmpfs_size_mb: u32,
    pub user: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(50),
            output_limit_bytes: 1024 * 1024,
            scratch_root: None,
            cpu_limit: 1.0,
            pids_limit: 256,
            tmpfs_size_mb: 64,
            user: "65534:65534".to_string(),
        }
    }
}

/// Hard cgroup limit: requested memory plus max(16MB, 10%)
pub fn memory_hard_limit(limits: &ExecutionLimits) -> i64 {
    let requested = limits.memory_bytes();
    let headroom = (requested / 10).max(16 * 1024 * 1024);
    (requested + headroom) as i64
}

/// Shell convention for death by signal: 128 + signal number (1..=64)
fn is_signal_exit(code: i64) -> bool {
    (129..=128 + 64).contains(&code)
}

/// Byte buffer that keeps the first `limit` bytes and discards the rest
#[derive(Debug)]
pub struct CappedBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breach {
    WallClock,
    Memory,
}

enum Race {
    Exited(Result<i64, SandboxError>),
    Breached(Breach),
}

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    removed: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
            removed: false,
        }
    }

    async fn remove(mut self) {
        self.removed = true;
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(&self.container_id, Some(options))
            .await
        {
            warn!(container = %self.container_id, error = %e, "failed to remove container");
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Best-effort cleanup - cannot be async in Drop
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.container_id, "no runtime to remove container");
            return;
        };
        let docker = self.docker.clone();
        let container_id = std::mem::take(&mut self.container_id);
        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container = %container_id, error = %e, "failed to cleanup container");
            }
        });
    }
}

/// Docker-based sandbox
///
/// **Container Rules:**
/// 1. Pulls the language image if not present
/// 2. No network, read-only rootfs, all capabilities dropped,
///    no-new-privileges, pids limit, swap disabled, unprivileged user
/// 3. Workspace at `/workspace` (rw for builds, ro for runs), read-only
///    scratch with the stdin file at `/scratch`, tmpfs `/tmp`
/// 4. Output read from the attach stream, capped per stream
/// 5. Removed explicitly after every execution, and by guard otherwise
pub struct DockerSandbox {
    docker: Docker,
    settings: SandboxSettings,
}

impl DockerSandbox {
    pub fn connect(settings: SandboxSettings) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, settings })
    }

    pub async fn ping(&self) -> Result<(), SandboxError> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Remove containers left behind by a previous process
    pub async fn sweep_orphans(&self) -> Result<usize, SandboxError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        let mut removed = 0;
        for id in containers.into_iter().filter_map(|c| c.id) {
            ContainerGuard::new(&self.docker, id).remove().await;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "swept orphaned sandbox containers");
        }
        Ok(removed)
    }

    /// Ensure Docker image is available (pull if needed)
    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "✓ image cache hit");
            return Ok(());
        }

        warn!(image, "⚠ image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = Box::pin(self.docker.create_image(options, None, None));
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| SandboxError::Image {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        info!(image, "✓ image pulled");
        Ok(())
    }

    fn container_config(&self, request: &SandboxRequest<'_>, scratch: &Path) -> Config<String> {
        let workspace_mode = match request.phase {
            Phase::Build => "rw",
            Phase::Run => "ro",
        };
        let binds = vec![
            format!(
                "{}:{}:{}",
                request.workspace.display(),
                WORKSPACE_MOUNT,
                workspace_mode
            ),
            format!("{}:{}:ro", scratch.display(), SCRATCH_MOUNT),
        ];

        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            "/tmp".to_string(),
            format!("rw,nosuid,size={}m", self.settings.tmpfs_size_mb),
        );

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let hard_limit = memory_hard_limit(&request.limits);

        Config {
            image: Some(request.image.to_string()),
            // stdin comes from the scratch file so the process sees EOF
            entrypoint: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("exec \"$@\" < {}/{}", SCRATCH_MOUNT, Scratch::STDIN_FILE),
                "sh".to_string(),
            ]),
            cmd: Some(request.command.to_vec()),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            user: Some(self.settings.user.clone()),
            env: Some(vec!["HOME=/tmp".to_string()]),
            labels: Some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(binds),
                tmpfs: Some(tmpfs),
                memory: Some(hard_limit),
                memory_swap: Some(hard_limit),
                nano_cpus: Some((self.settings.cpu_limit * 1_000_000_000.0) as i64),
                pids_limit: Some(self.settings.pids_limit),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(true),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                log_config: Some(HostConfigLogConfig {
                    typ: Some("none".to_string()),
                    config: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Read both streams to EOF, then collect the exit status
    async fn drain_and_wait<S>(
        &self,
        container_id: &str,
        output: &mut S,
        stdout: &mut CappedBuffer,
        stderr: &mut CappedBuffer,
    ) -> Result<i64, SandboxError>
    where
        S: futures_util::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Unpin,
    {
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!(container = %container_id, error = %e, "attach stream error");
                    break;
                }
            }
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = Box::pin(self.docker.wait_container(container_id, Some(options)));
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(SandboxError::Runtime(format!(
                "no exit status for container {}",
                container_id
            ))),
        }
    }

    /// Returns the first limit breach; never returns while within limits
    async fn watch_limits(
        &self,
        container_id: &str,
        limits: &ExecutionLimits,
        deadline: Instant,
        peak: &AtomicU64,
    ) -> Breach {
        let limit = limits.memory_bytes();
        let mut ticker = tokio::time::interval(self.settings.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                return Breach::WallClock;
            }
            match tokio::time::timeout_at(deadline, self.sample_memory(container_id)).await {
                Err(_) => return Breach::WallClock,
                Ok(Some(usage)) => {
                    peak.fetch_max(usage, Ordering::Relaxed);
                    if usage > limit {
                        return Breach::Memory;
                    }
                }
                Ok(None) => {}
            }
        }
    }

    async fn sample_memory(&self, container_id: &str) -> Option<u64> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stats = Box::pin(self.docker.stats(container_id, Some(options)));
        match stats.next().await {
            Some(Ok(sample)) => resident_bytes(&sample.memory_stats),
            Some(Err(e)) => {
                debug!(container = %container_id, error = %e, "memory sample failed");
                None
            }
            None => None,
        }
    }

    async fn oom_killed(&self, container_id: &str) -> bool {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                warn!(container = %container_id, error = %e, "inspect failed");
                false
            }
        }
    }
}

/// Resident usage without reclaimable page cache, as `docker stats` reports it
fn resident_bytes(memory: &MemoryStats) -> Option<u64> {
    let usage = memory.usage?;
    let inactive_file = match &memory.stats {
        Some(MemoryStatsStats::V1(v1)) => v1.total_inactive_file,
        Some(MemoryStatsStats::V2(v2)) => v2.inactive_file,
        None => 0,
    };
    Some(usage.saturating_sub(inactive_file))
}

#[async_trait]
impl SandboxRunner for DockerSandbox {
    #[instrument(skip(self, request), fields(image = %request.image, phase = ?request.phase))]
    async fn execute(&self, request: SandboxRequest<'_>) -> Result<ExecutionOutcome, SandboxError> {
        self.ensure_image(request.image).await?;

        let scratch = Scratch::create(self.settings.scratch_root.as_deref(), request.stdin)?;
        let config = self.container_config(&request, scratch.path());
        let name = format!("judgebox-{}", uuid::Uuid::new_v4());

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;
        let container_id = container.id;

        // CRITICAL: guard exists before anything else can fail
        let guard = ContainerGuard::new(&self.docker, container_id.clone());

        let attach = self
            .docker
            .attach_container(
                &container_id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        let mut output = attach.output;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;
        let started = Instant::now();
        let deadline = started + request.limits.wall_clock();

        let mut stdout = CappedBuffer::new(self.settings.output_limit_bytes);
        let mut stderr = CappedBuffer::new(self.settings.output_limit_bytes);
        let peak = AtomicU64::new(0);

        let race = tokio::select! {
            exited = self.drain_and_wait(&container_id, &mut output, &mut stdout, &mut stderr) => Race::Exited(exited),
            breach = self.watch_limits(&container_id, &request.limits, deadline, &peak) => Race::Breached(breach),
        };

        let (exit_code, breach) = match race {
            Race::Exited(status) => (Some(status?), None),
            Race::Breached(breach) => {
                debug!(container = %container_id, ?breach, "limit breached, killing");
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = %container_id, error = %e, "kill failed");
                }
                (None, Some(breach))
            }
        };
        let wall_time = started.elapsed();
        drop(output);

        let oom_killed = self.oom_killed(&container_id).await;
        guard.remove().await;

        let peak_bytes = peak.load(Ordering::Relaxed);
        let timed_out = breach == Some(Breach::WallClock);
        let out_of_memory = breach == Some(Breach::Memory)
            || (!timed_out && (oom_killed || peak_bytes > request.limits.memory_bytes()));
        let crashed = !timed_out && !out_of_memory && exit_code.map_or(false, is_signal_exit);

        let outcome = ExecutionOutcome {
            stdout_truncated: stdout.truncated(),
            stderr_truncated: stderr.truncated(),
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code,
            wall_time_seconds: wall_time.as_secs_f64(),
            peak_memory_megabytes: peak_bytes as f64 / BYTES_PER_MB,
            timed_out,
            out_of_memory,
            crashed,
        };

        info!(
            exit_code = ?outcome.exit_code,
            wall_time_ms = wall_time.as_millis() as u64,
            peak_mb = outcome.peak_memory_megabytes,
            timed_out,
            out_of_memory,
            crashed,
            "execution finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn test_capped_buffer_truncates() {
        let mut buf = CappedBuffer::new(5);
        buf.push(b"abc");
        assert!(!buf.truncated());
        buf.push(b"defg");
        buf.push(b"more");
        assert!(buf.truncated());
        assert_eq!(buf.into_string(), "abcde");
    }

    #[test]
    fn test_capped_buffer_exact_fit() {
        let mut buf = CappedBuffer::new(4);
        buf.push(b"abcd");
        assert!(!buf.truncated());
        assert_eq!(buf.into_string(), "abcd");
    }

    #[test]
    fn test_only_signal_exits_count_as_crashes() {
        assert!(is_signal_exit(139)); // SIGSEGV
        assert!(is_signal_exit(137)); // SIGKILL
        assert!(is_signal_exit(134)); // SIGABRT
        assert!(!is_signal_exit(200)); // sys.exit(200)
        assert!(!is_signal_exit(255));
        assert!(!is_signal_exit(128));
        assert!(!is_signal_exit(1));
        assert!(!is_signal_exit(0));
    }

    #[test]
    fn test_memory_hard_limit_has_headroom() {
        let small = ExecutionLimits::new(1.0, 50);
        assert_eq!(memory_hard_limit(&small), (50 + 16) * 1024 * 1024);
        let large = ExecutionLimits::new(1.0, 1000);
        assert_eq!(memory_hard_limit(&large), 1100 * 1024 * 1024);
    }

    #[test]
    fn test_container_config_is_locked_down() {
        let sandbox = DockerSandbox {
            docker: match Docker::connect_with_local_defaults() {
                Ok(docker) => docker,
                Err(_) => return,
            },
            settings: SandboxSettings::default(),
        };
        let command = vec!["python3".to_string(), "main.py".to_string()];
        let request = SandboxRequest {
            image: "python:3.11-slim",
            command: &command,
            workspace: Path::new("/srv/ws"),
            stdin: "",
            limits: ExecutionLimits::new(2.0, 64),
            phase: Phase::Run,
        };
        let config = sandbox.container_config(&request, Path::new("/srv/scratch"));
        let host = config.host_config.unwrap();

        assert_eq!(config.cmd, Some(command.clone()));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.memory, host.memory_swap);
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        let binds = host.binds.unwrap();
        assert!(binds.contains(&"/srv/ws:/workspace:ro".to_string()));
        assert!(binds.contains(&"/srv/scratch:/scratch:ro".to_string()));
    }

    fn request(command: &[String]) -> SandboxRequest<'_> {
        SandboxRequest {
            image: "python:3.11-slim",
            command,
            workspace: Path::new("/srv/ws"),
            stdin: "",
            limits: ExecutionLimits::default(),
            phase: Phase::Run,
        }
    }

    #[tokio::test]
    async fn test_retry_once_on_sandbox_error() {
        let runner = ScriptedRunner::new().then_fail().then_stdout("ok\n");
        let command = vec!["python3".to_string()];
        let outcome = execute_with_retry(&runner, request(&command)).await.unwrap();
        assert_eq!(outcome.stdout, "ok\n");
        assert_eq!(runner.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_second_failure() {
        let runner = ScriptedRunner::new()
            .then_fail()
            .then_fail()
            .then_stdout("never");
        let command = vec!["python3".to_string()];
        let result = execute_with_retry(&runner, request(&command)).await;
        assert!(matches!(result, Err(SandboxError::Runtime(_))));
        assert_eq!(runner.calls(), 2);
    }
}
