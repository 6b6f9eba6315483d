use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::error::ExecutionError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 4000;
pub const TRUNCATION_MARKER: &str = "\n... Output truncated.";

const SCRIPT_NAME: &str = "script.py";
const CONTAINER_SCRIPT_PATH: &str = "/sandbox/script.py";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    /// Runs the host interpreter directly.
    Local { python: String },
    /// Runs the interpreter inside a throwaway container with networking disabled.
    Docker {
        image: String,
        runtime: Option<String>,
    },
}

impl Runtime {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Docker { .. } => "docker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub runtime: Runtime,
    pub timeout: Duration,
    pub max_output_chars: usize,
    /// Parent directory for per-run scratch directories. `None` uses the system temp dir.
    pub scratch_root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: Runtime::Local {
                python: "python3".to_owned(),
            },
            timeout: DEFAULT_TIMEOUT,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            scratch_root: None,
        }
    }
}

#[derive(Debug)]
pub struct ExecutionResult {
    pub output: String,
    pub truncated: bool,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    fn completed(output: String, max_chars: usize) -> Self {
        let (output, truncated) = truncate_output(output, max_chars);
        Self {
            output,
            truncated,
            error: None,
        }
    }

    fn failed(error: ExecutionError) -> Self {
        Self {
            output: String::new(),
            truncated: false,
            error: Some(error),
        }
    }

    /// Text handed back to the user: captured output, or a generic error line.
    pub fn render(&self) -> String {
        match &self.error {
            Some(err) => format!("Error: {err}"),
            None => self.output.clone(),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, code: &str) -> ExecutionResult;
}

pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn run(&self, code: &str) -> Result<String, ExecutionError> {
        let unit = ExecutionUnit::create(code, self.config.scratch_root.as_deref())
            .map_err(ExecutionError::Artifact)?;
        let container = match &self.config.runtime {
            Runtime::Docker { .. } => Some(format!("pyrelay-{}", Uuid::new_v4().simple())),
            Runtime::Local { .. } => None,
        };
        let mut command = self.command_for(&unit, container.as_deref());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(ExecutionError::Launch)?;
        debug!(pid = child.id(), "interpreter started");

        let limit = capture_limit(self.config.max_output_chars);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            let (stdout, stderr, status) = tokio::join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                child.wait()
            );
            status?;
            Ok::<_, io::Error>((stdout?, stderr?))
        };

        let outcome = tokio::time::timeout(self.config.timeout, collect).await;
        match outcome {
            Ok(Ok((stdout, stderr))) => {
                let captured = if stdout.is_empty() { stderr } else { stdout };
                Ok(String::from_utf8_lossy(&captured).into_owned())
            }
            Ok(Err(err)) => Err(ExecutionError::Collect(err)),
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    debug!(error = %err, "interpreter already exited");
                }
                if let Some(name) = container.as_deref() {
                    remove_container(name).await;
                }
                Err(ExecutionError::Timeout(self.config.timeout))
            }
        }
    }

    fn command_for(&self, unit: &ExecutionUnit, container: Option<&str>) -> Command {
        match &self.config.runtime {
            Runtime::Local { python } => {
                let mut command = Command::new(python);
                command.arg("-I").arg(&unit.script).current_dir(unit.dir.path());
                command
            }
            Runtime::Docker { image, runtime } => {
                let mut command = Command::new("docker");
                command
                    .arg("run")
                    .arg("--rm")
                    .arg("-i")
                    .arg("--network=none");
                if let Some(runtime) = runtime {
                    command.arg(format!("--runtime={runtime}"));
                }
                if let Some(name) = container {
                    command.arg("--name").arg(name);
                }
                command
                    .arg("-v")
                    .arg(format!(
                        "{}:{CONTAINER_SCRIPT_PATH}:ro",
                        unit.script.display()
                    ))
                    .arg(image)
                    .arg("python3")
                    .arg("-I")
                    .arg(CONTAINER_SCRIPT_PATH);
                command
            }
        }
    }
}

#[async_trait]
impl Executor for PythonSandbox {
    async fn execute(&self, code: &str) -> ExecutionResult {
        let span = info_span!(
            "execute",
            run_id = %Uuid::new_v4(),
            runtime = self.config.runtime.label()
        );
        async {
            match self.run(code).await {
                Ok(output) => {
                    let result = ExecutionResult::completed(output, self.config.max_output_chars);
                    debug!(
                        output_chars = result.output.chars().count(),
                        truncated = result.truncated,
                        "execution finished"
                    );
                    result
                }
                Err(err) => {
                    warn!(error = %err, "execution failed");
                    ExecutionResult::failed(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Script artifact for a single run. Dropping it deletes the directory and the script.
struct ExecutionUnit {
    dir: TempDir,
    script: PathBuf,
}

impl ExecutionUnit {
    fn create(code: &str, root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pyrelay-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let script = dir.path().join(SCRIPT_NAME);
        fs::write(&script, code)?;
        Ok(Self { dir, script })
    }
}

async fn remove_container(name: &str) {
    let status = Command::new("docker")
        .arg("rm")
        .arg("-f")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(err) = status {
        warn!(container = name, error = %err, "failed to remove timed out container");
    }
}

/// Bytes that always hold more than `max_chars` characters, so overflow stays detectable.
fn capture_limit(max_chars: usize) -> u64 {
    (max_chars as u64).saturating_mul(4).saturating_add(1)
}

/// Keeps at most `limit` bytes of `reader` and discards the rest, so the child never
/// blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: u64) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut captured = Vec::new();
    (&mut reader).take(limit).read_to_end(&mut captured).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(captured)
}

/// Keeps the first `max_chars` characters and appends [`TRUNCATION_MARKER`] when cut.
pub fn truncate_output(mut text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => {
            text.truncate(end);
            text.push_str(TRUNCATION_MARKER);
            (text, true)
        }
        None => (text, false),
    }
}
