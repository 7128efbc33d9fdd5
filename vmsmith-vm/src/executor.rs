//! Running VBoxManage and classifying what it reports
//!
//! A zero exit status is not enough: some VBoxManage versions print an error
//! banner on stderr and still exit 0, so stderr is matched as well.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;
use vmsmith_core::error::{VmsmithError, VmsmithResult};

/// `VBoxManage: error:` and `VBoxManage.exe: error:` both count.
///
/// The suffix group may be empty, so the bare `VBoxManage: error:` banner on a
/// zero exit is treated as a failure too; older drivers only caught suffixed forms.
static ERROR_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"VBoxManage([.a-z]*): error:").expect("error banner pattern is valid")
});

/// Trait for executing commands - allows mocking in tests
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, program: &Path, args: &[String]) -> Result<CommandOutput, std::io::Error>;
}

/// Everything one invocation produced; each call owns its own buffers
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Default command executor that runs real commands
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn execute(&self, program: &Path, args: &[String]) -> Result<CommandOutput, std::io::Error> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Decide success or failure from exit status and stderr.
///
/// On success the trimmed stdout is returned. Failures carry the trimmed
/// stderr, never stdout.
pub fn classify(output: &CommandOutput) -> VmsmithResult<String> {
    let stdout = output.stdout_trimmed();
    let stderr = output.stderr_trimmed();

    if !output.status.success() {
        return Err(VmsmithError::ToolReported { message: stderr });
    }

    if ERROR_BANNER.is_match(&stderr) {
        return Err(VmsmithError::SilentToolError { message: stderr });
    }

    Ok(stdout)
}

/// Handle on the VBoxManage binary
///
/// The path is fixed for the lifetime of the handle. Cloning shares the
/// executor; no other state is kept between calls.
#[derive(Clone)]
pub struct VBoxManage {
    path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl VBoxManage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_executor(path, Arc::new(SystemCommandExecutor))
    }

    /// Create a handle with a custom command executor (for testing)
    pub fn with_executor(path: impl Into<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            path: path.into(),
            executor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the tool and return its raw output without classification
    pub async fn output(&self, args: &[String]) -> VmsmithResult<CommandOutput> {
        debug!("Executing VBoxManage: {:?}", args);

        let output = self
            .executor
            .execute(&self.path, args)
            .await
            .map_err(|e| VmsmithError::execution(self.path.display().to_string(), e))?;

        debug!("stdout: {}", output.stdout_trimmed());
        debug!("stderr: {}", output.stderr_trimmed());

        Ok(output)
    }

    /// Run the tool and return trimmed stdout, or the classified failure
    pub async fn run(&self, args: &[String]) -> VmsmithResult<String> {
        let output = self.output(args).await?;
        classify(&output)
    }

    /// Run the tool for its side effect only
    pub async fn exec(&self, args: &[String]) -> VmsmithResult<()> {
        self.run(args).await.map(|_| ())
    }
}

impl std::fmt::Debug for VBoxManage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VBoxManage").field("path", &self.path).finish()
    }
}

/// Build an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
