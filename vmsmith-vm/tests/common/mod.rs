//! Shared test helpers: a scripted VBoxManage stand-in

#![allow(dead_code)]

use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use vmsmith_vm::{CommandExecutor, CommandOutput, DriverConfig, VBoxManage, VBoxManageDriver};

/// One canned reply from the fake tool
#[derive(Debug, Clone)]
pub enum Reply {
    Output {
        code: i32,
        stdout: String,
        stderr: String,
    },
    SpawnError,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Output {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Reply::Output {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn silent_error(stderr: &str) -> Self {
        Reply::Output {
            code: 0,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Replays queued replies in order and records every argument vector.
///
/// Once the queue is drained, `fallback` answers every further call.
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Self::with_fallback(replies, Reply::ok(""))
    }

    pub fn with_fallback(replies: impl IntoIterator<Item = Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, _program: &Path, args: &[String]) -> Result<CommandOutput, std::io::Error> {
        self.calls
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "Lock poisoned"))?
            .push(args.to_vec());

        let reply = self
            .replies
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "Lock poisoned"))?
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Output { code, stdout, stderr } => Ok(CommandOutput {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.into_bytes(),
                stderr: stderr.into_bytes(),
            }),
            Reply::SpawnError => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            )),
        }
    }
}

/// Driver wired to the scripted executor with fast test timings
pub fn driver(executor: &Arc<ScriptedExecutor>) -> VBoxManageDriver {
    driver_with_config(executor, DriverConfig::test())
}

pub fn driver_with_config(executor: &Arc<ScriptedExecutor>, config: DriverConfig) -> VBoxManageDriver {
    let tool = VBoxManage::with_executor("/usr/bin/VBoxManage", executor.clone());
    VBoxManageDriver::with_tool(tool, config)
}

/// Build a `Vec<String>` from string literals
pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
