//! Host command execution.
//!
//! Every external program the bootstrap touches (apt-get, docker, systemctl,
//! ufw, fuser, curl, gpg) goes through [`Cmd`] and the [`Host`] trait, so the
//! provisioning steps can be driven against a fake host in tests.
//!
//! ```rust,ignore
//! use feedgen_bootstrap::process::Cmd;
//!
//! let out = Cmd::new("docker").arg("version").allow_fail().run()?;
//! if !out.success() {
//!     println!("docker is not installed");
//! }
//! ```

use anyhow::{bail, Context, Result};
use std::process::Command;

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    error_msg: Option<String>,
    allow_fail: bool,
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Message used instead of the default when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the output for non-zero exits instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Shell-like rendering used in logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Turn a finished command's output into the caller-facing result,
    /// honoring `allow_fail` and `error_msg`.
    pub fn check(&self, output: CmdOutput) -> Result<CmdOutput> {
        if output.success() || self.allow_fail {
            return Ok(output);
        }
        let headline = self
            .error_msg
            .clone()
            .unwrap_or_else(|| format!("`{}` failed", self.command_line()));
        let status = output
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        bail!(
            "{} (exit status {}): {}",
            headline,
            status,
            output.stderr.trim()
        )
    }

    /// Run the command on this machine and wait for it.
    pub fn run(&self) -> Result<CmdOutput> {
        tracing::debug!(command = %self.command_line(), "running");
        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .with_context(|| format!("spawning `{}`", self.command_line()))?;

        self.check(CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The machine being provisioned.
pub trait Host {
    /// Execute `cmd`, failing on non-zero exit unless the command allows it.
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput>;

    /// Whether `program` resolves on the host's PATH.
    fn command_exists(&self, program: &str) -> bool;
}

/// The real host this process runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        cmd.run()
    }

    fn command_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    type Responder = Box<dyn Fn(&str) -> CmdOutput>;

    /// Records every command and answers from a scripted responder.
    pub(crate) struct FakeHost {
        pub(crate) history: RefCell<Vec<String>>,
        programs: HashSet<String>,
        responder: Responder,
    }

    impl FakeHost {
        pub(crate) fn new(programs: &[&str], responder: impl Fn(&str) -> CmdOutput + 'static) -> Self {
            Self {
                history: RefCell::new(Vec::new()),
                programs: programs.iter().map(|p| p.to_string()).collect(),
                responder: Box::new(responder),
            }
        }

        /// A host where every command succeeds with empty output.
        pub(crate) fn permissive(programs: &[&str]) -> Self {
            Self::new(programs, |_| CmdOutput::ok(""))
        }

        pub(crate) fn ran(&self, prefix: &str) -> bool {
            self.history.borrow().iter().any(|c| c.starts_with(prefix))
        }

        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.history
                .borrow()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    impl Host for FakeHost {
        fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
            let line = cmd.command_line();
            self.history.borrow_mut().push(line.clone());
            cmd.check((self.responder)(&line))
        }

        fn command_exists(&self, program: &str) -> bool {
            self.programs.contains(program)
        }
    }
}
