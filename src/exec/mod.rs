// src/exec/mod.rs

//! Uniform subprocess facade (spec §4.2).
//!
//! Every subprocess this crate spawns goes through a single
//! [`CommandSpec`] value rendered once into a `std::process::Command` by
//! [`CommandSpec::render`]. The user-switch/escalation step is a pure
//! transformation on that value (`as_root`/`as_user`), matching the
//! "Ad-hoc subprocess composition" redesign note: collapse argv/env/cwd
//! composition into one value instead of threading bash string-building
//! through each call site, the way `bootstrap/base.rs`'s
//! `run_shell_command` did in the teacher.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::error::{Error, Result};

/// Privilege-escalation prefix used by `run_as_root`. Kept configurable
/// (not a hardcoded `Vec`) so tests can swap in a no-op.
pub const DEFAULT_ESCALATION: &[&str] = &["sudo", "--"];

#[derive(Debug, Clone)]
pub enum ScriptBody {
    /// Concatenated verbatim, without shell-quoting, exactly as received.
    Argv(Vec<String>),
    /// Flattened once and handed to `bash -c`.
    Shell(String),
}

/// A fully-specified subprocess invocation, rendered exactly once.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub capture: bool,
    pub attach_tty: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            capture: true,
            attach_tty: false,
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
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn inherit_stdio(mut self) -> Self {
        self.capture = false;
        self
    }

    pub fn attach_tty(mut self, attach: bool) -> Self {
        self.attach_tty = attach;
        self
    }

    /// Wrap with the privilege-escalation prefix.
    pub fn escalated(self, escalation: &[&str]) -> Self {
        let mut spec = CommandSpec::new(escalation[0]);
        spec.args = escalation[1..]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(self.program.clone()))
            .chain(self.args.clone())
            .collect();
        spec.env = self.env;
        spec.cwd = self.cwd;
        spec.capture = self.capture;
        spec.attach_tty = self.attach_tty;
        spec
    }

    /// Wrap with a user-switch (`runuser -u <user> --`).
    pub fn as_user(self, user: &str) -> Self {
        let mut spec = CommandSpec::new("runuser");
        spec.args = vec!["-u".to_string(), user.to_string(), "--".to_string()]
            .into_iter()
            .chain(std::iter::once(self.program.clone()))
            .chain(self.args.clone())
            .collect();
        spec.env = self.env;
        spec.cwd = self.cwd;
        spec.capture = self.capture;
        spec.attach_tty = self.attach_tty;
        spec
    }

    fn render(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if self.capture && !self.attach_tty {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        cmd
    }

    pub fn run(&self) -> Result<Output> {
        debug!(program = %self.program, args = ?self.args, "running subprocess");
        let output = self
            .render()
            .output()
            .map_err(|e| Error::io(PathBuf::from(&self.program), e))?;
        if !output.status.success() {
            return Err(Error::subprocess_failed(
                &self.program,
                &self.args,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output)
    }

    pub fn run_allow_failure(&self) -> Result<Output> {
        debug!(program = %self.program, args = ?self.args, "running subprocess (failure allowed)");
        self.render()
            .output()
            .map_err(|e| Error::io(PathBuf::from(&self.program), e))
    }
}

/// Caller identity a command runs as, mirroring spec §4.2's three
/// operations (`run as caller`/`run as root`/`run as user`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAs<'a> {
    Caller,
    Root,
    User(&'a str),
}

/// Facade entry point: run `program args…` as `identity`, wrapping the
/// script body per spec §4.2. A caller who is already root and targets
/// `User(name)` gets a plain switch; a non-root caller targeting a
/// different user gets escalation composed with the switch.
pub struct Exec {
    pub escalation: Vec<String>,
    pub caller_is_root: bool,
}

impl Default for Exec {
    fn default() -> Self {
        Exec {
            escalation: DEFAULT_ESCALATION.iter().map(|s| s.to_string()).collect(),
            caller_is_root: caller_is_root(),
        }
    }
}

/// Avoids a dependency on `nix`/`libc` for a single syscall: shells out to
/// `id -u`, consistent with the rest of this crate treating privilege
/// checks as an external-tool concern (spec §6).
fn caller_is_root() -> bool {
    Command::new("id")
        .arg("-u")
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(false)
}

impl Exec {
    pub fn build(&self, program: impl Into<String>, as_: RunAs) -> CommandSpec {
        let spec = CommandSpec::new(program);
        self.apply(spec, as_)
    }

    pub fn apply(&self, spec: CommandSpec, as_: RunAs) -> CommandSpec {
        match as_ {
            RunAs::Caller => spec,
            RunAs::Root => {
                if self.caller_is_root {
                    spec
                } else {
                    let refs: Vec<&str> = self.escalation.iter().map(|s| s.as_str()).collect();
                    spec.escalated(&refs)
                }
            }
            RunAs::User(user) => {
                if self.caller_is_root {
                    spec.as_user(user)
                } else {
                    let refs: Vec<&str> = self.escalation.iter().map(|s| s.as_str()).collect();
                    spec.as_user(user).escalated(&refs)
                }
            }
        }
    }

    /// Build a single `bash -c "<script>"` invocation. Exactly one shell
    /// is ever spawned; a `ScriptBody::Argv` is joined with spaces but not
    /// re-quoted (per spec §4.2, "concatenated without shell-quoting").
    pub fn shell_command(body: ScriptBody) -> CommandSpec {
        let script = match body {
            ScriptBody::Argv(parts) => parts.join(" "),
            ScriptBody::Shell(s) => s,
        };
        CommandSpec::new("bash").arg("-c").arg(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_run_is_untouched() {
        let exec = Exec {
            escalation: vec!["sudo".into(), "--".into()],
            caller_is_root: false,
        };
        let spec = exec.build("echo", RunAs::Caller).arg("hi");
        assert_eq!(spec.program, "echo");
        assert_eq!(spec.args, vec!["hi".to_string()]);
    }

    #[test]
    fn non_root_caller_escalates_for_root() {
        let exec = Exec {
            escalation: vec!["sudo".into(), "--".into()],
            caller_is_root: false,
        };
        let spec = exec.build("pacstrap", RunAs::Root).arg("/chroot");
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.args, vec!["--", "pacstrap", "/chroot"]);
    }

    #[test]
    fn root_caller_skips_escalation_for_root() {
        let exec = Exec {
            escalation: vec!["sudo".into(), "--".into()],
            caller_is_root: true,
        };
        let spec = exec.build("pacstrap", RunAs::Root);
        assert_eq!(spec.program, "pacstrap");
    }

    #[test]
    fn non_root_caller_composes_escalation_and_switch() {
        let exec = Exec {
            escalation: vec!["sudo".into(), "--".into()],
            caller_is_root: false,
        };
        let spec = exec.build("makepkg", RunAs::User("builder"));
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.args[0], "--");
        assert_eq!(spec.args[1], "runuser");
    }

    #[test]
    fn shell_body_is_single_bash_invocation() {
        let spec = Exec::shell_command(ScriptBody::Shell("echo hi && echo bye".into()));
        assert_eq!(spec.program, "bash");
        assert_eq!(spec.args[0], "-c");
        assert_eq!(spec.args[1], "echo hi && echo bye");
    }

    #[test]
    fn argv_body_joins_without_requoting() {
        let spec = Exec::shell_command(ScriptBody::Argv(vec![
            "cd".into(),
            "/tmp".into(),
            "&&".into(),
            "make".into(),
        ]));
        assert_eq!(spec.args[1], "cd /tmp && make");
    }
}
