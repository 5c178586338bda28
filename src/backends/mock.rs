//! In-memory [`Executor`] test double. Only compiled under `cfg(test)` or
//! the `testing` feature, mirroring the teacher's own pattern of shipping
//! lightweight test doubles alongside its contract tests rather than a full
//! mocking framework.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};
use crate::executor::{CommandOutput, CommandSpec, Executor, Mount, ProcessHandle};

/// A scripted response keyed by the exact joined argument list
/// (`args.join(" ")`). Any command without a matching entry succeeds with
/// empty output, which keeps most pipeline tests free of boilerplate.
#[derive(Debug, Default)]
pub struct MockExecutor {
    files: BTreeMap<String, Vec<u8>>,
    modes: BTreeMap<String, u32>,
    mounts: Vec<Mount>,
    scripted: BTreeMap<String, CommandOutput>,
    commands: Vec<CommandSpec>,
    exists: bool,
    running: bool,
    deleted: bool,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self { exists: true, running: true, ..Default::default() }
    }

    /// Build a mock representing an instance that doesn't exist yet.
    pub fn absent() -> Self {
        Self { exists: false, running: false, ..Default::default() }
    }

    pub fn seed_file(&mut self, path: &str, content: Vec<u8>) {
        self.files.insert(path.to_string(), content);
    }

    pub fn script(&mut self, args: impl IntoIterator<Item = impl Into<String>>, output: CommandOutput) {
        let key: Vec<String> = args.into_iter().map(Into::into).collect();
        self.scripted.insert(key.join(" "), output);
    }

    pub fn script_ok(&mut self, args: impl IntoIterator<Item = impl Into<String>>, stdout: &str) {
        self.script(
            args,
            CommandOutput { exit_code: Some(0), stdout: stdout.to_string(), stderr: String::new() },
        );
    }

    pub fn script_fail(&mut self, args: impl IntoIterator<Item = impl Into<String>>, exit_code: i32, stderr: &str) {
        self.script(
            args,
            CommandOutput { exit_code: Some(exit_code), stdout: String::new(), stderr: stderr.to_string() },
        );
    }

    pub fn file_contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|v| v.as_slice())
    }

    pub fn file_mode(&self, path: &str) -> Option<u32> {
        self.modes.get(path).copied()
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn command_was_run(&self, needle: &str) -> bool {
        self.commands.iter().any(|c| c.args.join(" ").contains(needle))
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn set_exists(&mut self, value: bool) {
        self.exists = value;
    }

    pub fn set_running(&mut self, value: bool) {
        self.running = value;
    }

    pub fn was_deleted(&self) -> bool {
        self.deleted
    }
}

impl Executor for MockExecutor {
    fn execute_run(&mut self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.commands.push(spec.clone());

        let output = if spec.args.first().map(String::as_str) == Some("test") && spec.args.get(1).map(String::as_str) == Some("-f") {
            let path = spec.args.get(2).cloned().unwrap_or_default();
            let ok = self.files.contains_key(&path);
            CommandOutput {
                exit_code: Some(if ok { 0 } else { 1 }),
                stdout: String::new(),
                stderr: String::new(),
            }
        } else if spec.args.first().map(String::as_str) == Some("cat") && spec.args.len() == 2 {
            let path = &spec.args[1];
            match self.files.get(path) {
                Some(bytes) => CommandOutput {
                    exit_code: Some(0),
                    stdout: String::from_utf8_lossy(bytes).to_string(),
                    stderr: String::new(),
                },
                None => CommandOutput { exit_code: Some(1), stdout: String::new(), stderr: "No such file".into() },
            }
        } else {
            let key = spec.args.join(" ");
            self.scripted
                .get(&key)
                .cloned()
                .unwrap_or(CommandOutput { exit_code: Some(0), stdout: String::new(), stderr: String::new() })
        };

        if spec.check && !output.success() {
            return Err(Error::backend(
                format!("command failed: {}", spec.args.join(" ")),
                Some(crate::error::details_from_command(&spec.args, output.exit_code, &output.stdout, &output.stderr)),
            ));
        }
        Ok(output)
    }

    fn execute_popen(&mut self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        self.commands.push(spec.clone());
        let key = spec.args.join(" ");
        let output = self
            .scripted
            .get(&key)
            .cloned()
            .unwrap_or(CommandOutput { exit_code: Some(0), stdout: String::new(), stderr: String::new() });
        Ok(Box::new(MockProcessHandle::new(spec.args.clone(), output, spec.check)))
    }

    fn push_file(&mut self, host_path: &str, dest_path: &str) -> Result<()> {
        let bytes = std::fs::read(host_path).map_err(|err| Error::Io { path: host_path.into(), source: err })?;
        self.files.insert(dest_path.to_string(), bytes);
        self.modes.insert(dest_path.to_string(), 0o644);
        Ok(())
    }

    fn push_file_io(&mut self, dest_path: &str, content: &[u8], mode: u32, _owner_user: &str, _owner_group: &str) -> Result<()> {
        self.files.insert(dest_path.to_string(), content.to_vec());
        self.modes.insert(dest_path.to_string(), mode);
        Ok(())
    }

    fn pull_file(&mut self, src_path: &str, host_path: &str) -> Result<()> {
        let bytes = self
            .files
            .get(src_path)
            .ok_or_else(|| Error::backend(format!("source {src_path} does not exist"), None))?;
        std::fs::write(host_path, bytes).map_err(|err| Error::Io { path: host_path.into(), source: err })
    }

    fn mount(&mut self, mount: &Mount) -> Result<()> {
        if !self.mounts.iter().any(|m| m.target == mount.target && m.host_source == mount.host_source) {
            self.mounts.push(mount.clone());
        }
        Ok(())
    }

    fn unmount(&mut self, target: &str) -> Result<()> {
        self.mounts.retain(|m| m.target != target);
        Ok(())
    }

    fn unmount_all(&mut self) -> Result<()> {
        self.mounts.clear();
        Ok(())
    }

    fn exists(&mut self) -> Result<bool> {
        Ok(self.exists)
    }

    fn is_running(&mut self) -> Result<bool> {
        Ok(self.running)
    }

    fn start(&mut self) -> Result<()> {
        self.exists = true;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, _delay_mins: u32) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn delete(&mut self, _force: bool) -> Result<()> {
        self.exists = false;
        self.running = false;
        self.deleted = true;
        self.files.clear();
        self.mounts.clear();
        Ok(())
    }
}

/// Streaming handle backing [`MockExecutor::execute_popen`]. The scripted
/// output is already known at spawn time, so "streaming" just means the
/// lines are handed out one at a time instead of all at once.
struct MockProcessHandle {
    args: Vec<String>,
    stdout_lines: VecDeque<String>,
    stderr_lines: VecDeque<String>,
    output: CommandOutput,
    check: bool,
}

impl MockProcessHandle {
    fn new(args: Vec<String>, output: CommandOutput, check: bool) -> Self {
        let stdout_lines = output.stdout.lines().map(str::to_string).collect();
        let stderr_lines = output.stderr.lines().map(str::to_string).collect();
        Self { args, stdout_lines, stderr_lines, output, check }
    }
}

impl ProcessHandle for MockProcessHandle {
    fn read_stdout_line(&mut self) -> Result<Option<String>> {
        Ok(self.stdout_lines.pop_front())
    }

    fn read_stderr_line(&mut self) -> Result<Option<String>> {
        Ok(self.stderr_lines.pop_front())
    }

    fn wait(&mut self) -> Result<CommandOutput> {
        if self.check && !self.output.success() {
            return Err(Error::backend(
                format!("command failed: {}", self.args.join(" ")),
                Some(crate::error::details_from_command(&self.args, self.output.exit_code, &self.output.stdout, &self.output.stderr)),
            ));
        }
        Ok(self.output.clone())
    }

    fn kill(&mut self) -> Result<()> {
        Ok(())
    }
}
