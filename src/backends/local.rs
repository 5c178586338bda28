//! A host-process-backed demo [`Executor`]. Stands in for "the concrete
//! backend command wrappers", which spec.md explicitly places out of scope;
//! this implementation just runs commands directly on the current host, the
//! same role the original project's `HostExecutor`/`LoopbackExecutor`
//! played for local development and the CLI demo.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};

use crate::error::{Error, Result};
use crate::executor::{CommandOutput, CommandSpec, Executor, Mount, ProcessHandle};

/// Runs commands directly on the host inside a scratch root, rather than
/// against a container or VM. Useful for exercising the Base pipeline and
/// the CLI without a real backend installed.
pub struct LocalExecutor {
    root: PathBuf,
    mounts: Vec<Mount>,
    running: bool,
}

impl LocalExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| Error::Io { path: root.clone(), source: err })?;
        Ok(Self { root, mounts: Vec::new(), running: false })
    }

    fn instance_path(&self, instance_absolute_path: &str) -> PathBuf {
        let relative = instance_absolute_path.trim_start_matches('/');
        self.root.join(relative)
    }
}

impl Executor for LocalExecutor {
    fn execute_run(&mut self, spec: &CommandSpec) -> Result<CommandOutput> {
        let Some((program, args)) = spec.args.split_first() else {
            return Err(Error::configuration("empty command"));
        };

        let mut command = Command::new(program);
        command.args(args);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        if let Some(cwd) = &spec.cwd {
            command.current_dir(self.instance_path(cwd));
        }

        if let Some(env) = &spec.env {
            for (key, value) in env {
                match value {
                    Some(v) => {
                        command.env(key, v);
                    }
                    None => {
                        command.env_remove(key);
                    }
                }
            }
        }

        let output = command
            .output()
            .map_err(|err| Error::backend(format!("failed to spawn {program}"), Some(err.to_string())))?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if spec.check && !result.success() {
            return Err(Error::backend(
                format!("command failed: {}", spec.args.join(" ")),
                Some(crate::error::details_from_command(&spec.args, result.exit_code, &result.stdout, &result.stderr)),
            ));
        }

        Ok(result)
    }

    fn execute_popen(&mut self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        let Some((program, args)) = spec.args.split_first() else {
            return Err(Error::configuration("empty command"));
        };

        let mut command = Command::new(program);
        command.args(args);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        if let Some(cwd) = &spec.cwd {
            command.current_dir(self.instance_path(cwd));
        }

        if let Some(env) = &spec.env {
            for (key, value) in env {
                match value {
                    Some(v) => {
                        command.env(key, v);
                    }
                    None => {
                        command.env_remove(key);
                    }
                }
            }
        }

        let mut child = command
            .spawn()
            .map_err(|err| Error::backend(format!("failed to spawn {program}"), Some(err.to_string())))?;
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take().map(BufReader::new);

        Ok(Box::new(LocalProcessHandle { child, stdout, stderr, args: spec.args.clone(), check: spec.check }))
    }

    fn push_file(&mut self, host_path: &str, dest_path: &str) -> Result<()> {
        let bytes = std::fs::read(host_path).map_err(|err| Error::Io { path: host_path.into(), source: err })?;
        self.push_file_io(dest_path, &bytes, 0o644, "root", "root")
    }

    fn push_file_io(&mut self, dest_path: &str, content: &[u8], mode: u32, _owner_user: &str, _owner_group: &str) -> Result<()> {
        let target = self.instance_path(dest_path);
        let parent = target.parent().ok_or_else(|| Error::configuration("destination has no parent directory"))?;
        if !parent.is_dir() {
            return Err(Error::backend(
                format!("parent directory of {dest_path} does not exist inside the instance"),
                None,
            ));
        }

        let tmp = parent.join(format!(".{}.tmp", target.file_name().unwrap_or_default().to_string_lossy()));
        {
            let mut file = std::fs::File::create(&tmp).map_err(|err| Error::Io { path: tmp.clone(), source: err })?;
            file.write_all(content).map_err(|err| Error::Io { path: tmp.clone(), source: err })?;
        }
        set_mode(&tmp, mode)?;
        std::fs::rename(&tmp, &target).map_err(|err| Error::Io { path: target, source: err })?;
        Ok(())
    }

    fn pull_file(&mut self, src_path: &str, host_path: &str) -> Result<()> {
        let source = self.instance_path(src_path);
        if !source.exists() {
            return Err(Error::backend(format!("source {src_path} does not exist"), None));
        }
        std::fs::copy(&source, host_path).map_err(|err| Error::Io { path: host_path.into(), source: err })?;
        Ok(())
    }

    fn mount(&mut self, mount: &Mount) -> Result<()> {
        if self.mounts.iter().any(|m| m.target == mount.target && m.host_source == mount.host_source) {
            return Ok(());
        }
        let target = self.instance_path(&mount.target);
        std::fs::create_dir_all(&target).map_err(|err| Error::Io { path: target, source: err })?;
        self.mounts.push(mount.clone());
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
        Ok(self.root.exists())
    }

    fn is_running(&mut self) -> Result<bool> {
        Ok(self.running)
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, _delay_mins: u32) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn delete(&mut self, _force: bool) -> Result<()> {
        self.running = false;
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|err| Error::Io { path: self.root.clone(), source: err })?;
        }
        Ok(())
    }
}

struct LocalProcessHandle {
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<BufReader<ChildStderr>>,
    args: Vec<String>,
    check: bool,
}

impl ProcessHandle for LocalProcessHandle {
    fn read_stdout_line(&mut self) -> Result<Option<String>> {
        read_line(&mut self.stdout)
    }

    fn read_stderr_line(&mut self) -> Result<Option<String>> {
        read_line(&mut self.stderr)
    }

    fn wait(&mut self) -> Result<CommandOutput> {
        use std::io::Read;

        let mut stdout_rest = String::new();
        if let Some(reader) = &mut self.stdout {
            let _ = reader.read_to_string(&mut stdout_rest);
        }
        let mut stderr_rest = String::new();
        if let Some(reader) = &mut self.stderr {
            let _ = reader.read_to_string(&mut stderr_rest);
        }

        let status = self
            .child
            .wait()
            .map_err(|err| Error::backend("failed waiting for spawned process".to_string(), Some(err.to_string())))?;

        let output = CommandOutput { exit_code: status.code(), stdout: stdout_rest, stderr: stderr_rest };

        if self.check && !output.success() {
            return Err(Error::backend(
                format!("command failed: {}", self.args.join(" ")),
                Some(crate::error::details_from_command(&self.args, output.exit_code, &output.stdout, &output.stderr)),
            ));
        }

        Ok(output)
    }

    fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .map_err(|err| Error::backend("failed to kill spawned process".to_string(), Some(err.to_string())))
    }
}

fn read_line<R: std::io::Read>(reader: &mut Option<BufReader<R>>) -> Result<Option<String>> {
    let Some(reader) = reader else { return Ok(None) };
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .map_err(|err| Error::backend("failed reading process output".to_string(), Some(err.to_string())))?;
    if bytes_read == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|err| Error::Io { path: path.to_path_buf(), source: err })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
