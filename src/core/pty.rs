//! PTY wrapper for the panel shell.
//!
//! This module provides a thin wrapper around `portable-pty` for
//! spawning the external shell on a pseudo-terminal and shuttling bytes
//! in and out. It also owns the construction of the shell's launch
//! argument vector.

use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(String),

    #[error("failed to spawn shell `{}`: {reason}", .shell.display())]
    Spawn { shell: PathBuf, reason: String },

    #[error("failed to resize pty: {0}")]
    Resize(String),

    #[error("failed to write to pty: {0}")]
    Write(#[from] std::io::Error),

    #[error("shell session is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// How the panel shell is launched.
///
/// The shell is started with rc loading suppressed and a bootstrap
/// command that points `ZDOTDIR` at the managed configuration
/// directory, sources the managed zshrc, then replaces itself with an
/// ordinary interactive shell. The source-then-exec split makes the
/// zshrc's aliases, options, and prompt persist into the live session
/// instead of dying with a throwaway subshell.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Shell binary
    pub shell: PathBuf,
    /// Configuration directory exported as ZDOTDIR
    pub config_dir: PathBuf,
    /// The managed zshrc sourced at startup
    pub zshrc: PathBuf,
    /// Initial working directory
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    /// The `-c` bootstrap command string
    pub fn bootstrap_command(&self) -> String {
        format!(
            "ZDOTDIR={}; source {}; exec {} -i",
            self.config_dir.display(),
            self.zshrc.display(),
            self.shell.display()
        )
    }

    /// Full argument vector: no rcs, no global rcs, interactive,
    /// bootstrap command.
    pub fn argv(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            "-d".to_string(),
            "-i".to_string(),
            "-c".to_string(),
            self.bootstrap_command(),
        ]
    }
}

/// A shell process attached to a pseudo-terminal
pub struct ShellPty {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl ShellPty {
    /// Spawn the shell described by `spec` on a fresh pty.
    ///
    /// Returns the pty handle and the output reader for the caller's
    /// reader thread. Spawn failure names the shell binary so a missing
    /// or non-executable shell is diagnosable.
    pub fn spawn(
        spec: &LaunchSpec,
        cols: u16,
        rows: u16,
    ) -> Result<(Self, Box<dyn Read + Send>)> {
        // portable-pty reports exec failure inside the forked child, so
        // a missing binary must be caught before fork to surface a
        // usable error.
        if !spec.shell.is_file() {
            return Err(PtyError::Spawn {
                shell: spec.shell.clone(),
                reason: "no such file".to_string(),
            });
        }

        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.shell);
        cmd.args(spec.argv());
        cmd.env("ZPANEL", "1");
        cmd.env("ZPANEL_VERSION", env!("CARGO_PKG_VERSION"));
        cmd.env("TERM", "xterm-256color");
        if let Some(ref cwd) = spec.cwd {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| PtyError::Spawn {
            shell: spec.shell.clone(),
            reason: e.to_string(),
        })?;
        // The child keeps its own slave handle; dropping ours lets the
        // master read return EOF when the shell exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        Ok((
            Self {
                master: pair.master,
                writer,
                child,
            },
            reader,
        ))
    }

    /// Write bytes to the PTY (input to shell)
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Resize the pty
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    /// Check if the shell process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Get the exit code if the process has exited
    pub fn exit_code(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Terminate the shell process
    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.try_wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            shell: PathBuf::from("/bin/zsh"),
            config_dir: PathBuf::from("/home/u/.zpanel"),
            zshrc: PathBuf::from("/home/u/.zpanel/zshrc"),
            cwd: None,
        }
    }

    #[test]
    fn test_bootstrap_command() {
        assert_eq!(
            spec().bootstrap_command(),
            "ZDOTDIR=/home/u/.zpanel; source /home/u/.zpanel/zshrc; exec /bin/zsh -i"
        );
    }

    #[test]
    fn test_argv_shape() {
        let argv = spec().argv();
        assert_eq!(argv.len(), 5);
        // rc suppression, global rc suppression, interactive, command
        assert_eq!(&argv[..4], &["-f", "-d", "-i", "-c"]);
        assert!(argv[4].starts_with("ZDOTDIR="));
        assert!(argv[4].contains("source /home/u/.zpanel/zshrc"));
        assert!(argv[4].ends_with("exec /bin/zsh -i"));
    }

    #[test]
    fn test_launch_from_fresh_config_store() {
        use crate::config::{ConfigStore, ZSHRC_TEMPLATE};

        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_dir(tmp.path().join("zp"));
        let outcome = store.ensure_zshrc().unwrap();
        assert!(outcome.created);
        assert_eq!(
            std::fs::read_to_string(store.zshrc_path()).unwrap(),
            ZSHRC_TEMPLATE
        );

        let spec = LaunchSpec {
            shell: PathBuf::from("/bin/zsh"),
            config_dir: store.dir().to_path_buf(),
            zshrc: outcome.path,
            cwd: None,
        };
        let cmd = spec.bootstrap_command();
        assert!(cmd.starts_with(&format!("ZDOTDIR={}", store.dir().display())));
        assert!(cmd.contains(&format!("source {}", store.zshrc_path().display())));
        assert!(cmd.ends_with("exec /bin/zsh -i"));
    }

    #[test]
    #[cfg(unix)]
    fn test_spawn_missing_shell_is_loud() {
        let bad = LaunchSpec {
            shell: PathBuf::from("/no/such/shell"),
            ..spec()
        };
        match ShellPty::spawn(&bad, 80, 24) {
            Err(PtyError::Spawn { shell, .. }) => {
                assert_eq!(shell, PathBuf::from("/no/such/shell"));
            }
            other => panic!("expected Spawn error, got {:?}", other.map(|_| ())),
        }
    }
}
