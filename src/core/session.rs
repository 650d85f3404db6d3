//! Session management
//!
//! A `Session` binds one pty-backed shell process to the panel: a
//! reader thread streams raw bytes into a channel, and the event loop
//! drains them through the output filter pipeline into the scroll
//! buffer. The `SessionRegistry` owns every live session keyed by name;
//! there is no module-level session state.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use super::buffer::ScrollBuffer;
use super::filter::{Chunk, FilterChain, FilterCtx, FilterEvent};
use super::pty::{LaunchSpec, PtyError, ShellPty};

/// Session events drained by the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A `command not found` message was detected in the output
    CommandNotFound(String),
    /// The tracked working directory changed
    DirChanged(PathBuf),
    /// The shell process has exited
    Exited(Option<u32>),
}

/// Incremental UTF-8 decoding across chunk boundaries.
///
/// The pty delivers arbitrary byte windows, so a multi-byte sequence
/// may straddle two reads; trailing incomplete bytes are carried into
/// the next call.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut rest = self.pending.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or(""));
                    rest = &rest[valid..];
                    match e.error_len() {
                        Some(len) => {
                            // Invalid sequence; drop it and continue
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[len..];
                        }
                        None => break, // Incomplete tail, keep for next call
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }
}

/// A shell session bound to the panel
pub struct Session {
    /// Session name (registry key)
    pub name: String,
    /// Tracked working directory, updated by the dir-tracking filter
    pub tracked_dir: Option<PathBuf>,
    /// Panel output buffer
    pub buffer: ScrollBuffer,
    pty: ShellPty,
    filters: FilterChain,
    decoder: Utf8Decoder,
    running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    output_rx: Receiver<Vec<u8>>,
    events: Vec<SessionEvent>,
    exit_reported: bool,
}

impl Session {
    /// Spawn the shell and start streaming its output.
    ///
    /// Never blocks on the shell: the process is started and the reader
    /// thread delivers output as it arrives.
    pub fn spawn(name: &str, spec: &LaunchSpec, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let (pty, mut reader) = ShellPty::spawn(spec, cols, rows)?;
        info!(
            "Session `{}` started: {} ({}x{})",
            name,
            spec.shell.display(),
            cols,
            rows
        );

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<Vec<u8>>();

        let reader_running = running.clone();
        let reader_thread = thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                if !reader_running.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        // EOF: shell exited
                        reader_running.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            reader_running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(_) => {
                        reader_running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            tracked_dir: spec.cwd.clone(),
            buffer: ScrollBuffer::default(),
            pty,
            filters: FilterChain::standard(),
            decoder: Utf8Decoder::default(),
            running,
            reader_thread: Some(reader_thread),
            output_rx: rx,
            events: Vec::new(),
            exit_reported: false,
        })
    }

    /// Check if the session's shell is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain pending output through the filter pipeline.
    ///
    /// Returns true when anything was processed. Chunks are filtered
    /// strictly in arrival order.
    pub fn process_output(&mut self) -> bool {
        let mut pending: Vec<Vec<u8>> = Vec::new();
        loop {
            match self.output_rx.try_recv() {
                Ok(data) => pending.push(data),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }

        let processed = !pending.is_empty();
        for data in pending {
            let text = self.decoder.decode(&data);
            if text.is_empty() {
                continue;
            }
            let mut filter_events = Vec::new();
            let mut cx = FilterCtx {
                buffer: &mut self.buffer,
                tracked_dir: &mut self.tracked_dir,
                events: &mut filter_events,
            };
            self.filters.run(Chunk::raw(text), &mut cx);
            for event in filter_events {
                self.events.push(match event {
                    FilterEvent::CommandNotFound(token) => SessionEvent::CommandNotFound(token),
                    FilterEvent::DirChanged(dir) => SessionEvent::DirChanged(dir),
                });
            }
        }

        if !self.is_running() && !self.exit_reported {
            self.exit_reported = true;
            let code = self.pty.exit_code();
            info!("Session `{}` exited (code {:?})", self.name, code);
            self.events.push(SessionEvent::Exited(code));
        }

        processed
    }

    /// Take the events produced since the last call
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Write input bytes to the shell
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_running() {
            return Err(PtyError::NotRunning);
        }
        self.pty.write(data)
    }

    /// Send a full line of input followed by Enter
    pub fn send_line(&mut self, line: &str) -> Result<(), PtyError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\r');
        self.write(&bytes)
    }

    /// Clear the panel view and ask the shell to repaint its prompt
    pub fn clear_and_reprompt(&mut self) -> Result<(), PtyError> {
        self.buffer.clear();
        // C-l: the shell redraws the prompt
        self.write(&[0x0c])
    }

    /// Resize the pty to the panel content area
    pub fn resize(&mut self, cols: u16, rows: u16) {
        if let Err(e) = self.pty.resize(cols, rows) {
            warn!("Session `{}` resize failed: {}", self.name, e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        // Application-exit policy: the shell dies with the registry.
        // Killing the child closes the pty and unblocks the reader.
        self.pty.kill();

        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Registry of live sessions keyed by name.
///
/// Owned by the application's top-level context; sessions are created
/// lazily and die with the registry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find-or-create the named session.
    ///
    /// A dead session under the same name is replaced; a live one is
    /// reused untouched, so repeated calls never spawn a second
    /// process for the same name.
    pub fn ensure(
        &mut self,
        name: &str,
        spec: &LaunchSpec,
        cols: u16,
        rows: u16,
    ) -> Result<&mut Session, PtyError> {
        let dead = self
            .sessions
            .get(name)
            .map(|s| !s.is_running())
            .unwrap_or(false);
        if dead {
            info!("Session `{}` is dead, respawning", name);
            self.sessions.remove(name);
        }

        if !self.sessions.contains_key(name) {
            let session = Session::spawn(name, spec, cols, rows)?;
            self.sessions.insert(name.to_string(), session);
        }

        Ok(self.sessions.get_mut(name).unwrap())
    }

    pub fn get(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.get_mut(name)
    }

    /// Tear down the named session
    #[allow(dead_code)]
    pub fn remove(&mut self, name: &str) -> bool {
        self.sessions.remove(name).is_some()
    }

    /// Number of live sessions
    #[allow(dead_code)]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_decoder_straddling_boundary() {
        let mut decoder = Utf8Decoder::default();
        // "é" = 0xC3 0xA9 split across two reads
        assert_eq!(decoder.decode(&[b'a', 0xC3]), "a");
        assert_eq!(decoder.decode(&[0xA9, b'b']), "éb");
    }

    #[test]
    fn test_utf8_decoder_invalid_byte() {
        let mut decoder = Utf8Decoder::default();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, format!("a{}b", char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn test_utf8_decoder_plain_ascii() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert!(decoder.pending.is_empty());
    }

    // Registry behavior around spawn failures is testable without a
    // live shell: a bad spec must not leave a phantom entry behind.
    #[test]
    #[cfg(unix)]
    fn test_registry_failed_spawn_leaves_no_entry() {
        let mut registry = SessionRegistry::new();
        let spec = LaunchSpec {
            shell: PathBuf::from("/no/such/shell"),
            config_dir: PathBuf::from("/tmp"),
            zshrc: PathBuf::from("/tmp/zshrc"),
            cwd: None,
        };

        assert!(registry.ensure("main", &spec, 80, 24).is_err());
        assert_eq!(registry.count(), 0);
        assert!(registry.get("main").is_none());
    }

    // A stub shell that ignores the zsh launch flags and evaluates
    // whatever arrives on stdin. Lets the tests exercise spawn, output
    // streaming, the filter pipeline, and reuse without zsh installed.
    #[cfg(unix)]
    fn stub_shell(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("stub-shell");
        std::fs::write(&path, "#!/bin/sh\nwhile read line; do eval \"$line\"; done\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    fn stub_spec(dir: &std::path::Path) -> LaunchSpec {
        LaunchSpec {
            shell: stub_shell(dir),
            config_dir: dir.to_path_buf(),
            zshrc: dir.join("zshrc"),
            cwd: None,
        }
    }

    #[cfg(unix)]
    fn pump_until<F: FnMut(&mut Session) -> bool>(session: &mut Session, mut pred: F) -> bool {
        use std::time::{Duration, Instant};

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            session.process_output();
            if pred(session) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    #[cfg(unix)]
    fn test_session_lifecycle_with_stub_shell() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = stub_spec(tmp.path());

        let mut session = match Session::spawn("t", &spec, 80, 24) {
            Ok(s) => s,
            // Environments without a usable pty (restricted CI) skip
            Err(PtyError::Open(_)) => return,
            Err(e) => panic!("spawn failed: {}", e),
        };

        session.send_line("echo zp_$((40+2))").unwrap();
        let saw_marker = pump_until(&mut session, |s| {
            s.buffer.plain_lines().iter().any(|l| l.contains("zp_42"))
        });
        assert!(saw_marker, "marker output never arrived");

        session.send_line("exit").unwrap();
        let mut exit_events = 0;
        let exited = pump_until(&mut session, |s| {
            exit_events += s
                .take_events()
                .iter()
                .filter(|e| matches!(e, SessionEvent::Exited(_)))
                .count();
            exit_events > 0
        });
        assert!(exited, "exit event never arrived");

        // The exit is reported exactly once
        session.process_output();
        assert!(!session
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Exited(_))));
        assert_eq!(exit_events, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_registry_reuses_live_session() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = stub_spec(tmp.path());
        let mut registry = SessionRegistry::new();

        match registry.ensure("main", &spec, 80, 24) {
            Ok(_) => {}
            Err(PtyError::Open(_)) => return,
            Err(e) => panic!("spawn failed: {}", e),
        }
        let session = registry.get_mut("main").unwrap();
        session.send_line("echo first_incarnation").unwrap();
        assert!(pump_until(session, |s| {
            s.buffer
                .plain_lines()
                .iter()
                .any(|l| l.contains("first_incarnation"))
        }));

        // ensure() again: same process, buffer history intact
        let session = registry.ensure("main", &spec, 80, 24).unwrap();
        assert!(session
            .buffer
            .plain_lines()
            .iter()
            .any(|l| l.contains("first_incarnation")));
        assert_eq!(registry.count(), 1);
    }
}
