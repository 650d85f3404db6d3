//! Name completion backed by the external shell.
//!
//! The panel never implements completion itself: on demand it asks the
//! shell binary, non-interactively, to enumerate functions, parameters,
//! aliases, and commands, then filters the result by the token at the
//! cursor. The shell-out runs on a worker thread so the event loop
//! never stalls on it; each request carries a generation number, a
//! newer keystroke invalidates anything in flight, and a bounded
//! timeout falls back to an empty candidate list.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::warn;

/// zsh command enumerating every completable name
pub const ENUMERATE_COMMAND: &str =
    "print -rl -- ${(k)functions} ${(k)parameters} ${(k)aliases} ${(k)commands}";

/// Locate the token at the cursor.
///
/// `start` is found by scanning backward from the cursor over
/// non-whitespace characters; `end` is the cursor itself. Both are byte
/// indices into `buffer`.
pub fn complete_at_cursor(buffer: &str, cursor: usize) -> (usize, usize) {
    let cursor = cursor.min(buffer.len());
    let mut start = cursor;
    for (i, ch) in buffer[..cursor].char_indices().rev() {
        if ch.is_whitespace() {
            break;
        }
        start = i;
    }
    (start, cursor)
}

/// Run the enumeration shell-out and filter by prefix.
///
/// Failures yield an empty list; completion is best-effort and never an
/// error the user has to deal with.
fn enumerate(shell: &Path, prefix: &str) -> Vec<String> {
    let output = match std::process::Command::new(shell)
        .arg("-f")
        .arg("-c")
        .arg(ENUMERATE_COMMAND)
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            warn!("Completion shell-out failed: {}", e);
            return Vec::new();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut candidates: Vec<String> = stdout
        .lines()
        .filter(|line| !line.is_empty() && line.starts_with(prefix))
        .map(|line| line.to_string())
        .collect();
    candidates.sort();
    candidates.dedup();
    candidates
}

/// Asynchronous completion requests against the shell
pub struct CompletionBridge {
    shell: PathBuf,
    timeout: Duration,
    generation: u64,
    deadline: Option<Instant>,
    tx: Sender<(u64, Vec<String>)>,
    rx: Receiver<(u64, Vec<String>)>,
}

impl CompletionBridge {
    pub fn new(shell: PathBuf, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            shell,
            timeout,
            generation: 0,
            deadline: None,
            tx,
            rx,
        }
    }

    /// Start a request for `prefix`, invalidating any in-flight one
    pub fn request(&mut self, prefix: &str) {
        self.generation += 1;
        self.deadline = Some(Instant::now() + self.timeout);

        let generation = self.generation;
        let shell = self.shell.clone();
        let prefix = prefix.to_string();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let candidates = enumerate(&shell, &prefix);
            // Receiver gone or superseded: result is silently dropped
            let _ = tx.send((generation, candidates));
        });
    }

    /// Invalidate any in-flight request
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.deadline = None;
    }

    /// Whether a request is still outstanding
    #[allow(dead_code)]
    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Poll for the current request's result.
    ///
    /// Stale results from cancelled generations are discarded. Once the
    /// timeout passes the request resolves to the empty list.
    pub fn poll(&mut self) -> Option<Vec<String>> {
        while let Ok((generation, candidates)) = self.rx.try_recv() {
            if generation == self.generation && self.deadline.is_some() {
                self.deadline = None;
                return Some(candidates);
            }
        }

        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                warn!(
                    "Completion timed out after {:?}; returning no candidates",
                    self.timeout
                );
                self.deadline = None;
                return Some(Vec::new());
            }
        }

        None
    }
}

/// Best-effort mirror of the shell's current input line.
///
/// The panel forwards raw key bytes to the pty and never sees the
/// shell's own line editor, so this reconstruction only watches
/// keystrokes. Cursor movement and history recall make it stale; those
/// keys conservatively reset it.
#[derive(Default)]
pub struct InputTracker {
    line: String,
}

impl InputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn cursor(&self) -> usize {
        self.line.len()
    }

    pub fn clear(&mut self) {
        self.line.clear();
    }

    /// Append text inserted on the shell's behalf (accepted completion)
    pub fn push_str(&mut self, s: &str) {
        self.line.push_str(s);
    }

    /// Observe a key that is about to be forwarded to the shell
    pub fn observe_key(&mut self, event: &KeyEvent) {
        let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
        let alt = event.modifiers.contains(KeyModifiers::ALT);

        match event.code {
            KeyCode::Char(c) if !ctrl && !alt => self.line.push(c),
            KeyCode::Backspace => {
                self.line.pop();
            }
            KeyCode::Enter | KeyCode::Esc => self.clear(),
            KeyCode::Char('c') | KeyCode::Char('u') if ctrl => self.clear(),
            KeyCode::Char('w') if ctrl => {
                let trimmed = self.line.trim_end();
                let cut = trimmed
                    .rfind(char::is_whitespace)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                self.line.truncate(cut);
            }
            // Arrows, Home/End, PageUp/Down, Tab: position unknown
            KeyCode::Up | KeyCode::Down | KeyCode::Left | KeyCode::Right | KeyCode::Home
            | KeyCode::End | KeyCode::PageUp | KeyCode::PageDown => self.clear(),
            _ => {}
        }
    }
}

/// Completion popup state
pub struct CompletionSelector {
    /// Whether the popup is visible
    pub visible: bool,
    /// Prefix being completed (narrowed as the user types)
    pub prefix: String,
    /// Candidates for the requested prefix
    all: Vec<String>,
    /// Candidates filtered by the current prefix
    pub results: Vec<String>,
    /// Currently selected index
    pub selected: usize,
    /// Scroll offset
    pub scroll_offset: usize,
    /// Maximum visible items
    pub max_visible: usize,
    /// Waiting for the bridge to answer
    pub loading: bool,
}

impl CompletionSelector {
    pub fn new() -> Self {
        Self {
            visible: false,
            prefix: String::new(),
            all: Vec::new(),
            results: Vec::new(),
            selected: 0,
            scroll_offset: 0,
            max_visible: 8,
            loading: false,
        }
    }

    /// Open the popup for a prefix; candidates arrive via
    /// `set_candidates`
    pub fn open(&mut self, prefix: &str) {
        self.visible = true;
        self.loading = true;
        self.prefix = prefix.to_string();
        self.all.clear();
        self.results.clear();
        self.selected = 0;
        self.scroll_offset = 0;
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.loading = false;
    }

    /// Install the bridge's answer for the requested prefix
    pub fn set_candidates(&mut self, candidates: Vec<String>) {
        self.all = candidates;
        self.loading = false;
        self.refilter();
    }

    fn refilter(&mut self) {
        self.results = self
            .all
            .iter()
            .filter(|c| c.starts_with(&self.prefix))
            .cloned()
            .collect();
        if self.selected >= self.results.len() {
            self.selected = self.results.len().saturating_sub(1);
        }
        self.adjust_scroll();
    }

    /// Narrow the prefix with a typed character
    pub fn input_char(&mut self, ch: char) {
        self.prefix.push(ch);
        self.selected = 0;
        self.scroll_offset = 0;
        self.refilter();
    }

    /// Widen the prefix; returns false when the popup should close
    pub fn backspace(&mut self) -> bool {
        if self.prefix.pop().is_none() {
            return false;
        }
        self.refilter();
        true
    }

    pub fn select_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.adjust_scroll();
        }
    }

    pub fn select_down(&mut self) {
        if !self.results.is_empty() && self.selected + 1 < self.results.len() {
            self.selected += 1;
            self.adjust_scroll();
        }
    }

    fn adjust_scroll(&mut self) {
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + self.max_visible {
            self.scroll_offset = self.selected - self.max_visible + 1;
        }
    }

    /// Confirm the selection, returning the text to insert after the
    /// already-typed prefix
    pub fn confirm(&mut self) -> Option<String> {
        let candidate = self.results.get(self.selected)?;
        let suffix = candidate
            .strip_prefix(&self.prefix)
            .unwrap_or(candidate)
            .to_string();
        self.hide();
        Some(suffix)
    }

    /// Get visible items for rendering
    /// Returns: (display_index, candidate, is_selected)
    pub fn visible_items(&self) -> Vec<(usize, &str, bool)> {
        self.results
            .iter()
            .enumerate()
            .skip(self.scroll_offset)
            .take(self.max_visible)
            .map(|(idx, candidate)| {
                let display_idx = idx - self.scroll_offset;
                let is_selected = idx == self.selected;
                (display_idx, candidate.as_str(), is_selected)
            })
            .collect()
    }
}

impl Default for CompletionSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_extraction() {
        let buffer = "git ch";
        let (start, end) = complete_at_cursor(buffer, buffer.len());
        assert_eq!((start, end), (4, 6));
        assert_eq!(&buffer[start..end], "ch");
    }

    #[test]
    fn test_token_extraction_whole_buffer() {
        let buffer = "gre";
        let (start, end) = complete_at_cursor(buffer, 3);
        assert_eq!((start, end), (0, 3));
    }

    #[test]
    fn test_token_extraction_at_whitespace() {
        let buffer = "echo ";
        let (start, end) = complete_at_cursor(buffer, 5);
        assert_eq!((start, end), (5, 5));
    }

    #[test]
    fn test_token_extraction_cursor_clamped() {
        let (start, end) = complete_at_cursor("ab", 99);
        assert_eq!((start, end), (0, 2));
    }

    #[test]
    fn test_token_extraction_multibyte() {
        let buffer = "été x";
        let (start, end) = complete_at_cursor(buffer, buffer.len());
        assert_eq!(&buffer[start..end], "x");
    }

    #[cfg(unix)]
    fn stub_shell(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("stub-shell");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    #[cfg(unix)]
    fn test_enumerate_via_stub_shell() {
        let tmp = tempfile::tempdir().unwrap();
        // The stub reports a fixed name set regardless of the query
        let shell = stub_shell(
            tmp.path(),
            "printf 'alpha\\nalbatross\\nbeta\\nalpha\\n'",
        );

        let candidates = enumerate(&shell, "al");
        assert_eq!(candidates, vec!["albatross", "alpha"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_enumerate_missing_shell_is_empty() {
        let candidates = enumerate(Path::new("/no/such/shell"), "x");
        assert!(candidates.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_bridge_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = stub_shell(tmp.path(), "printf 'alpha\\nbeta\\n'");

        let mut bridge = CompletionBridge::new(shell, Duration::from_secs(5));
        bridge.request("a");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut answer = None;
        while Instant::now() < deadline {
            if let Some(candidates) = bridge.poll() {
                answer = Some(candidates);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(answer, Some(vec!["alpha".to_string()]));
        assert!(!bridge.pending());
    }

    #[test]
    #[cfg(unix)]
    fn test_bridge_timeout_falls_back_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = stub_shell(tmp.path(), "sleep 5");

        let mut bridge = CompletionBridge::new(shell, Duration::from_millis(50));
        bridge.request("a");

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut answer = None;
        while Instant::now() < deadline {
            if let Some(candidates) = bridge.poll() {
                answer = Some(candidates);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(answer, Some(Vec::new()));
    }

    #[test]
    #[cfg(unix)]
    fn test_bridge_cancel_discards_stale_result() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = stub_shell(tmp.path(), "printf 'alpha\\n'");

        let mut bridge = CompletionBridge::new(shell, Duration::from_secs(5));
        bridge.request("a");
        bridge.cancel();

        // Even after the worker finishes, the stale generation never
        // surfaces
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            assert_eq!(bridge.poll(), None);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_input_tracker_basic_editing() {
        let mut tracker = InputTracker::new();
        for c in "git sta".chars() {
            tracker.observe_key(&KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        assert_eq!(tracker.line(), "git sta");

        tracker.observe_key(&KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE));
        assert_eq!(tracker.line(), "git st");

        tracker.observe_key(&KeyEvent::new(KeyCode::Char('w'), KeyModifiers::CONTROL));
        assert_eq!(tracker.line(), "git ");

        tracker.observe_key(&KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(tracker.line(), "");
    }

    #[test]
    fn test_input_tracker_resets_on_cursor_motion() {
        let mut tracker = InputTracker::new();
        tracker.push_str("stale");
        tracker.observe_key(&KeyEvent::new(KeyCode::Up, KeyModifiers::NONE));
        assert_eq!(tracker.line(), "");
    }

    #[test]
    fn test_selector_narrowing_and_confirm() {
        let mut selector = CompletionSelector::new();
        selector.open("al");
        selector.set_candidates(vec![
            "albatross".to_string(),
            "alpha".to_string(),
            "always".to_string(),
        ]);
        assert_eq!(selector.results.len(), 3);

        selector.input_char('p');
        assert_eq!(selector.results, vec!["alpha"]);

        let suffix = selector.confirm().unwrap();
        assert_eq!(suffix, "ha");
        assert!(!selector.visible);
    }

    #[test]
    fn test_selector_backspace_closes_at_empty_prefix() {
        let mut selector = CompletionSelector::new();
        selector.open("a");
        selector.set_candidates(vec!["alpha".to_string()]);

        assert!(selector.backspace());
        assert!(!selector.backspace());
    }

    #[test]
    fn test_selector_scroll_window() {
        let mut selector = CompletionSelector::new();
        selector.max_visible = 3;
        selector.open("c");
        selector.set_candidates((0..10).map(|i| format!("c{:02}", i)).collect());

        for _ in 0..5 {
            selector.select_down();
        }
        let items = selector.visible_items();
        assert_eq!(items.len(), 3);
        assert!(items.iter().any(|(_, c, selected)| *selected && *c == "c05"));
    }
}
