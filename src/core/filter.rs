//! Output filter pipeline.
//!
//! Every chunk arriving from the shell passes through an explicit,
//! ordered chain of filters before and after it reaches the panel
//! buffer:
//!
//! - **Pre-display**: style tagging, directory tracking
//! - **Post-display**: escape interpretation into the buffer,
//!   auto-scroll, command-not-found detection
//!
//! A filter is either a pure transform of the chunk or a side-effecting
//! inspector that returns it unchanged. Filters never block and never
//! panic; each runs in time proportional to the chunk size, because the
//! chain executes on every inbound chunk including per-keystroke echo.

use std::path::PathBuf;

use regex::Regex;

use super::buffer::ScrollBuffer;

/// Visual class attached to a chunk by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkClass {
    /// Untagged raw bytes from the pty
    Raw,
    /// Ordinary shell output
    Output,
}

/// One decoded unit of shell output
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    #[allow(dead_code)]
    pub class: ChunkClass,
}

impl Chunk {
    pub fn raw(text: String) -> Self {
        Self {
            text,
            class: ChunkClass::Raw,
        }
    }
}

/// Events surfaced by inspecting filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEvent {
    /// A `<token>: command not found` message was seen
    CommandNotFound(String),
    /// The tracked working directory changed
    DirChanged(PathBuf),
}

/// Shared state the filters operate against
pub struct FilterCtx<'a> {
    pub buffer: &'a mut ScrollBuffer,
    pub tracked_dir: &'a mut Option<PathBuf>,
    pub events: &'a mut Vec<FilterEvent>,
}

/// A single stage of the output pipeline
pub trait OutputFilter: Send {
    fn name(&self) -> &'static str;

    /// Transform or inspect one chunk
    fn apply(&mut self, chunk: Chunk, cx: &mut FilterCtx<'_>) -> Chunk;
}

/// Tags chunks with the `Output` visual class
pub struct StyleTag;

impl OutputFilter for StyleTag {
    fn name(&self) -> &'static str {
        "style-tag"
    }

    fn apply(&mut self, mut chunk: Chunk, _cx: &mut FilterCtx<'_>) -> Chunk {
        chunk.class = ChunkClass::Output;
        chunk
    }
}

/// Tracks the shell's working directory from echoed input.
///
/// Matches a leading `cd`, `pushd`, or `popd` followed by a non-empty
/// argument. This inspects the echoed command text, not the shell's
/// real state, so quoting, variable expansion, and command chaining all
/// fool it. Known-lossy shortcut, kept deliberately.
pub struct DirTracker {
    pattern: Regex,
}

impl DirTracker {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"^\s*(?:cd|pushd|popd)\s+(\S+)").unwrap(),
        }
    }
}

impl Default for DirTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFilter for DirTracker {
    fn name(&self) -> &'static str {
        "dir-tracker"
    }

    fn apply(&mut self, chunk: Chunk, cx: &mut FilterCtx<'_>) -> Chunk {
        if let Some(caps) = self.pattern.captures(&chunk.text) {
            let dir = PathBuf::from(&caps[1]);
            if cx.tracked_dir.as_ref() != Some(&dir) {
                *cx.tracked_dir = Some(dir.clone());
                cx.events.push(FilterEvent::DirChanged(dir));
            }
        }
        chunk
    }
}

/// Feeds the chunk through the escape parser into the panel buffer
pub struct BufferRender;

impl OutputFilter for BufferRender {
    fn name(&self) -> &'static str {
        "buffer-render"
    }

    fn apply(&mut self, chunk: Chunk, cx: &mut FilterCtx<'_>) -> Chunk {
        cx.buffer.feed(&chunk.text);
        chunk
    }
}

/// Snaps the view back to the live bottom on new output
pub struct AutoScroll;

impl OutputFilter for AutoScroll {
    fn name(&self) -> &'static str {
        "auto-scroll"
    }

    fn apply(&mut self, chunk: Chunk, cx: &mut FilterCtx<'_>) -> Chunk {
        cx.buffer.scroll_to_bottom();
        chunk
    }
}

/// Surfaces `command not found` messages as notifications.
///
/// Understands both wordings: zsh's `zsh: command not found: <token>`
/// and the `<token>: command not found` shape other shells print.
pub struct ErrorDetector {
    zsh_form: Regex,
    posix_form: Regex,
}

impl ErrorDetector {
    pub fn new() -> Self {
        Self {
            zsh_form: Regex::new(r"command not found: (\S+)").unwrap(),
            posix_form: Regex::new(r"([^\s:]+): command not found").unwrap(),
        }
    }
}

impl Default for ErrorDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFilter for ErrorDetector {
    fn name(&self) -> &'static str {
        "error-detector"
    }

    fn apply(&mut self, chunk: Chunk, cx: &mut FilterCtx<'_>) -> Chunk {
        if let Some(caps) = self.zsh_form.captures(&chunk.text) {
            cx.events.push(FilterEvent::CommandNotFound(caps[1].to_string()));
        } else if let Some(caps) = self.posix_form.captures(&chunk.text) {
            cx.events.push(FilterEvent::CommandNotFound(caps[1].to_string()));
        }
        chunk
    }
}

/// The ordered pipeline applied to every chunk
pub struct FilterChain {
    pre: Vec<Box<dyn OutputFilter>>,
    post: Vec<Box<dyn OutputFilter>>,
}

impl FilterChain {
    /// The standard chain in its fixed order
    pub fn standard() -> Self {
        Self {
            pre: vec![Box::new(StyleTag), Box::new(DirTracker::new())],
            post: vec![
                Box::new(BufferRender),
                Box::new(AutoScroll),
                Box::new(ErrorDetector::new()),
            ],
        }
    }

    /// Run the chunk through pre- then post-display stages
    pub fn run(&mut self, chunk: Chunk, cx: &mut FilterCtx<'_>) -> Chunk {
        let mut chunk = chunk;
        for filter in self.pre.iter_mut().chain(self.post.iter_mut()) {
            chunk = filter.apply(chunk, cx);
        }
        chunk
    }

    /// Stage names in execution order
    #[allow(dead_code)]
    pub fn stages(&self) -> Vec<&'static str> {
        self.pre
            .iter()
            .chain(self.post.iter())
            .map(|f| f.name())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        buffer: ScrollBuffer,
        tracked_dir: Option<PathBuf>,
        events: Vec<FilterEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                buffer: ScrollBuffer::new(100),
                tracked_dir: None,
                events: Vec::new(),
            }
        }

        fn run(&mut self, chain: &mut FilterChain, text: &str) -> Chunk {
            let mut cx = FilterCtx {
                buffer: &mut self.buffer,
                tracked_dir: &mut self.tracked_dir,
                events: &mut self.events,
            };
            chain.run(Chunk::raw(text.to_string()), &mut cx)
        }
    }

    #[test]
    fn test_chain_order() {
        let chain = FilterChain::standard();
        assert_eq!(
            chain.stages(),
            vec![
                "style-tag",
                "dir-tracker",
                "buffer-render",
                "auto-scroll",
                "error-detector"
            ]
        );
    }

    #[test]
    fn test_dir_tracker_updates() {
        let mut chain = FilterChain::standard();
        let mut h = Harness::new();

        h.run(&mut chain, "cd /tmp\r\n");
        assert_eq!(h.tracked_dir, Some(PathBuf::from("/tmp")));

        h.run(&mut chain, "pushd /var/log\r\n");
        assert_eq!(h.tracked_dir, Some(PathBuf::from("/var/log")));

        h.run(&mut chain, "popd /home\r\n");
        assert_eq!(h.tracked_dir, Some(PathBuf::from("/home")));
    }

    #[test]
    fn test_dir_tracker_ignores_non_matches() {
        let mut chain = FilterChain::standard();
        let mut h = Harness::new();

        h.run(&mut chain, "cd /tmp\r\n");
        // Bare cd, similarly-named commands, and mid-line text all
        // leave the tracked directory alone
        h.run(&mut chain, "cd\r\n");
        h.run(&mut chain, "cdx foo\r\n");
        h.run(&mut chain, "echo cd /other\r\n");

        assert_eq!(h.tracked_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_dir_changed_event_once() {
        let mut chain = FilterChain::standard();
        let mut h = Harness::new();

        h.run(&mut chain, "cd /tmp\r\n");
        h.run(&mut chain, "cd /tmp\r\n");

        let changes: Vec<_> = h
            .events
            .iter()
            .filter(|e| matches!(e, FilterEvent::DirChanged(_)))
            .collect();
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_command_not_found_notification() {
        let mut chain = FilterChain::standard();
        let mut h = Harness::new();

        let chunk = h.run(&mut chain, "foo: command not found\n");

        // The chunk text is unchanged apart from the style tag
        assert_eq!(chunk.text, "foo: command not found\n");
        assert_eq!(chunk.class, ChunkClass::Output);
        assert!(h
            .events
            .contains(&FilterEvent::CommandNotFound("foo".to_string())));
    }

    #[test]
    fn test_command_not_found_zsh_prefix() {
        let mut chain = FilterChain::standard();
        let mut h = Harness::new();

        h.run(&mut chain, "zsh: command not found: frob\n");
        assert!(h
            .events
            .contains(&FilterEvent::CommandNotFound("frob".to_string())));
    }

    #[test]
    fn test_pipeline_feeds_buffer_and_snaps_scroll() {
        let mut chain = FilterChain::standard();
        let mut h = Harness::new();

        h.run(&mut chain, "one\r\ntwo\r\n");
        h.buffer.scroll_up(1);
        h.run(&mut chain, "three\r\n");

        assert!(!h.buffer.is_scrolled());
        assert_eq!(h.buffer.plain_lines().get(2).map(String::as_str), Some("three"));
    }
}
