//! Line-oriented output buffer for the panel view.
//!
//! Output bytes are run through a `vte` parser: printable text and SGR
//! styling pass through into styled line segments, line controls
//! (CR/LF/BS/TAB) are honored, clear-screen empties the view, and
//! cursor addressing is dropped. The buffer keeps a bounded scrollback
//! with a view offset anchored at the live bottom.

use std::collections::VecDeque;

use unicode_width::UnicodeWidthChar;
use vte::{Params, Parser, Perform};

/// Maximum retained lines
const SCROLLBACK_LIMIT: usize = 2000;

/// A run of text under a single SGR state
#[derive(Debug, Clone, Default, PartialEq)]
struct Segment {
    /// SGR escape prefix; empty means terminal default
    sgr: String,
    text: String,
}

/// One buffered output line
#[derive(Debug, Clone, Default)]
pub struct Line {
    segments: Vec<Segment>,
}

impl Line {
    fn push_char(&mut self, ch: char, sgr: &str) {
        match self.segments.last_mut() {
            Some(seg) if seg.sgr == sgr => seg.text.push(ch),
            _ => self.segments.push(Segment {
                sgr: sgr.to_string(),
                text: ch.to_string(),
            }),
        }
    }

    fn backspace(&mut self) {
        while let Some(seg) = self.segments.last_mut() {
            if seg.text.pop().is_some() {
                if seg.text.is_empty() {
                    self.segments.pop();
                }
                return;
            }
            self.segments.pop();
        }
    }

    fn clear(&mut self) {
        self.segments.clear();
    }

    /// Plain text without styling
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Display width of the plain text
    pub fn width(&self) -> usize {
        self.segments
            .iter()
            .flat_map(|s| s.text.chars())
            .map(|c| c.width().unwrap_or(0))
            .sum()
    }

    /// Render with embedded SGR, clipped to `max_width` columns.
    ///
    /// Ends with a reset whenever any styling was emitted so state never
    /// leaks into the next line.
    pub fn render_clipped(&self, max_width: usize) -> String {
        let mut out = String::new();
        let mut used = 0usize;
        let mut styled = false;

        'outer: for seg in &self.segments {
            if !seg.sgr.is_empty() {
                out.push_str(&seg.sgr);
                styled = true;
            }
            for ch in seg.text.chars() {
                let w = ch.width().unwrap_or(0);
                if used + w > max_width {
                    break 'outer;
                }
                out.push(ch);
                used += w;
            }
        }

        if styled {
            out.push_str("\x1b[0m");
        }
        out
    }
}

/// Performer state behind the vte parser
struct Grid {
    lines: VecDeque<Line>,
    max_lines: usize,
    /// Active SGR prefix for incoming text
    cur_sgr: String,
    /// A bare CR was seen; the next print overwrites the current line
    pending_cr: bool,
    /// View is cleared on the next full repaint
    cleared: bool,
}

impl Grid {
    fn new(max_lines: usize) -> Self {
        let mut lines = VecDeque::new();
        lines.push_back(Line::default());
        Self {
            lines,
            max_lines,
            cur_sgr: String::new(),
            pending_cr: false,
            cleared: false,
        }
    }

    fn current(&mut self) -> &mut Line {
        // Invariant: lines is never empty
        if self.lines.is_empty() {
            self.lines.push_back(Line::default());
        }
        self.lines.back_mut().unwrap()
    }

    fn newline(&mut self) {
        self.pending_cr = false;
        self.lines.push_back(Line::default());
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    fn clear_all(&mut self) {
        self.lines.clear();
        self.lines.push_back(Line::default());
        self.cleared = true;
    }

    fn take_pending_cr(&mut self) {
        if self.pending_cr {
            self.pending_cr = false;
            self.current().clear();
        }
    }
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        self.take_pending_cr();
        let sgr = self.cur_sgr.clone();
        self.current().push_char(c, &sgr);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            b'\r' => self.pending_cr = true,
            0x08 => {
                self.take_pending_cr();
                self.current().backspace();
            }
            b'\t' => {
                self.take_pending_cr();
                let width = self.current().width();
                let pad = 8 - (width % 8);
                let sgr = self.cur_sgr.clone();
                for _ in 0..pad {
                    self.current().push_char(' ', &sgr);
                }
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        match action {
            'm' => {
                let codes: Vec<String> = params
                    .iter()
                    .map(|sub| {
                        sub.iter()
                            .map(|p| p.to_string())
                            .collect::<Vec<_>>()
                            .join(":")
                    })
                    .collect();
                let joined = codes.join(";");
                if joined.is_empty() || joined == "0" {
                    self.cur_sgr.clear();
                } else {
                    self.cur_sgr = format!("\x1b[{}m", joined);
                }
            }
            'J' => {
                // ED 2/3: shell clear; partial erases are dropped
                let mode = params.iter().next().and_then(|p| p.first().copied());
                if matches!(mode, Some(2) | Some(3)) {
                    self.clear_all();
                }
            }
            'K' => {
                let mode = params.iter().next().and_then(|p| p.first().copied());
                if mode == Some(2) {
                    self.current().clear();
                }
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}
    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

/// Scrollable line buffer for a session's output
pub struct ScrollBuffer {
    parser: Parser,
    grid: Grid,
    /// Lines scrolled up from the live bottom; 0 = live
    scroll_offset: usize,
}

impl Default for ScrollBuffer {
    fn default() -> Self {
        Self::new(SCROLLBACK_LIMIT)
    }
}

impl ScrollBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            parser: Parser::new(),
            grid: Grid::new(max_lines),
            scroll_offset: 0,
        }
    }

    /// Feed output text through the escape parser
    pub fn feed(&mut self, text: &str) {
        for byte in text.bytes() {
            self.parser.advance(&mut self.grid, byte);
        }
        if self.grid.cleared {
            self.grid.cleared = false;
            self.scroll_offset = 0;
        }
    }

    #[allow(dead_code)]
    pub fn line_count(&self) -> usize {
        self.grid.lines.len()
    }

    /// Plain text of the buffered lines (newest last)
    #[allow(dead_code)]
    pub fn plain_lines(&self) -> Vec<String> {
        self.grid.lines.iter().map(|l| l.text()).collect()
    }

    /// Lines for a viewport of `height` rows, clipped to `width`,
    /// honoring the scroll offset
    pub fn visible_lines(&self, height: usize, width: usize) -> Vec<String> {
        let total = self.grid.lines.len();
        let end = total.saturating_sub(self.scroll_offset.min(total));
        let start = end.saturating_sub(height);
        self.grid
            .lines
            .iter()
            .skip(start)
            .take(end - start)
            .map(|l| l.render_clipped(width))
            .collect()
    }

    /// Display width of the live bottom line (cursor column)
    pub fn cursor_col(&self) -> usize {
        self.grid.lines.back().map(|l| l.width()).unwrap_or(0)
    }

    pub fn scroll_up(&mut self, n: usize) {
        let max = self.grid.lines.len().saturating_sub(1);
        self.scroll_offset = (self.scroll_offset + n).min(max);
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(n);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn is_scrolled(&self) -> bool {
        self.scroll_offset > 0
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Drop all content (panel clear)
    pub fn clear(&mut self) {
        self.grid.clear_all();
        self.grid.cleared = false;
        self.scroll_offset = 0;
    }
}
