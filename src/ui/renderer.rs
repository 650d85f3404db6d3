//! Panel renderer using crossterm
//!
//! Paints the host area, the docked panel, the status bar, and the
//! overlays (completion popup, export prompt, notifications) on every
//! frame. Rendering is line-oriented: session output lines carry their
//! own SGR styling and are clipped to the panel width.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use unicode_width::UnicodeWidthStr;

use crate::completion::CompletionSelector;
use crate::config::ColorScheme;
use crate::core::session::Session;
use crate::panel::Panel;

/// Everything one frame needs
pub struct PanelView<'a> {
    pub panel: &'a Panel,
    pub session: Option<&'a Session>,
    pub prefix_char: char,
    pub prefix_mode: bool,
    pub notification: Option<&'a str>,
    pub completion: Option<&'a CompletionSelector>,
    /// Export prompt input, when the prompt line is active
    pub export_input: Option<&'a str>,
    /// Shown in the panel body when the shell could not be spawned
    pub spawn_error: Option<&'a str>,
}

/// Panel renderer
pub struct PanelRenderer {
    scheme: ColorScheme,
    initialized: bool,
}

impl PanelRenderer {
    pub fn with_color_scheme(scheme: ColorScheme) -> Self {
        Self {
            scheme,
            initialized: false,
        }
    }

    pub fn set_color_scheme(&mut self, scheme: ColorScheme) {
        self.scheme = scheme;
    }

    /// Current terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            crossterm::event::EnableMouseCapture,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        // Synchronized output mode (reduces flicker)
        write!(stdout, "\x1b[?2026h")?;
        stdout.flush()?;

        self.initialized = true;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, Show);
        let _ = execute!(stdout, EnableLineWrap);
        let _ = execute!(stdout, crossterm::event::DisableMouseCapture);
        let _ = execute!(stdout, LeaveAlternateScreen);
        let _ = stdout.flush();

        terminal::disable_raw_mode()?;
        Ok(())
    }

    /// Paint one full frame
    pub fn render(&mut self, view: &PanelView<'_>) -> io::Result<()> {
        let mut out = io::stdout();
        let cols = view.panel.cols();
        let rows = view.panel.rows();
        if cols == 0 || rows < 3 {
            return Ok(());
        }

        queue!(out, Hide)?;

        let host_end = if view.panel.visible {
            view.panel.origin_row()
        } else {
            rows.saturating_sub(1)
        };
        self.render_host_area(&mut out, view, cols, host_end)?;

        if view.panel.visible {
            self.render_panel(&mut out, view, cols)?;
        }

        self.render_status_bar(&mut out, view, cols, rows)?;

        if let Some(selector) = view.completion.filter(|s| s.visible) {
            self.render_completion_popup(&mut out, view, selector, cols)?;
        }

        self.place_cursor(&mut out, view)?;
        out.flush()
    }

    /// Host rows above the panel: a small placeholder with the key help
    fn render_host_area(
        &self,
        out: &mut impl Write,
        view: &PanelView<'_>,
        cols: u16,
        host_end: u16,
    ) -> io::Result<()> {
        let p = view.prefix_char;
        let title = format!(" zpanel {} ", env!("CARGO_PKG_VERSION"));
        let help = [
            format!("  Ctrl+{p}, t   toggle panel"),
            format!("  Ctrl+{p}, e   edit zshrc"),
            format!("  Ctrl+{p}, r   reload panel config"),
            format!("  Ctrl+{p}, l   clear panel"),
            format!("  Ctrl+{p}, x   export NAME=VALUE"),
            format!("  Ctrl+{p}, q   quit"),
        ];

        for row in 0..host_end {
            queue!(out, MoveTo(0, row), ResetColor)?;
            match row {
                0 => {
                    queue!(
                        out,
                        SetForegroundColor(self.scheme.host_accent.to_crossterm()),
                        Print(clip(&title, cols as usize)),
                        ResetColor
                    )?;
                }
                r if (2..2 + help.len() as u16).contains(&r) => {
                    let line = &help[(r - 2) as usize];
                    queue!(
                        out,
                        SetForegroundColor(self.scheme.host_dim.to_crossterm()),
                        Print(clip(line, cols as usize)),
                        ResetColor
                    )?;
                }
                _ => {}
            }
            queue!(out, Clear(ClearType::UntilNewLine))?;
        }
        Ok(())
    }

    /// Border row and session content
    fn render_panel(
        &self,
        out: &mut impl Write,
        view: &PanelView<'_>,
        cols: u16,
    ) -> io::Result<()> {
        let panel = view.panel;
        let border_color = if panel.focused {
            self.scheme.panel_border_focused
        } else {
            self.scheme.panel_border
        };

        // Border row with embedded title
        let title = match view.session {
            Some(session) => {
                let dir = session
                    .tracked_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "~".to_string());
                format!(" {} — {} ", session.name, dir)
            }
            None => " no session ".to_string(),
        };
        let title = clip(&title, cols.saturating_sub(4) as usize);
        let title_width = title.width();
        let mut border = String::from("──");
        border.push_str(&title);
        let remaining = (cols as usize).saturating_sub(2 + title_width);
        border.extend(std::iter::repeat('─').take(remaining));

        queue!(
            out,
            MoveTo(0, panel.origin_row()),
            SetForegroundColor(border_color.to_crossterm()),
            Print(border),
            ResetColor,
            Clear(ClearType::UntilNewLine)
        )?;

        // Content rows
        let (x, y, w, h) = panel.content_rect();
        if let Some(error) = view.spawn_error {
            queue!(
                out,
                MoveTo(x, y),
                SetForegroundColor(self.scheme.notify_bg.to_crossterm()),
                Print(clip(error, w as usize)),
                ResetColor,
                Clear(ClearType::UntilNewLine)
            )?;
            for row in 1..h {
                queue!(out, MoveTo(x, y + row), Clear(ClearType::UntilNewLine))?;
            }
            return Ok(());
        }

        let lines = match view.session {
            Some(session) => session.buffer.visible_lines(h as usize, w as usize),
            None => Vec::new(),
        };
        for row in 0..h {
            queue!(out, MoveTo(x, y + row), ResetColor)?;
            if let Some(line) = lines.get(row as usize) {
                queue!(
                    out,
                    SetForegroundColor(self.scheme.output_fg.to_crossterm()),
                    Print(line),
                    ResetColor
                )?;
            }
            queue!(out, Clear(ClearType::UntilNewLine))?;
        }
        Ok(())
    }

    /// Bottom status bar with prompt/notification overlays
    fn render_status_bar(
        &self,
        out: &mut impl Write,
        view: &PanelView<'_>,
        cols: u16,
        rows: u16,
    ) -> io::Result<()> {
        let row = rows.saturating_sub(1);
        let width = cols as usize;

        // Export prompt replaces the whole bar while active
        if let Some(input) = view.export_input {
            let text = pad_to(&format!(" export: {}█", input), width);
            queue!(
                out,
                MoveTo(0, row),
                SetBackgroundColor(self.scheme.notify_bg.to_crossterm()),
                SetForegroundColor(self.scheme.notify_fg.to_crossterm()),
                Print(text),
                ResetColor
            )?;
            return Ok(());
        }

        let mut left = String::from(" zpanel");
        if view.prefix_mode {
            left.push_str(" [prefix]");
        }
        if let Some(session) = view.session {
            left.push_str(" │ ");
            left.push_str(&session.name);
            if let Some(ref dir) = session.tracked_dir {
                left.push_str(" │ ");
                left.push_str(&dir.display().to_string());
            }
            if session.buffer.is_scrolled() {
                left.push_str(&format!(" │ [scroll +{}]", session.buffer.scroll_offset()));
            }
            if !session.is_running() {
                left.push_str(" │ exited");
            }
        }

        let right = view.notification.unwrap_or("");
        let right = clip(right, width.saturating_sub(2));
        let right_width = right.width();

        let left_space = width.saturating_sub(right_width + if right_width > 0 { 2 } else { 0 });
        let left = pad_to(&clip(&left, left_space), left_space);

        queue!(
            out,
            MoveTo(0, row),
            SetBackgroundColor(self.scheme.status_bar_bg.to_crossterm()),
            SetForegroundColor(self.scheme.status_bar_fg.to_crossterm()),
            Print(left)
        )?;
        if right_width > 0 {
            queue!(
                out,
                SetBackgroundColor(self.scheme.notify_bg.to_crossterm()),
                SetForegroundColor(self.scheme.notify_fg.to_crossterm()),
                Print(format!(" {} ", right))
            )?;
        }
        queue!(out, ResetColor)?;
        Ok(())
    }

    /// Completion popup anchored above the status bar
    fn render_completion_popup(
        &self,
        out: &mut impl Write,
        view: &PanelView<'_>,
        selector: &CompletionSelector,
        cols: u16,
    ) -> io::Result<()> {
        let rows = view.panel.rows();
        let items = selector.visible_items();

        let header = if selector.loading {
            format!(" complete: {}… ", selector.prefix)
        } else if items.is_empty() {
            format!(" complete: {} (no matches) ", selector.prefix)
        } else {
            format!(" complete: {} ", selector.prefix)
        };

        let content_width = items
            .iter()
            .map(|(_, c, _)| c.width())
            .chain(std::iter::once(header.width()))
            .max()
            .unwrap_or(0);
        let width = (content_width + 2).min(cols.saturating_sub(2) as usize);
        let height = items.len() as u16 + 1;
        let top = rows.saturating_sub(1).saturating_sub(height);
        let x = 1u16;

        queue!(
            out,
            MoveTo(x, top),
            SetBackgroundColor(self.scheme.popup_bg.to_crossterm()),
            SetForegroundColor(self.scheme.popup_fg.to_crossterm()),
            SetAttribute(Attribute::Bold),
            Print(pad_to(&header, width)),
            SetAttribute(Attribute::Reset),
            ResetColor
        )?;

        for (i, (_, candidate, is_selected)) in items.iter().enumerate() {
            let text = pad_to(&format!(" {}", candidate), width);
            let (bg, fg) = if *is_selected {
                (self.scheme.popup_selected_bg, self.scheme.popup_selected_fg)
            } else {
                (self.scheme.popup_bg, self.scheme.popup_fg)
            };
            queue!(
                out,
                MoveTo(x, top + 1 + i as u16),
                SetBackgroundColor(bg.to_crossterm()),
                SetForegroundColor(fg.to_crossterm()),
                Print(text),
                ResetColor
            )?;
        }
        Ok(())
    }

    /// Park the terminal cursor at the end of the live line
    fn place_cursor(&self, out: &mut impl Write, view: &PanelView<'_>) -> io::Result<()> {
        let panel = view.panel;
        let popup_open = view.completion.map(|c| c.visible).unwrap_or(false);
        let prompt_open = view.export_input.is_some();

        let session = match view.session {
            Some(s) if panel.visible && panel.focused && !popup_open && !prompt_open => s,
            _ => return Ok(()),
        };
        if session.buffer.is_scrolled() {
            return Ok(());
        }

        let (x, y, w, h) = panel.content_rect();
        let shown = session
            .buffer
            .visible_lines(h as usize, w as usize)
            .len()
            .min(h as usize);
        if shown == 0 {
            return Ok(());
        }
        let cursor_row = y + shown as u16 - 1;
        let cursor_col = (session.buffer.cursor_col() as u16).min(w.saturating_sub(1)) + x;
        queue!(out, MoveTo(cursor_col, cursor_row), Show)?;
        Ok(())
    }
}

/// Clip a plain string to a display width
fn clip(s: &str, max_width: usize) -> String {
    use unicode_width::UnicodeWidthChar;

    let mut out = String::new();
    let mut used = 0usize;
    for ch in s.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > max_width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out
}

/// Clip then pad a plain string to exactly a display width
fn pad_to(s: &str, width: usize) -> String {
    let mut out = clip(s, width);
    let used = out.width();
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(used)));
    out
}
