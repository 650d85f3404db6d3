//! zpanel - a dedicated zsh panel for your terminal
//!
//! zpanel docks a managed interactive zsh session at the bottom of the
//! terminal. The shell is launched with its own configuration directory
//! (`ZDOTDIR=~/.zpanel`), sourcing a managed zshrc that zpanel
//! synthesizes on first use; output streams through a filter pipeline
//! that tracks the working directory and surfaces command-not-found
//! errors; name completion is answered by the shell itself through a
//! non-blocking shell-out.
//!
//! # Features
//!
//! - **Dockable panel**: toggle without disturbing the running shell
//! - **Managed zshrc**: synthesized from a template, sourced at launch
//! - **Directory tracking**: the status bar follows cd/pushd/popd
//! - **Error notifications**: command-not-found surfaces as a toast
//! - **Shell-backed completion**: functions, parameters, aliases,
//!   commands
//! - **Color schemes**: default, nord, dracula
//!
//! # Quick Start
//!
//! ```text
//! zpanel             # Start with the panel open
//! zpanel --no-panel  # Start with the panel hidden
//! zpanel -s /bin/zsh # Explicit shell binary
//! ```
//!
//! # Keybindings (Ctrl+B prefix)
//!
//! | Key | Action |
//! |-----|--------|
//! | t | Toggle panel |
//! | e | Edit zshrc in $EDITOR |
//! | r | Reload panel config |
//! | l | Clear panel and re-issue prompt |
//! | x | Export NAME=VALUE into the session |
//! | q | Quit |

mod completion;
mod config;
mod core;
mod panel;
mod ui;

use std::env;
use std::io::Write;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers, MouseEventKind};
use crossterm::terminal;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::completion::{complete_at_cursor, CompletionBridge, CompletionSelector, InputTracker};
use crate::config::{Config, ConfigStore, PrefixKey};
use crate::core::pty::LaunchSpec;
use crate::core::session::{SessionEvent, SessionRegistry};
use crate::panel::Panel;
use crate::ui::{KeyMapper, PanelRenderer, PanelView};

/// The one session zpanel manages
const SESSION_NAME: &str = "zpanel";

/// How long notifications stay on the status bar
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(4);

/// Command line options
#[derive(Default)]
struct CliOptions {
    /// Shell binary override
    shell: Option<String>,
    /// Panel fraction override
    fraction: Option<f32>,
    /// Start with the panel hidden
    start_hidden: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("zpanel {}", VERSION);
}

fn print_help() {
    eprintln!("zpanel {} - a dedicated zsh panel for your terminal", VERSION);
    eprintln!();
    eprintln!("Usage: zpanel [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <PATH>    Shell binary (default: config, then $SHELL)");
    eprintln!("  -F, --fraction <F>    Panel height fraction, 0.1-0.9");
    eprintln!("      --no-panel        Start with the panel hidden");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keybindings (Ctrl+B prefix, configurable):");
    eprintln!("  Ctrl+B, t             Toggle panel");
    eprintln!("  Ctrl+B, e             Edit zshrc in $EDITOR");
    eprintln!("  Ctrl+B, r             Reload panel config");
    eprintln!("  Ctrl+B, l             Clear panel and re-issue prompt");
    eprintln!("  Ctrl+B, x             Export NAME=VALUE into the session");
    eprintln!("  Ctrl+B, q             Quit");
    eprintln!("  Tab                   Complete the token at the cursor");
    eprintln!("  Shift+PageUp/Down     Scroll the panel");
    eprintln!();
    eprintln!("Configuration: ~/.zpanel/config.toml");
    eprintln!("Shell startup file: ~/.zpanel/zshrc");
    eprintln!();
    eprintln!("Color schemes: default, nord, dracula");
}

fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                opts.shell = Some(args[i].clone());
            }
            "-F" | "--fraction" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing fraction argument".to_string());
                }
                let fraction: f32 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid fraction: {}", args[i]))?;
                opts.fraction = Some(fraction);
            }
            "--no-panel" => {
                opts.start_hidden = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(opts)
}

fn main() -> anyhow::Result<()> {
    let opts = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let store = match ConfigStore::new() {
        Some(store) => store,
        None => {
            eprintln!("Error: could not determine the home directory");
            std::process::exit(1);
        }
    };

    // Initialize logging to file
    std::fs::create_dir_all(store.dir())?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(store.log_path())
        .ok();

    if let Some(file) = log_file {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    info!("zpanel starting...");
    run_panel(opts, store)
}

/// Set up config, shell, and terminal, then run the event loop
fn run_panel(opts: CliOptions, store: ConfigStore) -> anyhow::Result<()> {
    let mut config = Config::load(&store);

    // Command line overrides the config file
    if let Some(shell) = opts.shell {
        config.shell = Some(shell);
    }
    if let Some(fraction) = opts.fraction {
        config.panel_fraction = fraction;
    }

    // Materialize the managed zshrc before the shell needs it
    let outcome = store.ensure_zshrc()?;
    if outcome.created && config.auto_edit {
        let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
        info!("Opening synthesized zshrc in {}", editor);
        let _ = store.edit_zshrc(&editor);
    }

    let shell = config.resolve_shell();
    let spec = LaunchSpec {
        shell: shell.clone(),
        config_dir: store.dir().to_path_buf(),
        zshrc: outcome.path,
        cwd: env::current_dir().ok(),
    };

    info!("Shell: {}", shell.display());
    info!("Config dir: {}", store.dir().display());

    let (cols, rows) = PanelRenderer::size()?;
    info!("Terminal size: {}x{}", cols, rows);

    let mut panel = Panel::new(config.panel_fraction, cols, rows);
    let mut renderer = PanelRenderer::with_color_scheme(config.get_color_scheme());
    renderer.init()?;

    let result = run_main_loop(
        &mut panel,
        &mut renderer,
        &store,
        config,
        spec,
        opts.start_hidden,
    );

    // Cleanup - multiple attempts to ensure it works
    let _ = renderer.cleanup();
    let _ = terminal::disable_raw_mode();

    print!("\x1b[?1049l"); // Leave alternate screen
    print!("\x1b[?25h"); // Show cursor
    print!("\x1b[0m"); // Reset attributes
    let _ = std::io::stdout().flush();

    result
}

/// Record a transient status bar message
fn notify(slot: &mut Option<(String, Instant)>, message: impl Into<String>) {
    *slot = Some((message.into(), Instant::now()));
}

/// Find-or-create the session sized to the panel content area
fn ensure_session(
    registry: &mut SessionRegistry,
    spec: &LaunchSpec,
    panel: &Panel,
    spawn_error: &mut Option<String>,
) {
    let (cols, rows) = panel.content_size();
    match registry.ensure(SESSION_NAME, spec, cols, rows) {
        Ok(session) => {
            session.resize(cols, rows);
            *spawn_error = None;
        }
        Err(e) => {
            error!("Failed to start session: {}", e);
            *spawn_error = Some(e.to_string());
        }
    }
}

/// Main event loop
fn run_main_loop(
    panel: &mut Panel,
    renderer: &mut PanelRenderer,
    store: &ConfigStore,
    mut config: Config,
    spec: LaunchSpec,
    start_hidden: bool,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);

    let mut registry = SessionRegistry::new();
    let mut prefix_key =
        PrefixKey::parse(&config.prefix_key).unwrap_or(PrefixKey { char: 'b' });
    let mut bridge = CompletionBridge::new(
        config.resolve_shell(),
        Duration::from_millis(config.completion.timeout_ms),
    );
    let mut selector = CompletionSelector::new();
    let mut tracker = InputTracker::new();

    let mut prefix_mode = false;
    let mut export_input: Option<String> = None;
    let mut notification: Option<(String, Instant)> = None;
    let mut spawn_error: Option<String> = None;
    let mut needs_render = true;

    if !start_hidden {
        panel.toggle();
        ensure_session(&mut registry, &spec, panel, &mut spawn_error);
    }

    loop {
        // Process session output through the filter pipeline
        if let Some(session) = registry.get_mut(SESSION_NAME) {
            if session.process_output() {
                needs_render = true;
            }
            for event in session.take_events() {
                match event {
                    SessionEvent::CommandNotFound(token) => {
                        notify(&mut notification, format!("command not found: {}", token));
                    }
                    SessionEvent::DirChanged(dir) => {
                        debug!("Tracked directory: {}", dir.display());
                    }
                    SessionEvent::Exited(code) => {
                        notify(
                            &mut notification,
                            match code {
                                Some(code) => format!("session exited ({})", code),
                                None => "session exited".to_string(),
                            },
                        );
                    }
                }
                needs_render = true;
            }
        }

        // Completion results arriving from the worker
        if let Some(candidates) = bridge.poll() {
            if selector.visible {
                selector.set_candidates(candidates);
                needs_render = true;
            }
        }

        // Expire the notification toast
        if let Some((_, shown_at)) = &notification {
            if shown_at.elapsed() >= NOTIFY_TIMEOUT {
                notification = None;
                needs_render = true;
            }
        }

        if needs_render {
            needs_render = false;
            let view = PanelView {
                panel,
                session: registry.get(SESSION_NAME),
                prefix_char: prefix_key.char,
                prefix_mode,
                notification: notification.as_ref().map(|(m, _)| m.as_str()),
                completion: Some(&selector),
                export_input: export_input.as_deref(),
                spawn_error: spawn_error.as_deref(),
            };
            renderer.render(&view)?;
        }

        // Poll for events
        if !event::poll(poll_timeout)? {
            continue;
        }
        match event::read()? {
            Event::Key(key_event) => {
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                needs_render = true;

                // Handle the export prompt line
                if export_input.is_some() {
                    match key_event.code {
                        KeyCode::Esc => {
                            export_input = None;
                        }
                        KeyCode::Enter => {
                            let assignment = export_input
                                .take()
                                .unwrap_or_default()
                                .trim()
                                .to_string();
                            let valid = assignment
                                .split_once('=')
                                .map(|(name, _)| {
                                    !name.is_empty()
                                        && name
                                            .chars()
                                            .all(|c| c.is_ascii_alphanumeric() || c == '_')
                                })
                                .unwrap_or(false);
                            if !valid {
                                notify(&mut notification, "usage: NAME=VALUE");
                            } else if let Some(session) = registry.get_mut(SESSION_NAME) {
                                // Literal `export` line into the shell's input
                                match session.send_line(&format!("export {}", assignment)) {
                                    Ok(()) => notify(
                                        &mut notification,
                                        format!("exported {}", assignment),
                                    ),
                                    Err(e) => notify(&mut notification, e.to_string()),
                                }
                            } else {
                                notify(&mut notification, "no session");
                            }
                        }
                        KeyCode::Backspace => {
                            if let Some(input) = export_input.as_mut() {
                                input.pop();
                            }
                        }
                        KeyCode::Char(c) => {
                            if let Some(input) = export_input.as_mut() {
                                input.push(c);
                            }
                        }
                        _ => {}
                    }
                    continue;
                }

                // Handle the completion popup
                if selector.visible {
                    match key_event.code {
                        KeyCode::Esc => {
                            selector.hide();
                            bridge.cancel();
                        }
                        KeyCode::Up => selector.select_up(),
                        KeyCode::Down => selector.select_down(),
                        KeyCode::Enter | KeyCode::Tab => {
                            if let Some(suffix) = selector.confirm() {
                                if let Some(session) = registry.get_mut(SESSION_NAME) {
                                    let _ = session.write(suffix.as_bytes());
                                    tracker.push_str(&suffix);
                                }
                            }
                        }
                        KeyCode::Backspace => {
                            // Real edit: reaches the shell and narrows
                            // the popup together
                            if let Some(session) = registry.get_mut(SESSION_NAME) {
                                let _ = session.write(&[0x7F]);
                            }
                            tracker.observe_key(&key_event);
                            if !selector.backspace() {
                                selector.hide();
                                bridge.cancel();
                            }
                        }
                        KeyCode::Char(c)
                            if !key_event.modifiers.contains(KeyModifiers::CONTROL) =>
                        {
                            if let Some(session) = registry.get_mut(SESSION_NAME) {
                                let _ = session.write(c.to_string().as_bytes());
                            }
                            tracker.observe_key(&key_event);
                            selector.input_char(c);
                        }
                        _ => {
                            selector.hide();
                            bridge.cancel();
                        }
                    }
                    continue;
                }

                // Handle prefix mode
                if prefix_mode {
                    prefix_mode = false;
                    match key_event.code {
                        KeyCode::Esc => {}
                        // Toggle panel
                        KeyCode::Char('t') => {
                            if panel.toggle() {
                                ensure_session(&mut registry, &spec, panel, &mut spawn_error);
                            }
                            // Hiding detaches; the shell keeps running
                        }
                        // Reload panel config (tool-side only; the
                        // running shell is not re-sourced)
                        KeyCode::Char('r') => {
                            config = Config::load(store);
                            panel.set_fraction(config.panel_fraction);
                            renderer.set_color_scheme(config.get_color_scheme());
                            prefix_key = PrefixKey::parse(&config.prefix_key)
                                .unwrap_or(PrefixKey { char: 'b' });
                            bridge = CompletionBridge::new(
                                config.resolve_shell(),
                                Duration::from_millis(config.completion.timeout_ms),
                            );
                            if let Some(session) = registry.get_mut(SESSION_NAME) {
                                let (cw, ch) = panel.content_size();
                                session.resize(cw, ch);
                            }
                            notify(&mut notification, "panel config reloaded");
                        }
                        // Edit the zshrc in $EDITOR
                        KeyCode::Char('e') => {
                            let editor =
                                env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
                            renderer.cleanup()?;
                            let status = store.edit_zshrc(&editor);
                            renderer.init()?;
                            match status {
                                Ok(_) => notify(
                                    &mut notification,
                                    "zshrc saved; restart the session to apply",
                                ),
                                Err(e) => notify(
                                    &mut notification,
                                    format!("editor failed: {}", e),
                                ),
                            }
                        }
                        // Clear panel and re-issue the prompt
                        KeyCode::Char('l') => {
                            if let Some(session) = registry.get_mut(SESSION_NAME) {
                                let _ = session.clear_and_reprompt();
                            }
                        }
                        // Export prompt
                        KeyCode::Char('x') => {
                            export_input = Some(String::new());
                        }
                        // Quit
                        KeyCode::Char('q') => {
                            info!("Quit requested");
                            break;
                        }
                        // Prefix twice sends the control byte through
                        KeyCode::Char(c) if c == prefix_key.char => {
                            if let Some(session) = registry.get_mut(SESSION_NAME) {
                                let ctrl_code = (c as u8) - b'a' + 1;
                                let _ = session.write(&[ctrl_code]);
                            }
                        }
                        _ => {}
                    }
                    continue;
                }

                // Check for the prefix key
                if key_event.modifiers.contains(KeyModifiers::CONTROL)
                    && key_event.code == KeyCode::Char(prefix_key.char)
                {
                    prefix_mode = true;
                    continue;
                }

                // Keys only reach the session through a visible panel
                if !panel.visible || !panel.focused {
                    continue;
                }

                // Scrollback keys
                if key_event.modifiers.contains(KeyModifiers::SHIFT) {
                    if let Some(session) = registry.get_mut(SESSION_NAME) {
                        match key_event.code {
                            KeyCode::PageUp => {
                                session.buffer.scroll_up(10);
                                continue;
                            }
                            KeyCode::PageDown => {
                                session.buffer.scroll_down(10);
                                continue;
                            }
                            _ => {}
                        }
                    }
                }

                // Tab asks the completion bridge when it can name a
                // token; everything else (and Tab otherwise) goes to
                // the shell
                if key_event.code == KeyCode::Tab
                    && key_event.modifiers.is_empty()
                    && config.completion.enabled
                {
                    let line = tracker.line();
                    let (start, end) = complete_at_cursor(line, tracker.cursor());
                    if start < end {
                        let prefix = line[start..end].to_string();
                        selector.open(&prefix);
                        bridge.request(&prefix);
                        continue;
                    }
                }

                if let Some(session) = registry.get_mut(SESSION_NAME) {
                    // Return to live view on any input
                    session.buffer.scroll_to_bottom();
                    tracker.observe_key(&key_event);
                    if let Some(bytes) = KeyMapper::map(&key_event) {
                        if let Err(e) = session.write(&bytes) {
                            debug!("Write to session failed: {}", e);
                        }
                    }
                }
            }

            Event::Mouse(mouse_event) => {
                if !panel.visible || !panel.contains(mouse_event.column, mouse_event.row) {
                    continue;
                }
                if let Some(session) = registry.get_mut(SESSION_NAME) {
                    match mouse_event.kind {
                        MouseEventKind::ScrollUp => {
                            session.buffer.scroll_up(3);
                            needs_render = true;
                        }
                        MouseEventKind::ScrollDown => {
                            session.buffer.scroll_down(3);
                            needs_render = true;
                        }
                        _ => {}
                    }
                }
            }

            Event::Resize(cols, rows) => {
                info!("Resize: {}x{}", cols, rows);
                panel.set_size(cols, rows);
                if let Some(session) = registry.get_mut(SESSION_NAME) {
                    let (cw, ch) = panel.content_size();
                    session.resize(cw, ch);
                }
                needs_render = true;
            }

            _ => {}
        }
    }

    Ok(())
}
