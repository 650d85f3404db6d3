//! Core session components.
//!
//! This module contains the non-UI machinery of the panel:
//!
//! - **pty**: shell launch and pseudo-terminal I/O (via `portable-pty`)
//! - **buffer**: line-oriented output buffer fed through a `vte` parser
//! - **filter**: the ordered output filter pipeline
//! - **session**: session lifecycle and the name-keyed registry
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry
//! └── Session
//!     ├── ShellPty (I/O with the shell process)
//!     ├── FilterChain (style tag → dir track → render → scroll → errors)
//!     └── ScrollBuffer (styled lines + scrollback)
//! ```

pub mod buffer;
pub mod filter;
pub mod pty;
pub mod session;
