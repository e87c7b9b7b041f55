//! Presentation shell
//!
//! The coordinator hands screen descriptors to a [`Shell`]; how they are
//! drawn is the shell's business. The binary uses [`ConsoleShell`].

mod console;

pub use console::*;

use crate::view::Screen;

pub trait Shell: Send {
    /// Show `screen`, replacing whatever was shown before
    fn present(&mut self, screen: &Screen);

    /// Copy the current log lines to the log surface
    fn mirror_logs(&mut self, lines: Vec<String>);
}
