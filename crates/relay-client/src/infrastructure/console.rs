//! Terminal output for the listener loop.

use std::io::Write;

use crate::application::listener::ChatDisplay;

/// Prints chat lines to stdout and status lines to stderr.
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl ChatDisplay for ConsoleDisplay {
    fn show_message(&mut self, sender: &str, content: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout has nowhere to report to.
        let _ = writeln!(out, "{sender}> {content}");
        let _ = out.flush();
    }

    fn show_shutdown(&mut self) {
        eprintln!("warning: the server is shutting down");
    }

    fn show_connection_lost(&mut self, reason: &str) {
        eprintln!("error: connection lost: {reason}");
    }
}
