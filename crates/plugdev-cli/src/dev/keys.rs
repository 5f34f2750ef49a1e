//! Interactive keys while the dev server runs on a terminal.

use console::{Key, Term};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// `r`: rebuild everything now
    Rebuild,
    /// `q` or Ctrl+C
    Quit,
}

pub fn key_command(key: &Key) -> Option<KeyCommand> {
    match key {
        Key::Char('r' | 'R') => Some(KeyCommand::Rebuild),
        Key::Char('q' | 'Q') | Key::Char('\u{3}') | Key::CtrlC => Some(KeyCommand::Quit),
        _ => None,
    }
}

/// Read keys on a background thread. Returns `None` when stdout is not a
/// terminal.
pub fn listen() -> Option<mpsc::Receiver<KeyCommand>> {
    let term = Term::stdout();
    if !term.is_term() {
        return None;
    }

    let (tx, rx) = mpsc::channel(8);
    let spawned = std::thread::Builder::new()
        .name("plugdev-keys".to_string())
        .spawn(move || {
            loop {
                let key = match term.read_key() {
                    Ok(key) => key,
                    Err(err) => {
                        tracing::debug!(error = %err, "Stopped reading keys");
                        return;
                    }
                };
                if let Some(command) = key_command(&key) {
                    if tx.blocking_send(command).is_err() || command == KeyCommand::Quit {
                        return;
                    }
                }
            }
        });

    match spawned {
        Ok(_) => Some(rx),
        Err(err) => {
            tracing::debug!(error = %err, "Key reader unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(key_command(&Key::Char('r')), Some(KeyCommand::Rebuild));
        assert_eq!(key_command(&Key::Char('R')), Some(KeyCommand::Rebuild));
        assert_eq!(key_command(&Key::Char('q')), Some(KeyCommand::Quit));
        assert_eq!(key_command(&Key::CtrlC), Some(KeyCommand::Quit));
        assert_eq!(key_command(&Key::Char('x')), None);
        assert_eq!(key_command(&Key::Enter), None);
    }
}
