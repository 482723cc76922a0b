//! Dedicated OS thread that reads operator commands from stdin and hands
//! tokenized command lines to the tick loop via a shared queue.

use std::io::{BufRead, Write};
use std::thread::{self, JoinHandle};

use codec::Address;

use crate::buffers::CommandBuffer;

/// Spawn the UI thread. Returns immediately; the thread runs until stdin
/// closes or the operator types `exit`.
pub fn spawn(address: Address, is_root: bool, commands: CommandBuffer) -> JoinHandle<()> {
    let prompt = if is_root {
        format!("[[{address}]]> ")
    } else {
        format!("[{address}]> ")
    };

    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();

        loop {
            print!("{prompt}");
            let _ = stdout.flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("stdin read failed: {err}");
                    break;
                }
            }

            let tokens = tokenize(&line);
            if tokens.is_empty() {
                continue;
            }

            if let Err(reason) = validate(&tokens) {
                println!("{reason}");
                continue;
            }

            let exit = tokens[0] == "exit";
            commands.push(tokens);
            if exit {
                break;
            }
        }
    })
}

/// Split a line into tokens, honoring a single pair of double quotes as one
/// token (e.g. `message "hello there"`).
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }

        tokens.push(token);
    }

    tokens
}

fn validate(tokens: &[String]) -> Result<(), String> {
    match tokens[0].as_str() {
        "register" | "advertiser" | "exit" if tokens.len() == 1 => Ok(()),
        "register" | "advertiser" | "exit" => Err(format!("{} takes no arguments", tokens[0])),
        "message" if tokens.len() == 2 => Ok(()),
        "message" => Err("usage: message \"<text>\"".to_string()),
        other => Err(format!("unrecognized command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("register"), vec!["register"]);
        assert_eq!(tokenize("  advertiser  "), vec!["advertiser"]);
    }

    #[test]
    fn tokenize_keeps_a_quoted_argument_together() {
        assert_eq!(
            tokenize(r#"message "hello there""#),
            vec!["message", "hello there"]
        );
    }

    #[test]
    fn validate_rejects_unknown_commands() {
        assert!(validate(&["dance".to_string()]).is_err());
    }

    #[test]
    fn validate_rejects_message_without_text() {
        assert!(validate(&["message".to_string()]).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_message() {
        assert!(validate(&["message".to_string(), "hi".to_string()]).is_ok());
    }
}
