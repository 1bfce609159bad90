//! # Command Line Splitting
//!
//! Plan documents describe actions as single command strings
//! (`kubectl create namespace data`). This module turns such a string into
//! an argument vector the way a POSIX shell would for the simple cases we
//! support: whitespace separation, single quotes, double quotes, and
//! backslash escapes. No expansion, globbing, or pipelines.
//!
//! `${{ ... }}` template expressions are copied through verbatim, spaces
//! included, so they can be resolved per argument after splitting.

use thiserror::Error;

/// Error produced when a command string cannot be split.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandLineError {
    #[error("unterminated {quote} quote starting at byte {position}")]
    UnterminatedQuote { quote: &'static str, position: usize },
    #[error("dangling escape at end of command line")]
    DanglingEscape,
    #[error("command line is empty")]
    Empty,
}

/// Split a command string into program and arguments, removing quotes.
///
/// # Example
/// ```rust
/// use stagehand_util::command_line::split_command_line;
///
/// let argv = split_command_line("helm upgrade --install mongodb bitnami/mongodb --set 'auth.rootUser=admin user'").unwrap();
/// assert_eq!(argv[0], "helm");
/// assert_eq!(argv.last().unwrap(), "auth.rootUser=admin user");
/// ```
pub fn split_command_line(input: &str) -> Result<Vec<String>, CommandLineError> {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut token_started = false;
    let mut characters = input.char_indices().peekable();

    while let Some((position, character)) = characters.next() {
        match character {
            '\'' => {
                token_started = true;
                loop {
                    match characters.next() {
                        Some((_, '\'')) => break,
                        Some((_, quoted)) => current.push(quoted),
                        None => {
                            return Err(CommandLineError::UnterminatedQuote {
                                quote: "single",
                                position,
                            });
                        }
                    }
                }
            }
            '"' => {
                token_started = true;
                loop {
                    match characters.next() {
                        Some((_, '"')) => break,
                        // Inside double quotes a backslash only escapes `"`, `\`, and `$`.
                        Some((_, '\\')) => match characters.peek() {
                            Some((_, next @ ('"' | '\\' | '$'))) => {
                                current.push(*next);
                                characters.next();
                            }
                            _ => current.push('\\'),
                        },
                        Some((_, quoted)) => current.push(quoted),
                        None => {
                            return Err(CommandLineError::UnterminatedQuote {
                                quote: "double",
                                position,
                            });
                        }
                    }
                }
            }
            '\\' => {
                token_started = true;
                match characters.next() {
                    Some((_, escaped)) => current.push(escaped),
                    None => return Err(CommandLineError::DanglingEscape),
                }
            }
            whitespace if whitespace.is_whitespace() => {
                if token_started {
                    arguments.push(std::mem::take(&mut current));
                    token_started = false;
                }
            }
            '$' if input[position..].starts_with("${{") => {
                token_started = true;
                match input[position..].find("}}") {
                    Some(offset) => {
                        let end = position + offset + 2;
                        current.push_str(&input[position..end]);
                        while characters.peek().is_some_and(|(next, _)| *next < end) {
                            characters.next();
                        }
                    }
                    None => current.push('$'),
                }
            }
            other => {
                token_started = true;
                current.push(other);
            }
        }
    }

    if token_started {
        arguments.push(current);
    }
    if arguments.is_empty() {
        return Err(CommandLineError::Empty);
    }
    Ok(arguments)
}
