//! Completeness check for shell input
//!
//! A lexical scan, not a parse: quotes, escapes, brackets, comments and the
//! `if`/`fi`, `do`/`done`, `case`/`esac` block keywords are tracked. Anything
//! left open means more input is expected; a closer with no opener is invalid.

use kernel_protocol::content::Completeness;
use tracing::debug;

#[derive(Default)]
struct Scanner {
    quote: Option<char>,
    escaped: bool,
    comment: bool,
    brackets: Vec<char>,
    blocks: Vec<&'static str>,
    word: String,
    command_start: bool,
    invalid: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            command_start: true,
            ..Self::default()
        }
    }

    fn in_case(&self) -> bool {
        self.blocks.last() == Some(&"esac")
    }

    fn end_word(&mut self) {
        if self.word.is_empty() {
            return;
        }
        let word = std::mem::take(&mut self.word);
        if !self.command_start {
            return;
        }

        let opens = match word.as_str() {
            "if" => Some("fi"),
            "do" => Some("done"),
            "case" => Some("esac"),
            _ => None,
        };
        if let Some(closer) = opens {
            self.blocks.push(closer);
        } else if matches!(word.as_str(), "fi" | "done" | "esac") {
            if self.blocks.last().copied() == Some(word.as_str()) {
                self.blocks.pop();
            } else {
                self.invalid = true;
            }
        }

        // Keywords that are followed by another command
        self.command_start = matches!(
            word.as_str(),
            "if"
                | "then"
                | "else"
                | "elif"
                | "do"
                | "while"
                | "until"
                | "!"
                | "fi"
                | "done"
                | "esac"
        );
    }

    fn feed(&mut self, c: char) {
        if self.comment {
            if c == '\n' {
                self.comment = false;
                self.command_start = true;
            }
            return;
        }
        if self.escaped {
            self.escaped = false;
            if c != '\n' {
                self.word.push(c);
            }
            return;
        }

        match self.quote {
            Some('\'') => {
                if c == '\'' {
                    self.quote = None;
                }
                self.word.push(c);
                return;
            }
            Some(q) => {
                if c == '\\' {
                    self.escaped = true;
                } else if c == q {
                    self.quote = None;
                }
                self.word.push(c);
                return;
            }
            None => {}
        }

        match c {
            '\\' => self.escaped = true,
            '\'' | '"' | '`' => {
                self.quote = Some(c);
                self.word.push(c);
            }
            '#' if self.word.is_empty() => self.comment = true,
            '(' | '[' | '{' => {
                self.end_word();
                self.brackets.push(c);
                self.command_start = c != '[';
            }
            ')' | ']' | '}' => {
                self.end_word();
                let opener = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if self.brackets.last() == Some(&opener) {
                    self.brackets.pop();
                } else if !(c == ')' && self.in_case()) {
                    self.invalid = true;
                }
                self.command_start = c == ')';
            }
            ';' | '&' | '|' | '\n' => {
                self.end_word();
                self.command_start = true;
            }
            c if c.is_whitespace() => self.end_word(),
            c => self.word.push(c),
        }
    }
}

/// Classify `code` as complete, incomplete or invalid
pub fn check_shell_syntax(code: &str) -> Completeness {
    let code = code.trim_end_matches([' ', '\t']);
    if code.trim().is_empty() {
        return Completeness::Complete;
    }

    let mut scanner = Scanner::new();
    for c in code.chars() {
        scanner.feed(c);
        if scanner.invalid {
            debug!("Input has an unmatched closer");
            return Completeness::Invalid;
        }
    }
    let trailing_continuation = scanner.escaped;
    scanner.end_word();
    if scanner.invalid {
        return Completeness::Invalid;
    }

    let last_line = code.trim_end();
    let dangling_operator = !scanner.comment
        && scanner.quote.is_none()
        && (last_line.ends_with('|') || last_line.ends_with("&&"));

    let verdict = if scanner.quote.is_some()
        || trailing_continuation
        || !scanner.brackets.is_empty()
        || !scanner.blocks.is_empty()
        || dangling_operator
    {
        Completeness::Incomplete
    } else {
        Completeness::Complete
    };
    debug!(?verdict, open_blocks = scanner.blocks.len(), "Checked input");
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_input() {
        assert_eq!(check_shell_syntax(""), Completeness::Complete);
        assert_eq!(check_shell_syntax("echo hello"), Completeness::Complete);
        assert_eq!(check_shell_syntax("if true; then echo yes; fi"), Completeness::Complete);
        assert_eq!(check_shell_syntax("for i in 1 2; do echo $i; done"), Completeness::Complete);
        assert_eq!(
            check_shell_syntax("case $x in\n  a) echo a;;\n  *) echo other;;\nesac"),
            Completeness::Complete
        );
        assert_eq!(check_shell_syntax("echo 'if (' # fi )"), Completeness::Complete);
        assert_eq!(check_shell_syntax("f() { echo hi; }"), Completeness::Complete);
    }

    #[test]
    fn test_incomplete_input() {
        assert_eq!(check_shell_syntax("echo 'unterminated"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("echo \"a"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("ls \\"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("if true; then"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("while true; do\n  sleep 1"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("f() {"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("cat file |"), Completeness::Incomplete);
        assert_eq!(check_shell_syntax("true &&"), Completeness::Incomplete);
    }

    #[test]
    fn test_invalid_input() {
        assert_eq!(check_shell_syntax("fi"), Completeness::Invalid);
        assert_eq!(check_shell_syntax("echo )"), Completeness::Invalid);
        assert_eq!(check_shell_syntax("if true; then echo; done"), Completeness::Invalid);
    }

    #[test]
    fn test_keywords_as_arguments_are_ignored() {
        assert_eq!(check_shell_syntax("echo if do case"), Completeness::Complete);
    }
}
