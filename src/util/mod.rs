#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell quoting for log previews, percent-decoding, header scanning.

pub mod id;

/// Characters a command-mode argument must not be able to use as shell operators.
pub const SHELL_METACHARS: [char; 5] = [';', '>', '<', '|', '&'];

/// Backslash-prefix every shell operator character in `arg`.
///
/// Only the operator set above is escaped; quoting and expansion characters pass through.
pub fn escape_shell_metachars(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    for ch in arg.chars() {
        if SHELL_METACHARS.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Render argv as one POSIX sh line for log previews; never executed.
pub fn shell_join(args: &[String]) -> String {
    let mut line = String::new();
    for (i, word) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&quote_word(word));
    }
    line
}

/// Single-quote `word` unless it is made only of characters sh treats literally.
pub fn quote_word(word: &str) -> String {
    let literal = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '.' | '/' | ':' | '@' | ',' | '+')
    };
    if !word.is_empty() && word.chars().all(literal) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Percent-decode a URL component. `+` is kept literally; invalid UTF-8 is replaced lossily.
pub fn url_decode(s: &str) -> String {
    let bytes = urlencoding::decode_binary(s.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Index just past the header terminator; CRLFCRLF is preferred, a bare LFLF is accepted.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}
