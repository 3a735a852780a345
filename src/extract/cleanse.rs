//! Single-pass cleansing of routine bodies.
//!
//! One left-to-right scan recognizes delimited identifiers, string literals,
//! line comments and (nested) block comments. Whichever token starts first
//! wins, so `'--not a comment'` stays a literal and `[a--b]` stays an
//! identifier. Output contract:
//!
//! - `[...]` and `"..."` identifiers pass through unchanged
//! - string literals become `''`
//! - comments become a single space, so neighbouring statements never fuse
//!
//! All delimiters are ASCII, so slicing at their byte offsets keeps the
//! output valid UTF-8.

/// Strip comments and literal contents from `body`.
pub fn cleanse(body: &str) -> String {
    let bytes = body.as_bytes();
    let mut out = String::with_capacity(body.len());
    let mut copied_to = 0;
    let mut i = 0;

    while i < bytes.len() {
        let token_end = match bytes[i] {
            b'[' => Some((scan_delimited(bytes, i + 1, b']'), Replace::Keep)),
            b'"' => Some((scan_delimited(bytes, i + 1, b'"'), Replace::Keep)),
            b'\'' => Some((scan_delimited(bytes, i + 1, b'\''), Replace::With("''"))),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                Some((scan_line_comment(bytes, i + 2), Replace::With(" ")))
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                Some((scan_block_comment(bytes, i + 2), Replace::With(" ")))
            }
            _ => None,
        };

        match token_end {
            Some((end, Replace::Keep)) => i = end,
            Some((end, Replace::With(placeholder))) => {
                out.push_str(&body[copied_to..i]);
                out.push_str(placeholder);
                copied_to = end;
                i = end;
            }
            None => i += 1,
        }
    }

    out.push_str(&body[copied_to..]);
    out
}

enum Replace {
    Keep,
    With(&'static str),
}

/// Returns the offset just past the closing delimiter. A doubled closer is an
/// escape. Unterminated tokens run to end of input.
fn scan_delimited(bytes: &[u8], mut i: usize, close: u8) -> usize {
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Line comments end before the newline so line structure survives.
fn scan_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn scan_block_comment(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 1usize;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1)) {
            (b'/', Some(b'*')) => {
                depth += 1;
                i += 2;
            }
            (b'*', Some(b'/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}
