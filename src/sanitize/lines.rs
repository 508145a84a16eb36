//! Terminator-preserving line splitting.

/// Characters that end a line on their own. `\r\n` is handled as one
/// terminator on top of these.
const LINE_BREAKS: &[char] = &[
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

fn is_line_break(c: char) -> bool {
    LINE_BREAKS.contains(&c)
}

/// Splits `text` into lines, each keeping its own terminator.
///
/// `\n`, `\r\n`, a lone `\r`, `\v`, `\f`, the file/group/record separators
/// (`\x1c`-`\x1e`), NEL (`\u{85}`) and the Unicode line and paragraph
/// separators all end a line. A trailing run of text without a terminator
/// becomes the last line; an empty input yields no lines.
/// Concatenating the result always reproduces `text` exactly.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(j, '\n')) = chars.peek() {
                end = j + 1;
                chars.next();
            }
        }
        lines.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        lines.push(&text[start..]);
    }

    lines
}
