//! Capture group substitution in handler payloads.
//!
//! - `$0`..`$9`: positional captures, empty when absent
//! - `$name`: named capture, empty when the group did not participate;
//!   names the pattern does not define are kept as written
//! - `$$`: a literal `$`

use super::MatchResult;

pub fn interpolate(template: &str, captures: &MatchResult) -> String {
    if !template.contains('$') {
        return template.to_string();
    }

    let mut output = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            output.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some((_, '$')) => {
                chars.next();
                output.push('$');
            }
            Some((_, digit)) if digit.is_ascii_digit() => {
                chars.next();
                let index = digit as usize - '0' as usize;
                output.push_str(captures.get(index).unwrap_or_default());
            }
            Some((start, first)) if first.is_ascii_alphabetic() || first == '_' => {
                let mut end = start;
                while let Some(&(i, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        end = i + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &template[start..end];
                match captures.named(name) {
                    Some(value) => output.push_str(value.unwrap_or_default()),
                    None => {
                        output.push('$');
                        output.push_str(name);
                    }
                }
            }
            _ => output.push('$'),
        }
    }
    output
}
