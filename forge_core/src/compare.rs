/// Normalized answer comparison: `\r` is stripped, trailing blank
/// lines are dropped and every remaining line is right-trimmed before
/// a line-by-line equality check.
pub fn normalized_eq(expected: &str, actual: &str) -> bool {
    let a = normalize(expected);
    let b = normalize(actual);

    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn normalize(s: &str) -> Vec<String> {
    let s = s.replace('\r', "");
    let mut lines: Vec<String> = s.split('\n').map(|l| l.trim_end().to_string()).collect();
    while let Some(last) = lines.last() {
        if last.is_empty() {
            lines.pop();
        } else {
            break;
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflexive() {
        assert!(normalized_eq("1 2\n3\n", "1 2\n3\n"));
        assert!(normalized_eq("", ""));
    }

    #[test]
    fn trailing_noise_ignored() {
        assert!(normalized_eq("1 2\n3\n\n", "1 2  \n3\n"));
        assert!(normalized_eq("a\n\n\n", "a"));
        assert!(normalized_eq("a\r\nb\r\n", "a\nb\n"));
    }

    #[test]
    fn leading_blank_lines_matter() {
        assert!(!normalized_eq("\na", "a"));
    }

    #[test]
    fn different_content() {
        assert!(!normalized_eq("1 2\n3\n", "1 2\n4\n"));
        assert!(!normalized_eq("1 2\n3\n", "1 2\n"));
        // internal whitespace is significant
        assert!(!normalized_eq("1  2\n", "1 2\n"));
    }
}
