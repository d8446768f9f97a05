/// Extract candidate `@handle` mentions from message content.
///
/// A handle token starts after `@` and runs over `[a-zA-Z0-9_-]`; the `@`
/// must sit at the start of the content or after a non-handle character so
/// email addresses are not picked up. Duplicates are collapsed, order of
/// first occurrence preserved. Resolution against the user index happens
/// in the pipeline; unresolved names are silently dropped there.
pub fn extract_handles(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' {
            let preceded_ok = i == 0 || !is_handle_char(bytes[i - 1]);
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_handle_char(bytes[end]) {
                end += 1;
            }
            if preceded_ok && end - start >= 2 {
                let handle = &content[start..end];
                if !out.iter().any(|h| h == handle) {
                    out.push(handle.to_string());
                }
            }
            i = end;
        } else {
            i += 1;
        }
    }
    out
}

fn is_handle_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_mentions() {
        assert_eq!(extract_handles("@bob status?"), vec!["bob"]);
        assert_eq!(
            extract_handles("ping @alice and @bob-2"),
            vec!["alice", "bob-2"]
        );
    }

    #[test]
    fn ignores_emails_and_duplicates() {
        assert_eq!(extract_handles("mail me at bob@example.com"), Vec::<String>::new());
        assert_eq!(extract_handles("@bob @bob @bob"), vec!["bob"]);
    }

    #[test]
    fn ignores_bare_and_single_char() {
        assert_eq!(extract_handles("@ @x nothing"), Vec::<String>::new());
    }

    #[test]
    fn mention_at_start_and_end() {
        assert_eq!(extract_handles("@alice"), vec!["alice"]);
        assert_eq!(extract_handles("cc @alice"), vec!["alice"]);
    }
}
