use crate::error::{PipelineError, Result};

/// Content rules: non-empty after trim, bounded length (in chars, not
/// bytes), and no control characters other than tab and newline. UTF-8
/// well-formedness is already guaranteed by `&str`.
pub fn validate_content(content: &str, max_chars: usize) -> Result<()> {
    if content.trim().is_empty() {
        return Err(PipelineError::Validation(
            "content must not be empty".to_string(),
        ));
    }
    let chars = content.chars().count();
    if chars > max_chars {
        return Err(PipelineError::Validation(format!(
            "content too long: {} chars (max {})",
            chars, max_chars
        )));
    }
    if let Some(bad) = content
        .chars()
        .find(|c| c.is_control() && *c != '\t' && *c != '\n')
    {
        return Err(PipelineError::Validation(format!(
            "control character {:?} not allowed",
            bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_normal_content() {
        validate_content("hello\nworld\ttabbed", 4000).unwrap();
        validate_content("emoji 👍 fine", 4000).unwrap();
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(validate_content("", 4000).is_err());
        assert!(validate_content("   \n ", 4000).is_err());
    }

    #[test]
    fn rejects_overlong_by_chars_not_bytes() {
        // four multi-byte chars, limit four: ok
        validate_content("éééé", 4).unwrap();
        assert!(validate_content("ééééé", 4).is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(validate_content("null\0byte", 4000).is_err());
        assert!(validate_content("bell\x07", 4000).is_err());
    }
}
