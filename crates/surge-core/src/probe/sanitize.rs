//! Filename sanitization.

/// Replaces path separators and shell/filesystem metacharacters
/// (`\ / : * ? " < > |`) and control characters with `_`, trims surrounding
/// whitespace, and truncates to 255 bytes on a char boundary.
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let replaced: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim();

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn trims_whitespace_only() {
        assert_eq!(sanitize_filename("  file.txt  "), "file.txt");
        // Dots survive so a bare "." candidate stays recognizable.
        assert_eq!(sanitize_filename("."), ".");
    }

    #[test]
    fn control_characters() {
        assert_eq!(sanitize_filename("file\x00name.txt"), "file_name.txt");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
