//! Destination folder naming.

use unicode_normalization::UnicodeNormalization;

/// Strip a leading course-code token such as `EBC-ALG ` or `XZ-PR42 `.
///
/// The token is 2-4 ASCII uppercase letters, a hyphen, 2-6 uppercase letters
/// or digits, then whitespace. Names without the token pass through
/// unchanged, and a name that is nothing but the token keeps it.
pub fn strip_course_code(name: &str) -> &str {
    let bytes = name.as_bytes();

    let letters = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
    if !(2..=4).contains(&letters) || bytes.get(letters) != Some(&b'-') {
        return name;
    }

    let code_start = letters + 1;
    let code = bytes[code_start..]
        .iter()
        .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        .count();
    if !(2..=6).contains(&code) {
        return name;
    }

    let rest = &name[code_start + code..];
    let title = rest.trim_start();
    if title.len() == rest.len() || title.is_empty() {
        return name;
    }
    title
}

/// Folder name for a subject: course code stripped, trimmed, NFC normalized.
pub fn subject_folder_name(display_name: &str) -> String {
    strip_course_code(display_name.trim())
        .trim()
        .nfc()
        .collect()
}
