//! Removal of ANSI/VT100 CSI sequences from captured terminal output.
//!
//! A CSI sequence is `ESC [`, any number of parameter bytes (`0x30..=0x3F`),
//! any number of intermediate bytes (`0x20..=0x2F`), and one final byte
//! (`0x40..=0x7E`). Every other byte is left untouched.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn csi_pattern() -> &'static Regex {
    static CSI: OnceLock<Regex> = OnceLock::new();
    CSI.get_or_init(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("valid CSI pattern"))
}

/// Strip every CSI sequence from `text`.
///
/// Removing one sequence can splice a stray `ESC` onto the text after it and
/// form a new sequence, so stripping repeats until nothing matches. This keeps
/// `strip_csi(strip_csi(s)) == strip_csi(s)`.
pub fn strip_csi(text: &str) -> String {
    let pattern = csi_pattern();
    let mut current = Cow::Borrowed(text);
    while pattern.is_match(&current) {
        current = Cow::Owned(pattern.replace_all(&current, "").into_owned());
    }
    current.into_owned()
}

/// Join captured fragments and strip CSI sequences from the result.
///
/// Fragments are joined first so a sequence split across two reads is still
/// recognized.
pub fn sanitize<S: AsRef<str>>(fragments: &[S]) -> String {
    let joined: String = fragments.iter().map(AsRef::as_ref).collect();
    strip_csi(&joined)
}
