//! Team name canonicalization shared by every component that compares names.

const ARTICLE: &str = "the ";

/// Lower-case a team name and strip one leading definite article.
///
/// `"The Hurricanes"` and `"hurricanes"` both become `"hurricanes"`.
pub fn normalize(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    match lowered.strip_prefix(ARTICLE) {
        Some(rest) => rest.trim_start().to_string(),
        None => lowered,
    }
}
