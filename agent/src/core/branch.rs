//! Working branch naming.

/// Default prefix for agent working branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "agent/fix-";
/// Default cap on the slug portion of the branch name, in characters.
pub const DEFAULT_SLUG_MAX_CHARS: usize = 30;

/// Lower-case the title and replace every non-alphanumeric character with `-`,
/// keeping at most `max_chars` characters.
pub fn slugify(title: &str, max_chars: usize) -> String {
    title
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .take(max_chars)
        .collect()
}

/// Compute the working branch for an issue title.
pub fn working_branch_name(prefix: &str, title: &str, max_chars: usize) -> String {
    format!("{prefix}{}", slugify(title, max_chars))
}
