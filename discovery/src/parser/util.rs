//! Small helpers shared by the built-in parsers.

use std::path::Path;

/// Renders a path with `/` separators for pattern matching and reports.
pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins lines ending in `\` with the following line.
///
/// Returns `(first_line_number, joined_text)` pairs with one-based line
/// numbers.
pub(crate) fn join_continuations(contents: &str) -> Vec<(usize, String)> {
    let mut joined = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim_end();
        let (text, continues) = match line.strip_suffix('\\') {
            Some(head) => (head, true),
            None => (line, false),
        };

        let entry = match pending.take() {
            Some((start, mut acc)) => {
                let piece = text.trim();
                if !piece.is_empty() {
                    if !acc.is_empty() {
                        acc.push(' ');
                    }
                    acc.push_str(piece);
                }
                (start, acc)
            }
            None => (index + 1, text.trim_end().to_string()),
        };

        if continues {
            pending = Some(entry);
        } else {
            joined.push(entry);
        }
    }

    if let Some(entry) = pending {
        joined.push(entry);
    }
    joined
}

/// Collapses runs of whitespace into single spaces.
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// File name of `path` as a string, or an empty string.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_continuations_merges_backslash_lines() {
        let joined = join_continuations("RUN apt-get update \\\n    && apt-get install -y curl\nCMD x\n");
        assert_eq!(
            joined,
            vec![
                (1, "RUN apt-get update && apt-get install -y curl".to_string()),
                (3, "CMD x".to_string()),
            ]
        );
    }

    #[test]
    fn test_join_continuations_keeps_trailing_open_line() {
        let joined = join_continuations("a \\\n");
        assert_eq!(joined, vec![(1, "a".to_string())]);
    }

    #[test]
    fn test_slash_path_uses_forward_slashes() {
        assert_eq!(slash_path(Path::new("roles/web/tasks/main.yml")), "roles/web/tasks/main.yml");
    }
}
