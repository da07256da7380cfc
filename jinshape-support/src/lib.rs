use std::borrow::Cow;
use std::fmt;

fn escape_single_quotes(input: &str) -> Cow<'_, str> {
    if input.contains('\'') {
        Cow::Owned(input.replace('\'', "\\'"))
    } else {
        Cow::Borrowed(input)
    }
}

fn format_operation_error(
    component: &str,
    operation: &str,
    target: Option<&str>,
    error: impl fmt::Display,
) -> String {
    match target {
        Some(target) => {
            let escaped = escape_single_quotes(target);
            format!("{component}.{operation}('{}') failed: {error}", escaped)
        }
        None => format!("{component}.{operation} failed: {error}"),
    }
}

/// Message for a template loader failure on `name`.
pub fn loader_error(operation: &str, name: &str, error: impl fmt::Display) -> String {
    format_operation_error("loader", operation, Some(name), error)
}

pub fn config_error(operation: &str, path: &str, error: impl fmt::Display) -> String {
    format_operation_error("config", operation, Some(path), error)
}

pub fn cli_error(operation: &str, error: impl fmt::Display) -> String {
    format_operation_error("cli", operation, None, error)
}

pub fn cli_target_error(operation: &str, target: &str, error: impl fmt::Display) -> String {
    format_operation_error("cli", operation, Some(target), error)
}

/// Renders a quoted, comma separated list such as `"a", "b"`.
pub fn quoted_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| format!("\"{}\"", item.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_in_targets() {
        assert_eq!(
            loader_error("load", "it's.html", "missing"),
            "loader.load('it\\'s.html') failed: missing"
        );
    }

    #[test]
    fn formats_untargeted_errors() {
        assert_eq!(cli_error("write", "broken pipe"), "cli.write failed: broken pipe");
    }

    #[test]
    fn quotes_list_items() {
        assert_eq!(quoted_list(["a", "b"]), "\"a\", \"b\"");
    }
}
