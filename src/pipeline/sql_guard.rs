use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[A-Za-z]*").unwrap());
static LEADING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(*\s*([A-Za-z]+)").unwrap());

#[derive(Debug, Error, PartialEq)]
pub enum GuardError {
    #[error("The generated statement is empty")]
    Empty,
    #[error("Only read-only queries are allowed, but the statement starts with {0}")]
    NotReadOnly(String),
    #[error("Only a single statement is allowed, but several were generated")]
    MultipleStatements,
}

/// Normalizes generated SQL into the single-line form that is executed, and
/// with `read_only` rejects anything but one SELECT/WITH statement.
///
/// Semicolons inside string literals are not told apart from statement
/// separators; such statements are rejected and regenerated.
pub fn prepare_statement(raw: &str, read_only: bool) -> Result<String, GuardError> {
    let without_fences = CODE_FENCE.replace_all(raw, " ");
    let single_line = without_fences.split_whitespace().collect::<Vec<_>>().join(" ");
    let statement = single_line.trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    if statement.is_empty() {
        return Err(GuardError::Empty);
    }

    if read_only {
        let keyword = LEADING_KEYWORD
            .captures(statement)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_uppercase())
            .unwrap_or_default();

        if keyword != "SELECT" && keyword != "WITH" {
            let shown = if keyword.is_empty() {
                statement.chars().take(20).collect()
            } else {
                keyword
            };
            return Err(GuardError::NotReadOnly(shown));
        }

        if statement.contains(';') {
            return Err(GuardError::MultipleStatements);
        }
    }

    Ok(statement.to_string())
}
