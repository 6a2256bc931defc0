//! Checking a declaration file before it's accepted into a repository.

use thiserror::Error;

use crate::{
    config::Config,
    parser::{self, ParseError},
};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{} syntax error(s) in {file}:\n{}", .errors.len(), format_errors(.file, .errors))]
    Syntax {
        file: String,
        errors: Vec<ParseError>,
    },
}

fn format_errors(file: &str, errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|err| format!("  {}:{}", file, err))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `source` as the declaration file `file`. Syntax errors are returned
/// as warnings unless `config.report_syntax_error` is set, in which case they
/// fail validation.
pub fn validate(file: &str, source: &str, config: &Config) -> Result<Vec<ParseError>, ValidationError> {
    let errors = parser::parse(source).errors;
    if config.report_syntax_error && !errors.is_empty() {
        return Err(ValidationError::Syntax {
            file: file.to_owned(),
            errors,
        });
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let lenient = Config::default();
        let strict = Config {
            report_syntax_error: true,
            ..Config::default()
        };

        assert!(validate("OWNERS", "a@a\nset noparent\n", &strict).unwrap().is_empty());

        let warnings = validate("OWNERS", "a@a\nnobody\n", &lenient).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, 2);

        let err = validate("d1/OWNERS", "a@a\nnobody\n", &strict).unwrap_err();
        assert_eq!(
            err.to_string(),
            "1 syntax error(s) in d1/OWNERS:\n  d1/OWNERS:2: invalid owner: nobody: nobody"
        );
    }
}
