//! A line-oriented demonstration transform.
//!
//! Each line of the source is normalised by collapsing runs of whitespace
//! into one space; blank lines are dropped. A line of the form
//! `import "<specifier>"` (single or double quotes) declares a dependency
//! and is kept in the output. With the `strip_comments` option set, lines
//! starting with `//` are dropped too.

use kiln_engine::{SourceLocation, Transform, TransformError, TransformInput, TransformOutput};

/// The demonstration transform used by `kiln build`.
pub struct LineTransform;

impl Transform for LineTransform {
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError> {
        let text = std::str::from_utf8(&input.source)
            .map_err(|e| TransformError::transform(format!("source is not UTF-8: {e}"), None))?;
        let strip_comments = input
            .config
            .get("strip_comments")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut output = String::with_capacity(text.len());
        let mut dependencies = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || (strip_comments && trimmed.starts_with("//")) {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("import") {
                if rest.starts_with(char::is_whitespace) {
                    let line_no = index as u32 + 1;
                    let indent = (line.len() - line.trim_start().len()) as u32;
                    let offset = indent + (trimmed.len() - rest.trim_start().len()) as u32;
                    dependencies.push(parse_specifier(rest.trim_start(), line_no, offset + 1)?);
                }
            }
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
        }

        Ok(TransformOutput {
            output: output.into_bytes(),
            dependencies,
            reads_dependencies: false,
        })
    }
}

/// Parses a quoted specifier starting at 1-based `column` of `line`.
fn parse_specifier(text: &str, line: u32, column: u32) -> Result<String, TransformError> {
    let location = SourceLocation::new(line, column);
    let mut chars = text.chars();
    let quote = match chars.next() {
        Some(q @ ('"' | '\'')) => q,
        _ => {
            return Err(TransformError::parse(
                "expected a quoted import specifier",
                location,
            ))
        }
    };
    let body = chars.as_str();
    let end = body
        .find(quote)
        .ok_or_else(|| TransformError::parse("unterminated import specifier", location))?;
    let specifier = &body[..end];
    if specifier.is_empty() {
        return Err(TransformError::parse("empty import specifier", location));
    }
    Ok(specifier.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::ModuleId;
    use kiln_config::{OptionValue, TransformSettings};
    use kiln_engine::TransformErrorKind;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn input(source: &str, settings: TransformSettings) -> TransformInput {
        TransformInput {
            id: ModuleId::from("src/a.js"),
            path: PathBuf::from("src/a.js"),
            source: source.as_bytes().to_vec(),
            config: Arc::new(settings),
            dependencies: vec![],
        }
    }

    fn run(source: &str) -> Result<TransformOutput, TransformError> {
        LineTransform.transform(&input(source, TransformSettings::default()))
    }

    #[test]
    fn collapses_whitespace_and_drops_blank_lines() {
        let out = run("  let   x =  1;\n\n\tlet y = 2;  \n").unwrap();
        assert_eq!(out.output, b"let x = 1;\nlet y = 2;");
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn collects_imports_in_order() {
        let out = run("import \"./b.js\"\nimport './c.js'\nbody").unwrap();
        assert_eq!(out.dependencies, vec!["./b.js", "./c.js"]);
        assert_eq!(out.output, b"import \"./b.js\"\nimport './c.js'\nbody");
    }

    #[test]
    fn words_starting_with_import_are_not_imports() {
        let out = run("imported = true").unwrap();
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn unterminated_specifier_is_a_located_parse_error() {
        let err = run("ok\n  import \"./b.js").unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::Parse);
        assert_eq!(err.location, Some(SourceLocation::new(2, 10)));
    }

    #[test]
    fn unquoted_specifier_is_a_parse_error() {
        let err = run("import b").unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::Parse);
        assert_eq!(err.location, Some(SourceLocation::new(1, 8)));
    }

    #[test]
    fn strip_comments_option() {
        let source = "// header\ncode\n  // note";
        assert_eq!(run(source).unwrap().output, b"// header\ncode\n// note");

        let mut settings = TransformSettings::default();
        settings
            .options
            .insert("strip_comments".to_string(), OptionValue::Bool(true));
        let out = LineTransform.transform(&input(source, settings)).unwrap();
        assert_eq!(out.output, b"code");
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut bad = input("", TransformSettings::default());
        bad.source = vec![0xff, 0xfe];
        let err = LineTransform.transform(&bad).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::Transform);
    }
}
