//! Parses GCC `-MMD` dependency files (`target: dep1 dep2 \` with
//! backslash-newline continuations) and returns the listed prerequisites.

/// Parses a `.d` file's contents, returning the dependency paths listed
/// after the first colon. Backslash-newline continuations are joined before
/// splitting on whitespace.
pub fn parse(content: &str) -> Vec<String> {
    let joined = content.replace("\\\n", " ").replace("\\\r\n", " ");

    let Some(colon_pos) = joined.find(':') else {
        return Vec::new();
    };

    joined[colon_pos + 1..]
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_dep_file() {
        let deps = parse("foo.o: foo.c foo.h bar.h\n");
        assert_eq!(deps, vec!["foo.c", "foo.h", "bar.h"]);
    }

    #[test]
    fn parses_backslash_continuations() {
        let deps = parse("foo.o: foo.c \\\n  foo.h \\\n  bar.h\n");
        assert_eq!(deps, vec!["foo.c", "foo.h", "bar.h"]);
    }

    #[test]
    fn missing_colon_yields_no_deps() {
        assert!(parse("not a dep file").is_empty());
    }

    #[test]
    fn target_before_colon_is_excluded() {
        let deps = parse("foo.o: foo.c\n");
        assert!(!deps.iter().any(|d| d == "foo.o:"));
    }
}
