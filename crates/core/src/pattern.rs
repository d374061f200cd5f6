//! Glob (`*`, `**`) matching with include/exclude semantics.
//!
//! `*` matches within a single path segment; `**` matches zero or more
//! segments. Separators are normalized to `/` before matching; comparison is
//! case-sensitive.

/// Does `path` match `pattern`?
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern = normalize(pattern);
    let path = normalize(path);
    let pattern_segs: Vec<&str> = split_segments(&pattern);
    let path_segs: Vec<&str> = split_segments(&path);
    match_segments(&pattern_segs, &path_segs)
}

/// `path` is included iff no exclude pattern matches and some include pattern
/// matches.
pub fn matches_patterns(path: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|p| matches(p, path)) {
        return false;
    }
    include.iter().any(|p| matches(p, path))
}

fn normalize(s: &str) -> String {
    s.replace('\\', "/")
}

fn split_segments(s: &str) -> Vec<&str> {
    s.split('/').filter(|seg| !seg.is_empty()).collect()
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => {
            if rest.is_empty() {
                // trailing `/**` matches any descendant, and the directory itself.
                return true;
            }
            // `**` matches zero or more segments — try every split point.
            (0..=path.len()).any(|i| match_segments(rest, &path[i..]))
        }
        Some((&head, rest)) => match path.split_first() {
            Some((&path_head, path_rest)) if match_segment(head, path_head) => {
                match_segments(rest, path_rest)
            }
            _ => false,
        },
    }
}

/// Single-segment match: `*` stands for any run of non-separator characters.
fn match_segment(pattern: &str, segment: &str) -> bool {
    match_segment_chars(pattern.as_bytes(), segment.as_bytes())
}

fn match_segment_chars(pattern: &[u8], segment: &[u8]) -> bool {
    match pattern.split_first() {
        None => segment.is_empty(),
        Some((&b'*', rest)) => {
            (0..=segment.len()).any(|i| match_segment_chars(rest, &segment[i..]))
        }
        Some((&p, rest)) => match segment.split_first() {
            Some((&s, seg_rest)) if p == s => match_segment_chars(rest, seg_rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_segment() {
        assert!(matches("*.rs", "main.rs"));
        assert!(!matches("*.rs", "sub/main.rs"));
    }

    #[test]
    fn double_star_matches_at_any_depth() {
        assert!(matches("**/x", "x"));
        assert!(matches("**/x", "a/b/x"));
        assert!(!matches("**/x", "a/b/y"));
    }

    #[test]
    fn prefix_then_double_star_then_suffix() {
        assert!(matches("p/**/s", "p/s"));
        assert!(matches("p/**/s", "p/a/b/s"));
        assert!(!matches("p/**/s", "q/a/s"));
    }

    #[test]
    fn trailing_double_star_matches_directory_and_descendants() {
        assert!(matches("target/**", "target"));
        assert!(matches("target/**", "target/debug/build"));
    }

    #[test]
    fn case_sensitive_segments() {
        assert!(!matches("*.RS", "main.rs"));
    }

    #[test]
    fn matches_patterns_requires_include_and_no_exclude() {
        let include = vec!["**/*.rs".to_string()];
        let exclude = vec!["target/**".to_string()];
        assert!(matches_patterns("src/main.rs", &include, &exclude));
        assert!(!matches_patterns("target/debug/main.rs", &include, &exclude));
        assert!(!matches_patterns("README.md", &include, &exclude));
    }
}
