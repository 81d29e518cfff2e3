//! Pattern matchers for URL, command, filesystem, and skill targets.
//!
//! The three main syntaxes are deliberately distinct:
//!
//! - **URL patterns** are normalized (scheme defaulting, trailing-slash
//!   stripping) and matched as globs where `**` crosses `/`, `*` does not,
//!   and `?` matches one non-`/` character. A pattern without a trailing
//!   wildcard matches its base and everything under the base path.
//! - **Command patterns** are `*` (universal), `name:*` (command with an
//!   optional argument tail), or an exact match on the basename-normalized
//!   command line.
//! - **Filesystem patterns** are globs; a trailing `/` implies `/**`.
//!
//! All matching is case-insensitive.

use std::collections::HashSet;

use regex::Regex;

/// Translate a glob pattern into an anchored regular expression source.
///
/// `**` matches zero or more characters including `/`; `*` matches zero or
/// more characters excluding `/`; `?` matches exactly one non-`/` character.
/// Every other character is matched literally.
fn glob_regex_source(pattern: &str) -> String {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    source.push_str(".*");
                } else {
                    source.push_str("[^/]*");
                }
            }
            '?' => source.push_str("[^/]"),
            _ => source.push_str(&regex::escape(&c.to_string())),
        }
    }
    source.push('$');
    source
}

/// Case-insensitive glob match.
///
/// An unparseable pattern never matches; glob translation escapes all regex
/// metacharacters, so this is a length-limit safety valve rather than an
/// expected path.
#[must_use]
pub fn glob_match(pattern: &str, target: &str) -> bool {
    match Regex::new(&format!("(?i){}", glob_regex_source(pattern))) {
        Ok(re) => re.is_match(target),
        Err(_) => false,
    }
}

/// Whether a string carries an explicit scheme (`https://`, `*://`, ...).
fn has_scheme(s: &str) -> bool {
    if let Some(idx) = s.find("://") {
        let scheme = &s[..idx];
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '+' | '-' | '.'))
    } else {
        false
    }
}

/// Normalize a URL or URL pattern.
///
/// Trims whitespace, strips trailing slashes of the path (preserving a bare
/// scheme root), and prepends `https://` when no scheme is present. Explicit
/// `http://`, `https://`, and `*://` prefixes are preserved. Idempotent.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    while s.len() > 1 && s.ends_with('/') && !s.ends_with("://") {
        s.pop();
    }
    if !has_scheme(&s) {
        s = format!("https://{s}");
    }
    s
}

/// Match a URL pattern against a target URL.
///
/// Both sides are normalized first. A pattern ending in `*` is a plain glob;
/// any other pattern matches the exact normalized URL or any URL under its
/// path.
#[must_use]
pub fn url_matches(pattern: &str, url: &str) -> bool {
    let pattern = normalize_url(pattern);
    let url = normalize_url(url);
    if pattern.ends_with('*') {
        return glob_match(&pattern, &url);
    }
    glob_match(&pattern, &url) || glob_match(&format!("{pattern}/**"), &url)
}

/// Whether a raw pattern explicitly targets plain HTTP.
#[must_use]
pub fn is_explicit_http_pattern(pattern: &str) -> bool {
    pattern
        .trim()
        .get(..7)
        .is_some_and(|p| p.eq_ignore_ascii_case("http://"))
}

/// The last path component of the first whitespace-delimited token of a
/// command line, with an optional `fork:` prefix stripped.
#[must_use]
pub fn command_basename(target: &str) -> String {
    let trimmed = target.trim();
    let trimmed = trimmed.strip_prefix("fork:").unwrap_or(trimmed);
    let first = trimmed.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first).to_string()
}

/// Normalize a command line: basename-extract the first token, preserve the
/// argument tail with single-space separation.
#[must_use]
pub fn normalize_command(target: &str) -> String {
    let trimmed = target.trim();
    let trimmed = trimmed.strip_prefix("fork:").unwrap_or(trimmed);
    let mut parts = trimmed.split_whitespace();
    let Some(first) = parts.next() else {
        return String::new();
    };
    let base = first.rsplit('/').next().unwrap_or(first);
    let tail: Vec<&str> = parts.collect();
    if tail.is_empty() {
        base.to_string()
    } else {
        format!("{base} {}", tail.join(" "))
    }
}

/// Match a command pattern against a target command line.
///
/// `*` matches everything. `name:*` matches `name` with an optional argument
/// tail. Anything else is an exact (case-insensitive) match on the normalized
/// command line. No `**` or `?` support.
#[must_use]
pub fn command_matches(pattern: &str, target: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == "*" {
        return true;
    }
    let normalized = normalize_command(target);
    if let Some(name) = pattern.strip_suffix(":*") {
        let name = name.trim();
        if normalized.eq_ignore_ascii_case(name) {
            return true;
        }
        return normalized.len() > name.len()
            && normalized[..name.len()].eq_ignore_ascii_case(name)
            && normalized.as_bytes()[name.len()] == b' ';
    }
    normalized.eq_ignore_ascii_case(pattern)
}

/// Match a filesystem glob against a path. A pattern ending in `/` is
/// implicitly suffixed with `**`.
#[must_use]
pub fn fs_matches(pattern: &str, path: &str) -> bool {
    let mut pattern = pattern.trim().to_string();
    if pattern.ends_with('/') {
        pattern.push_str("**");
    }
    glob_match(&pattern, path.trim())
}

/// Match a skill-slug glob against a slug.
#[must_use]
pub fn skill_matches(pattern: &str, slug: &str) -> bool {
    glob_match(pattern.trim(), slug.trim())
}

/// Reduce a single pattern to a concrete absolute path, if possible.
///
/// A pattern qualifies iff it is absolute, not prefixed with `**/` or `*/`,
/// and, after stripping a single trailing `/*` or `/**`, contains no
/// remaining `*` or `?` and is neither empty nor `/`.
fn concrete_path(pattern: &str) -> Option<String> {
    let trimmed = pattern.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    if trimmed.starts_with("**/") || trimmed.starts_with("*/") {
        return None;
    }
    let stripped = trimmed
        .strip_suffix("/**")
        .or_else(|| trimmed.strip_suffix("/*"))
        .unwrap_or(trimmed);
    if stripped.is_empty() || stripped == "/" {
        return None;
    }
    if stripped.contains('*') || stripped.contains('?') {
        return None;
    }
    Some(stripped.to_string())
}

/// Extract the concrete absolute paths from a pattern list, deduplicating
/// while preserving first-seen order. Used to seed sandbox deny paths, which
/// must contain no wildcards.
#[must_use]
pub fn extract_concrete_paths<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for pattern in patterns {
        if let Some(path) = concrete_path(pattern) {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── URL normalization ─────────────────────────────────────────────

    #[test]
    fn normalize_prepends_https() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("  example.com/api  "), "https://example.com/api");
    }

    #[test]
    fn normalize_preserves_explicit_schemes() {
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("*://example.com"), "*://example.com");
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
        assert_eq!(
            normalize_url("https://example.com/api///"),
            "https://example.com/api"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["example.com/", "http://a.b/c/", "*://x.y", "api.example.com/v1"] {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once);
        }
    }

    // ── URL matching ──────────────────────────────────────────────────

    #[test]
    fn bare_pattern_matches_exact_and_subpaths() {
        assert!(url_matches("example.com", "https://example.com"));
        assert!(url_matches("example.com", "https://example.com/"));
        assert!(url_matches("example.com", "https://example.com/api/v1"));
        assert!(!url_matches("example.com", "https://example.com.evil.io"));
        assert!(!url_matches("example.com", "https://other.com"));
    }

    #[test]
    fn trailing_star_is_glob() {
        assert!(url_matches("https://example.com/*", "https://example.com/api"));
        assert!(!url_matches(
            "https://example.com/*",
            "https://example.com/api/v1"
        ));
        assert!(url_matches(
            "https://example.com/**",
            "https://example.com/api/v1"
        ));
    }

    #[test]
    fn wildcard_scheme_matches_both() {
        assert!(url_matches("*://example.com/**", "https://example.com/x"));
        assert!(url_matches("*://example.com/**", "http://example.com/x"));
    }

    #[test]
    fn url_matching_is_case_insensitive() {
        assert!(url_matches("Example.COM", "https://example.com/Path"));
        assert!(url_matches("example.com/**", "https://EXAMPLE.com/API"));
    }

    #[test]
    fn question_mark_matches_single_non_slash() {
        assert!(url_matches("https://example.com/v?", "https://example.com/v1"));
        assert!(!url_matches("https://example.com/v?", "https://example.com/v12"));
        // Subpaths of a single-char segment still match (base + base/**)
        assert!(url_matches("https://example.com/v?", "https://example.com/v1/items"));
    }

    #[test]
    fn http_pattern_detection_ignores_case_and_whitespace() {
        assert!(is_explicit_http_pattern("http://example.com"));
        assert!(is_explicit_http_pattern("  HTTP://example.com"));
        assert!(!is_explicit_http_pattern("https://example.com"));
        assert!(!is_explicit_http_pattern("example.com"));
    }

    // ── Command matching ──────────────────────────────────────────────

    #[test]
    fn star_matches_any_command() {
        assert!(command_matches("*", "rm -rf /"));
        assert!(command_matches("*", ""));
    }

    #[test]
    fn exact_pattern_requires_bare_command() {
        assert!(command_matches("git", "git"));
        assert!(command_matches("git", "/usr/bin/git"));
        assert!(command_matches("Git", "git"));
        assert!(!command_matches("git", "git status"));
    }

    #[test]
    fn colon_star_allows_argument_tail() {
        assert!(command_matches("git:*", "git"));
        assert!(command_matches("git:*", "git status"));
        assert!(command_matches("git:*", "/usr/bin/git push origin main"));
        assert!(!command_matches("git:*", "gitk"));
        assert!(!command_matches("git:*", "curl https://x"));
    }

    #[test]
    fn fork_prefix_is_stripped() {
        assert!(command_matches("node:*", "fork:/usr/local/bin/node server.js"));
        assert_eq!(command_basename("fork:/usr/local/bin/node server.js"), "node");
    }

    #[test]
    fn basename_extraction() {
        assert_eq!(command_basename("/usr/bin/curl -s https://x"), "curl");
        assert_eq!(command_basename("curl"), "curl");
        assert_eq!(command_basename(""), "");
    }

    // ── Filesystem matching ───────────────────────────────────────────

    #[test]
    fn fs_glob_star_stops_at_separator() {
        assert!(fs_matches("/etc/*", "/etc/passwd"));
        assert!(!fs_matches("/etc/*", "/etc/nginx/nginx.conf"));
        assert!(fs_matches("/etc/**", "/etc/nginx/nginx.conf"));
    }

    #[test]
    fn trailing_slash_implies_recursive() {
        assert!(fs_matches("/var/log/", "/var/log/syslog"));
        assert!(fs_matches("/var/log/", "/var/log/nginx/access.log"));
        assert!(!fs_matches("/var/log/", "/var/lib/x"));
    }

    #[test]
    fn fs_relative_glob() {
        assert!(fs_matches("**/.env", "/home/user/project/.env"));
        assert!(!fs_matches("**/.env", "/home/user/project/.envrc"));
    }

    // ── Skill matching ────────────────────────────────────────────────

    #[test]
    fn skill_glob_over_slug() {
        assert!(skill_matches("web-*", "web-search"));
        assert!(skill_matches("Web-Search", "web-search"));
        assert!(!skill_matches("web-*", "code-review"));
    }

    // ── Concrete path extraction ──────────────────────────────────────

    #[test]
    fn extracts_absolute_paths_and_strips_one_trailing_glob() {
        assert_eq!(
            extract_concrete_paths(["/etc/passwd", "/root/**", "/var/log/*"]),
            vec!["/etc/passwd", "/root", "/var/log"]
        );
    }

    #[test]
    fn rejects_relative_and_wildcarded_patterns() {
        assert!(extract_concrete_paths(["**/.env"]).is_empty());
        assert!(extract_concrete_paths(["*/secrets"]).is_empty());
        assert!(extract_concrete_paths(["/etc/*/config"]).is_empty());
        assert!(extract_concrete_paths(["relative/path"]).is_empty());
        assert!(extract_concrete_paths(["/"]).is_empty());
        assert!(extract_concrete_paths(["/**"]).is_empty());
        assert!(extract_concrete_paths([""]).is_empty());
    }

    #[test]
    fn dedupes_preserving_first_seen_order() {
        assert_eq!(
            extract_concrete_paths(["/root/**", "/etc/passwd", "/root/*", "/root"]),
            vec!["/root", "/etc/passwd"]
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let first = extract_concrete_paths(["/etc/passwd", "/root/**", "**/.env"]);
        let second: Vec<String> =
            extract_concrete_paths(first.iter().map(String::as_str));
        assert_eq!(first, second);
    }

    #[test]
    fn strips_only_a_single_trailing_glob() {
        // "/a/**/*" strips "/*" leaving "/a/**" which still has wildcards
        assert!(extract_concrete_paths(["/a/**/*"]).is_empty());
    }
}
