//! Path Utilities
//!
//! Pure path arithmetic over POSIX-like string paths. Canonical form: a
//! leading `/`, single `/` separators, no trailing `/` except for root, and
//! no `.` or `..` segments. Everything downstream (backends, mount routing,
//! built-ins) operates on canonical paths produced here.

/// Normalize a path, resolving `.` and `..` segments.
///
/// Relative paths are interpreted against `cwd`. `..` pops bounded at root
/// and never escapes it. The result always begins with `/`.
///
/// `normalize("/", cwd) == "/"` and `normalize("", cwd) == cwd`.
pub fn normalize(path: &str, cwd: &str) -> String {
    if path.is_empty() {
        return normalize(cwd, "/");
    }

    let mut components: Vec<&str> = Vec::new();
    if !path.starts_with('/') {
        for component in cwd.split('/') {
            push_component(&mut components, component);
        }
    }
    for component in path.split('/') {
        push_component(&mut components, component);
    }

    if components.is_empty() {
        String::from("/")
    } else {
        let mut result = String::new();
        for c in components {
            result.push('/');
            result.push_str(c);
        }
        result
    }
}

fn push_component<'a>(components: &mut Vec<&'a str>, component: &'a str) {
    match component {
        "" | "." => {}
        ".." => {
            components.pop();
        }
        c => components.push(c),
    }
}

/// Parent directory of a path. `dirname("/") == "/"`.
pub fn dirname(path: &str) -> String {
    let canonical = normalize(path, "/");
    match canonical.rfind('/') {
        Some(0) => String::from("/"),
        Some(idx) => String::from(&canonical[..idx]),
        None => String::from("/"),
    }
}

/// Final segment of a path. `basename("/") == ""`.
pub fn basename(path: &str) -> String {
    let canonical = normalize(path, "/");
    if canonical == "/" {
        return String::new();
    }
    match canonical.rfind('/') {
        Some(idx) => String::from(&canonical[idx + 1..]),
        None => canonical,
    }
}

/// Extension of the final segment including the dot, or empty.
///
/// A leading dot alone (dotfile) is not an extension: `extname(".bashrc")`
/// is empty, `extname("a.tar.gz") == ".gz"`.
pub fn extname(path: &str) -> String {
    let name = basename(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => String::from(&name[idx..]),
        _ => String::new(),
    }
}

/// Join path segments and collapse the result.
///
/// Absolute when the first non-empty segment is absolute, relative
/// otherwise. `..` pops previously joined segments, bounded at the front.
pub fn join(segments: &[&str]) -> String {
    let absolute = segments.iter().find(|s| !s.is_empty()).is_some_and(|s| s.starts_with('/'));
    let mut components: Vec<&str> = Vec::new();
    for segment in segments {
        for component in segment.split('/') {
            push_component(&mut components, component);
        }
    }
    let joined = components.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Resolve `path` against a base directory, producing a canonical path.
pub fn resolve(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path, "/")
    } else {
        normalize(path, base)
    }
}

/// Relative path from `from` to `to`, both interpreted as absolute.
pub fn relative(from: &str, to: &str) -> String {
    let from = normalize(from, "/");
    let to = normalize(to, "/");
    if from == to {
        return String::new();
    }

    let from_parts: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let mut common = 0;
    while common < from_parts.len()
        && common < to_parts.len()
        && from_parts[common] == to_parts[common]
    {
        common += 1;
    }

    let mut parts: Vec<&str> = Vec::new();
    for _ in common..from_parts.len() {
        parts.push("..");
    }
    parts.extend(&to_parts[common..]);
    parts.join("/")
}

/// True iff canonical `child` equals `parent` or lies beneath it.
pub fn is_inside(parent: &str, child: &str) -> bool {
    let parent = normalize(parent, "/");
    let child = normalize(child, "/");
    if parent == "/" {
        return true;
    }
    if child == parent {
        return true;
    }
    child.starts_with(&format!("{parent}/"))
}

/// Root-first list of canonical ancestor prefixes, ending with `path` itself.
///
/// `get_ancestors("/a/b")` is `["/", "/a", "/a/b"]`.
pub fn get_ancestors(path: &str) -> Vec<String> {
    let canonical = normalize(path, "/");
    let mut ancestors = vec![String::from("/")];
    if canonical == "/" {
        return ancestors;
    }
    let mut prefix = String::new();
    for component in canonical.split('/').filter(|s| !s.is_empty()) {
        prefix.push('/');
        prefix.push_str(component);
        ancestors.push(prefix.clone());
    }
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("/", "/"), "/");
        assert_eq!(normalize("", "/home"), "/home");
        assert_eq!(normalize("/a/b/c", "/"), "/a/b/c");
        assert_eq!(normalize("/a//b/", "/"), "/a/b");
        assert_eq!(normalize("/a/./b", "/"), "/a/b");
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize("b", "/a"), "/a/b");
        assert_eq!(normalize("./b/c", "/a"), "/a/b/c");
        assert_eq!(normalize("../c", "/a/b"), "/a/c");
    }

    #[test]
    fn test_normalize_dotdot_bounded_at_root() {
        assert_eq!(normalize("/../..", "/"), "/");
        assert_eq!(normalize("../../../etc", "/home"), "/etc");
        assert_eq!(normalize("/a/../../b", "/"), "/b");
    }

    #[test]
    fn test_normalize_idempotent() {
        for p in ["/a/b/../c", "x/./y", "", "/", "../../z"] {
            let once = normalize(p, "/home/user");
            assert_eq!(normalize(&once, "/home/user"), once);
        }
    }

    #[test]
    fn test_normalize_no_dot_segments_survive() {
        let out = normalize("/a/./b/../c/.", "/");
        assert!(!out.split('/').any(|s| s == "." || s == ".."));
        assert!(out.starts_with('/'));
    }

    #[test]
    fn test_dirname_basename() {
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(basename("/a/b/c.txt"), "c.txt");
        assert_eq!(basename("/"), "");
        assert_eq!(basename("/a/"), "a");
    }

    #[test]
    fn test_extname() {
        assert_eq!(extname("/a/b.txt"), ".txt");
        assert_eq!(extname("/a/b.tar.gz"), ".gz");
        assert_eq!(extname("/a/.bashrc"), "");
        assert_eq!(extname("/a/b"), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(join(&["/a", "b", "c"]), "/a/b/c");
        assert_eq!(join(&["a", "b"]), "a/b");
        assert_eq!(join(&["/a", "..", "b"]), "/b");
        assert_eq!(join(&["/a/", "/b/"]), "/a/b");
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("/home", "docs"), "/home/docs");
        assert_eq!(resolve("/home", "/etc"), "/etc");
        assert_eq!(resolve("/home/user", ".."), "/home");
    }

    #[test]
    fn test_relative() {
        assert_eq!(relative("/a/b", "/a/b/c"), "c");
        assert_eq!(relative("/a/b", "/a/c"), "../c");
        assert_eq!(relative("/a/b", "/a/b"), "");
        assert_eq!(relative("/", "/x"), "x");
    }

    #[test]
    fn test_is_inside() {
        assert!(is_inside("/a", "/a"));
        assert!(is_inside("/a", "/a/b"));
        assert!(is_inside("/", "/anything"));
        assert!(!is_inside("/a", "/ab"));
        assert!(!is_inside("/a/b", "/a"));
    }

    #[test]
    fn test_get_ancestors() {
        assert_eq!(get_ancestors("/"), vec!["/"]);
        assert_eq!(get_ancestors("/a/b"), vec!["/", "/a", "/a/b"]);
    }
}
