//! Virtual path sanitizer. Every client-supplied path is normalized here
//! before any backend call; `..` is resolved lexically, so a path can never
//! climb above the export root.

/// Reserved per-directory ACL file.
pub const ACL_BASE_NAME: &str = ".__acl";

/// Reserved per-directory allocation state file.
pub const ALLOC_STATE_NAME: &str = ".__alloc";

/// Prefix shared by all service files hidden from directory listings.
pub const SERVICE_PREFIX: &str = ".__";

/// Normalizes a raw client path: percent-decodes once, collapses `.` and
/// `..` segments, anchors the result at `/`, and never emits `//`. An empty
/// result becomes `/`.
pub fn fix(raw: &str) -> String {
    let decoded = match urlencoding::decode(raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw.to_string(),
    };
    collapse(&decoded)
}

/// Lexical `.`/`..` collapse without decoding. Idempotent.
pub fn collapse(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        let mut out = String::new();
        for seg in &segments {
            out.push('/');
            out.push_str(seg);
        }
        out
    }
}

/// Parent directory of a normalized path; the root is its own parent.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Final component of a normalized path.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Joins a child name onto a normalized directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// True when the path names a per-directory ACL file.
pub fn is_acl_file(path: &str) -> bool {
    basename(path) == ACL_BASE_NAME
}

/// True for service entries that never appear in directory listings.
pub fn is_service_name(name: &str) -> bool {
    name.starts_with(SERVICE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fix_anchors_at_root() {
        assert_eq!(fix("foo/bar"), "/foo/bar");
        assert_eq!(fix("/foo/bar"), "/foo/bar");
    }

    #[test]
    fn test_fix_collapses_dots() {
        assert_eq!(fix("/a/./b/../c"), "/a/c");
        assert_eq!(fix("/a//b///c"), "/a/b/c");
    }

    #[test]
    fn test_fix_cannot_escape_root() {
        assert_eq!(fix("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(fix(".."), "/");
        assert_eq!(fix("../.."), "/");
    }

    #[test]
    fn test_fix_empty_is_root() {
        assert_eq!(fix(""), "/");
        assert_eq!(fix("/"), "/");
        assert_eq!(fix("."), "/");
    }

    #[test]
    fn test_fix_percent_decodes() {
        assert_eq!(fix("/dir/hello%20world"), "/dir/hello world");
    }

    #[test]
    fn test_dirname_basename() {
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/a"), "a");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/a", "x"), "/a/x");
    }

    #[test]
    fn test_is_acl_file() {
        assert!(is_acl_file("/a/.__acl"));
        assert!(is_acl_file("/.__acl"));
        assert!(!is_acl_file("/a/.__alloc"));
        assert!(!is_acl_file("/a/acl"));
    }

    #[test]
    fn test_is_service_name() {
        assert!(is_service_name(".__acl"));
        assert!(is_service_name(".__alloc"));
        assert!(!is_service_name(".hidden"));
        assert!(!is_service_name("file"));
    }

    proptest! {
        // Decoding happens once at the protocol edge, so idempotence is
        // over inputs without percent-escapes.
        #[test]
        fn test_fix_idempotent(p in "[a-z./]{0,40}") {
            let once = fix(&p);
            prop_assert_eq!(fix(&once), once);
        }
    }
}
