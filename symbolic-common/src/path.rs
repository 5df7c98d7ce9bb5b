/// Returns `true` if the given character is any valid directory separator.
#[inline]
fn is_path_separator(c: u8) -> bool {
    matches!(c, b'\\' | b'/')
}

/// Splits off the last component of a path.
///
/// The path should be a path to a file, and not a directory. Trailing separators are ignored.
/// Both slashes and backslashes are treated as separators, since object names recorded by Windows
/// linkers freely mix the two.
///
/// # Examples
///
/// Split the last component of a UNIX path:
///
/// ```
/// assert_eq!(symbolic_common::split_path("/a/b/c"), (Some("/a/b"), "c"));
/// ```
///
/// Split the last component of a Windows path:
///
/// ```
/// assert_eq!(symbolic_common::split_path("C:\\a\\b"), (Some("C:\\a"), "b"));
/// ```
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    let bytes = path.as_bytes();

    // Trim directory separators at the end, if any.
    let path = match bytes.iter().rposition(|c| !is_path_separator(*c)) {
        Some(cutoff) => &path[..=cutoff],
        None => path,
    };

    // Separators are ASCII, so every split position is a char boundary.
    match path.bytes().rposition(is_path_separator) {
        Some(0) => (Some(&path[..1]), &path[1..]),
        Some(pos) => (Some(&path[..pos]), &path[pos + 1..]),
        None => (None, path),
    }
}

/// Normalizes a source file path for deduplication.
///
/// Surrounding whitespace is removed, the path is lower-cased and all backslashes are turned into
/// forward slashes. Two paths referring to the same file on a case-insensitive Windows file
/// system normalize to the same string.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     symbolic_common::normalize_path("  C:\\Src\\Main.CPP "),
///     "c:/src/main.cpp"
/// );
/// ```
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .chars()
        .map(|c| match c {
            '\\' => '/',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Returns the enclosing container of a qualified C++ name.
///
/// This is everything before the last `::` separator. Names without a separator, or with an empty
/// container such as `::global`, have no container.
///
/// # Examples
///
/// ```
/// use symbolic_common::container_name;
///
/// assert_eq!(container_name("ns::Foo::bar"), Some("ns::Foo"));
/// assert_eq!(container_name("main"), None);
/// assert_eq!(container_name("::main"), None);
/// ```
pub fn container_name(name: &str) -> Option<&str> {
    match name.rfind("::") {
        Some(pos) if pos > 0 => Some(&name[..pos]),
        _ => None,
    }
}
