/// Builds a lowercase `LIKE` pattern matching `search` anywhere, with `\`
/// escaping the wildcards so they match literally.
pub(crate) fn like_pattern(search: Option<&str>) -> String {
    let term = search.map(str::trim).unwrap_or_default().to_lowercase();
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
