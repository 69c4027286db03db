//! Request URL assembly.
//!
//! Pure string functions: joining the base URL with a call path, folding
//! contributed default parameters under the caller's, and appending the
//! query string without doubling `?` or `&`.

use indexmap::IndexMap;

/// Query parameters in insertion order.
pub type QueryParams = IndexMap<String, String>;

/// Join `path` onto `base`. Absolute `http(s)://` paths are used as-is.
pub fn join_url(base: Option<&str>, path: &str) -> String {
    let base = match base {
        Some(base) if !base.is_empty() && !is_absolute(path) => base,
        _ => return path.to_string(),
    };
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) if !path.is_empty() && !path.starts_with('?') => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn is_absolute(path: &str) -> bool {
    let lower = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Add every default whose key the caller did not set. Caller values win.
pub fn merge_missing(params: &mut QueryParams, defaults: QueryParams) {
    for (key, value) in defaults {
        params.entry(key).or_insert(value);
    }
}

/// Append `params` to `url` as `key=value` pairs joined by `&`.
///
/// Keys and values are written as given; callers pass them already escaped.
/// An empty map leaves the URL untouched. A URL that already has a query
/// gets the pairs after `&`, unless it already ends in `?` or `&`.
pub fn append_query(url: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let pairs = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let separator = match url.find('?') {
        None => "?",
        Some(_) if url.ends_with('?') || url.ends_with('&') => "",
        Some(_) => "&",
    };
    format!("{url}{separator}{pairs}")
}
