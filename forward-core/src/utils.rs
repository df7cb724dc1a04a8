use http::{
    Uri,
    uri::{Authority, PathAndQuery, Scheme},
};

/// Joins two paths so that exactly one slash separates them.
///
/// `"/api" + "/users"`, `"/api/" + "/users"` and `"/api" + "users"` all
/// produce `"/api/users"`. Nothing else about either side is normalized.
pub fn single_joining_slash(base: &str, append: &str) -> String {
    match (base.ends_with('/'), append.starts_with('/')) {
        (true, true) => format!("{}{}", base, &append[1..]),
        (false, false) => format!("{}/{}", base, append),
        _ => format!("{}{}", base, append),
    }
}

/// Merges two raw query strings with `&`, skipping empty sides.
pub fn join_queries(base: Option<&str>, append: Option<&str>) -> Option<String> {
    let base = base.filter(|q| !q.is_empty());
    let append = append.filter(|q| !q.is_empty());

    match (base, append) {
        (Some(base), Some(append)) => Some(format!("{}&{}", base, append)),
        (Some(query), None) | (None, Some(query)) => Some(query.to_owned()),
        (None, None) => None,
    }
}

/// Combines a base URI with an append URI to create a full URI.
///
/// The scheme and authority come from `base`. The path is the base path
/// joined with the append path by [`single_joining_slash`], and the query
/// is both queries merged by [`join_queries`].
///
/// # Arguments
///
/// * `base` - The base URI that provides the scheme, authority, and base path
/// * `append` - The URI to append, typically an origin-form request target
///
/// # Returns
///
/// Returns a `Result<Uri, http::Error>` containing the combined URI on success,
/// or an error if the URI construction fails.
///
/// # Examples
///
/// ```
/// use http::Uri;
/// use forward_core::utils::combine_uris;
///
/// let base = "https://example.com/api?key=1".parse::<Uri>().unwrap();
/// let append = "/users?page=1".parse::<Uri>().unwrap();
/// let combined = combine_uris(&base, &append).unwrap();
/// assert_eq!(combined.to_string(), "https://example.com/api/users?key=1&page=1");
/// ```
pub fn combine_uris(base: &Uri, append: &Uri) -> Result<Uri, http::Error> {
    let mut full_path = single_joining_slash(base.path(), append.path());

    if let Some(query) = join_queries(base.query(), append.query()) {
        full_path.push('?');
        full_path.push_str(&query);
    }

    let path_and_query = PathAndQuery::try_from(full_path)?;

    let mut builder = Uri::builder();
    if let Some(scheme) = base.scheme() {
        builder = builder.scheme(Scheme::clone(scheme));
    }
    if let Some(authority) = base.authority() {
        builder = builder.authority(Authority::clone(authority));
    }
    builder.path_and_query(path_and_query).build()
}
