use url::Url;

/// Extracts the per-host limiter key from a URL
///
/// The key is the lowercase host, followed by `:port` when the URL names an
/// explicit non-default port.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use series_harvest::url::host_key;
///
/// let url = Url::parse("https://Example.com/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
