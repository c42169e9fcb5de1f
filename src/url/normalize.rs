use crate::UrlError;
use sha2::{Digest, Sha256};
use url::Url;

/// Normalizes a request URL into its canonical identity
///
/// Two requests whose URLs normalize to the same string are the same request
/// as far as deduplication is concerned.
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Require an http or https scheme and a host
/// 3. Lowercase the host and resolve dot segments (done by the parser)
/// 4. Remove the fragment
/// 5. Sort query parameters by key, then value
/// 6. Remove an empty query string
///
/// # Examples
///
/// ```
/// use series_harvest::url::normalize_url;
///
/// let url = normalize_url("https://CDN.Example.com/img/./01.jpg?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://cdn.example.com/img/01.jpg?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Computes the deduplication fingerprint of a request URL
///
/// The fingerprint is the hex SHA-256 of the normalized URL. A URL that fails
/// to normalize is hashed as given, so every request still gets a stable key.
pub fn fingerprint(url_str: &str) -> String {
    let identity = match normalize_url(url_str) {
        Ok(url) => url.to_string(),
        Err(_) => url_str.trim().to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hex::encode(hasher.finalize())
}
