//! HTTP client construction shared by both chat endpoints.

use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;

use crate::options::ClientOptions;

/// Build a configured HTTP client from client options.
///
/// This applies the request timeout and proxy.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&options)?;
/// ```
pub fn build_http_client(options: &ClientOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        } else {
            tracing::warn!(proxy = %proxy_url, "Ignoring invalid proxy URL");
        }
    }

    builder.build()
}

/// Add extra headers to a request if any are configured.
///
/// # Example
/// ```ignore
/// let mut req = client.post(url);
/// req = add_extra_headers(req, &options.extra_headers);
/// ```
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}
