//! Dashboard bundle serving for the broadcast server.
//!
//! The dashboard is a pre-built single-page bundle, embedded at compile time
//! behind the `embed-ui` feature.  Unknown GET paths outside the reserved
//! prefixes fall back to the bundle's index document so client-side routing
//! keeps working after a hard refresh.

#[cfg(feature = "embed-ui")]
use axum::http::header;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};

/// Outcome of screening a request before it may touch the bundle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BundleRequestError {
    /// Path belongs to a reserved (API/socket) prefix.
    Reserved,
    /// Dashboard routes are read-only.
    MethodNotAllowed,
}

impl IntoResponse for BundleRequestError {
    fn into_response(self) -> Response {
        match self {
            BundleRequestError::Reserved => StatusCode::NOT_FOUND.into_response(),
            BundleRequestError::MethodNotAllowed => {
                StatusCode::METHOD_NOT_ALLOWED.into_response()
            }
        }
    }
}

fn in_prefix(raw_path: &str, prefix: &str) -> bool {
    raw_path == prefix
        || raw_path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Screen a request against the reserved prefixes and the read-only rule.
///
/// Returns the raw path on success so the caller can look the asset up.
pub fn screen_bundle_request<'a>(
    method: &Method,
    uri: &'a Uri,
    reserved_prefixes: &[&str],
) -> Result<&'a str, BundleRequestError> {
    let raw_path = uri.path();

    if reserved_prefixes.iter().any(|p| in_prefix(raw_path, p)) {
        return Err(BundleRequestError::Reserved);
    }
    if *method != Method::GET && *method != Method::HEAD {
        return Err(BundleRequestError::MethodNotAllowed);
    }
    Ok(raw_path)
}

/// Serve an asset from the embedded bundle, falling back to `index.html`
/// for extension-less (route-like) paths.
#[cfg(feature = "embed-ui")]
pub fn serve_bundle_asset<T: rust_embed::Embed>(raw_path: &str) -> Response {
    let path = raw_path.trim_start_matches('/');

    if let Some(file) = T::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime.as_ref())],
            file.data,
        )
            .into_response();
    }

    if std::path::Path::new(path).extension().is_none() {
        if let Some(index) = T::get("index.html") {
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html")],
                index.data,
            )
                .into_response();
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

/// Placeholder page shown when the binary was built without `embed-ui`.
pub fn bundle_placeholder(app_name: &str) -> Response {
    Html(format!(
        "<html><body>\
         <h1>{app_name} dashboard not embedded</h1>\
         <p>Rebuild with <code>cargo build --features embed-ui</code> to include the dashboard bundle.</p>\
         </body></html>"
    ))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_accepts_get_and_head() {
        let uri = Uri::from_static("/feed");
        assert_eq!(
            screen_bundle_request(&Method::GET, &uri, &[]).unwrap(),
            "/feed"
        );
        assert_eq!(
            screen_bundle_request(&Method::HEAD, &uri, &[]).unwrap(),
            "/feed"
        );
    }

    #[test]
    fn screen_rejects_mutating_methods() {
        let uri = Uri::from_static("/feed");
        let err = screen_bundle_request(&Method::POST, &uri, &[]).unwrap_err();
        assert_eq!(err, BundleRequestError::MethodNotAllowed);
        assert_eq!(err.into_response().status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn screen_rejects_reserved_prefixes_but_not_lookalikes() {
        let api_root = Uri::from_static("/api");
        let api_nested = Uri::from_static("/api/state");
        let ws = Uri::from_static("/ws");
        let lookalike = Uri::from_static("/api-docs");

        assert_eq!(
            screen_bundle_request(&Method::GET, &api_root, &["/api", "/ws"]).unwrap_err(),
            BundleRequestError::Reserved
        );
        assert_eq!(
            screen_bundle_request(&Method::GET, &api_nested, &["/api", "/ws"]).unwrap_err(),
            BundleRequestError::Reserved
        );
        assert_eq!(
            screen_bundle_request(&Method::GET, &ws, &["/api", "/ws"]).unwrap_err(),
            BundleRequestError::Reserved
        );
        assert_eq!(
            screen_bundle_request(&Method::GET, &lookalike, &["/api", "/ws"]).unwrap(),
            "/api-docs"
        );
    }
}
