//! Cross-origin policy for browser frontends talking to the gateway.
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Which origins may call the gateway from a browser.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AllowedOrigins {
    /// `Access-Control-Allow-Origin: *`
    #[default]
    Any,
    /// Only these exact origins, e.g. `http://localhost:3000`.
    List(Vec<HeaderValue>),
}

impl AllowedOrigins {
    /// An empty list means any origin.
    pub fn from_origins<I, S>(origins: I) -> Result<Self, axum::http::header::InvalidHeaderValue>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let origins = origins
            .into_iter()
            .map(|origin| HeaderValue::from_str(origin.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if origins.is_empty() {
            Ok(Self::Any)
        } else {
            Ok(Self::List(origins))
        }
    }
}

/// GET, POST and OPTIONS with `Content-Type` and `Authorization`, from the configured origins.
pub fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::any(),
        AllowedOrigins::List(list) => AllowOrigin::list(list.iter().cloned()),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_means_any() {
        let origins = AllowedOrigins::from_origins(Vec::<String>::new()).unwrap();
        assert_eq!(origins, AllowedOrigins::Any);
    }

    #[test]
    fn test_explicit_origins() {
        let origins =
            AllowedOrigins::from_origins(["http://localhost:3000", "http://127.0.0.1:3000"])
                .unwrap();
        assert_eq!(
            origins,
            AllowedOrigins::List(vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ])
        );
    }

    #[test]
    fn test_rejects_invalid_origin() {
        assert!(AllowedOrigins::from_origins(["http://bad\norigin"]).is_err());
    }
}
