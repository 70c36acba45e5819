use crate::metadata::{Metadata, MetadataError};
use crate::options::CallOptions;
use crate::timeout::{GrpcTimeout, GRPC_TIMEOUT_HEADER};
use std::time::Duration;
use thiserror::Error;

pub const CONTENT_TYPE_GRPC: &str = "application/grpc";

// Keys the protocol writes itself; custom metadata may not set them.
const RESERVED_KEYS: [&str; 5] = ["content-type", "te", "user-agent", "host", "connection"];
const RESERVED_PREFIX: &str = "grpc-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeadError {
    #[error("request path {0:?} must start with '/'")]
    InvalidPath(String),
    #[error("custom metadata may not set reserved header {0:?}")]
    ReservedHeader(String),
    #[error("invalid header: {0}")]
    Metadata(#[from] MetadataError),
}

/// Where requests go and how the client identifies itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub scheme: String,
    pub host: String,
    pub user_agent: String,
}

impl Authority {
    pub fn new(host: impl Into<String>) -> Self {
        Authority {
            scheme: "https".to_string(),
            host: host.into(),
            user_agent: default_user_agent(),
        }
    }
}

pub fn default_user_agent() -> String {
    format!("streamcall-rust/{}", env!("CARGO_PKG_VERSION"))
}

/// The request header sent once, first, on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: &'static str,
    pub scheme: String,
    pub path: String,
    pub authority: String,
    /// Regular headers in wire order, protocol headers first.
    pub headers: Metadata,
}

impl RequestHead {
    /// Build the request head for a call to `path`.
    ///
    /// `remaining` is the time left before the call's deadline, if it has one; it is
    /// advertised to the server as `grpc-timeout`.
    pub fn build(
        path: &str,
        authority: &Authority,
        options: &CallOptions,
        remaining: Option<Duration>,
    ) -> Result<Self, HeadError> {
        if !path.starts_with('/') {
            return Err(HeadError::InvalidPath(path.to_string()));
        }

        for key in options.custom_metadata.keys() {
            if RESERVED_KEYS.contains(&key) || key.starts_with(RESERVED_PREFIX) {
                return Err(HeadError::ReservedHeader(key.to_string()));
            }
        }

        let mut headers = Metadata::new();
        headers.set_reserved("content-type", CONTENT_TYPE_GRPC.to_string());
        headers.set_reserved("te", "trailers".to_string());
        headers.append("user-agent", authority.user_agent.clone())?;
        if let Some(remaining) = remaining {
            headers.set_reserved(
                GRPC_TIMEOUT_HEADER,
                GrpcTimeout::from_duration(remaining).header_value(),
            );
        }
        if !options.accept_encodings.is_empty() {
            headers.set_reserved("grpc-accept-encoding", options.accept_encodings.join(","));
        }
        headers.extend(&options.custom_metadata);

        Ok(RequestHead {
            method: if options.cacheable { "GET" } else { "POST" },
            scheme: authority.scheme.clone(),
            path: path.to_string(),
            authority: authority.host.clone(),
            headers,
        })
    }

    /// Pseudo-headers followed by regular headers, as an HTTP/2 header block.
    pub fn header_list(&self) -> Vec<(String, String)> {
        let mut list = vec![
            (":method".to_string(), self.method.to_string()),
            (":scheme".to_string(), self.scheme.clone()),
            (":path".to_string(), self.path.clone()),
            (":authority".to_string(), self.authority.clone()),
        ];
        list.extend(
            self.headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> Authority {
        Authority {
            scheme: "http".to_string(),
            host: "localhost:50051".to_string(),
            user_agent: "test-agent/1.0".to_string(),
        }
    }

    #[test]
    fn test_build_minimal_head() {
        let head = RequestHead::build(
            "/echo.Echo/Update",
            &authority(),
            &CallOptions::new(),
            None,
        )
        .unwrap();

        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/echo.Echo/Update");
        assert_eq!(head.headers.get("content-type"), Some(CONTENT_TYPE_GRPC));
        assert_eq!(head.headers.get("te"), Some("trailers"));
        assert_eq!(head.headers.get("user-agent"), Some("test-agent/1.0"));
        assert!(!head.headers.contains_key(GRPC_TIMEOUT_HEADER));
        assert!(!head.headers.contains_key("grpc-accept-encoding"));
    }

    #[test]
    fn test_build_with_options() {
        let mut md = Metadata::new();
        md.append("x-request-id", "abc").unwrap();
        let options = CallOptions::new()
            .with_metadata(md)
            .with_accept_encoding("gzip")
            .with_accept_encoding("deflate")
            .cacheable(true);

        let head = RequestHead::build(
            "/echo.Echo/Get",
            &authority(),
            &options,
            Some(Duration::from_secs(1)),
        )
        .unwrap();

        assert_eq!(head.method, "GET");
        assert_eq!(head.headers.get(GRPC_TIMEOUT_HEADER), Some("1000000u"));
        assert_eq!(head.headers.get("grpc-accept-encoding"), Some("gzip,deflate"));

        let list = head.header_list();
        assert_eq!(list[0], (":method".to_string(), "GET".to_string()));
        assert_eq!(list[2], (":path".to_string(), "/echo.Echo/Get".to_string()));
        // Custom metadata is written after every protocol header
        assert_eq!(
            list.last(),
            Some(&("x-request-id".to_string(), "abc".to_string()))
        );
    }

    #[test]
    fn test_reserved_custom_metadata_rejected() {
        let mut md = Metadata::new();
        md.append("grpc-status", "0").unwrap();
        let options = CallOptions::new().with_metadata(md);
        assert_eq!(
            RequestHead::build("/a/b", &authority(), &options, None),
            Err(HeadError::ReservedHeader("grpc-status".to_string()))
        );

        let mut md = Metadata::new();
        md.append("content-type", "text/plain").unwrap();
        let options = CallOptions::new().with_metadata(md);
        assert!(matches!(
            RequestHead::build("/a/b", &authority(), &options, None),
            Err(HeadError::ReservedHeader(_))
        ));
    }

    #[test]
    fn test_invalid_path_rejected() {
        assert_eq!(
            RequestHead::build("echo/Update", &authority(), &CallOptions::new(), None),
            Err(HeadError::InvalidPath("echo/Update".to_string()))
        );
    }

    #[test]
    fn test_invalid_user_agent_rejected() {
        let mut authority = authority();
        authority.user_agent = "agent\n".to_string();
        assert!(matches!(
            RequestHead::build("/a/b", &authority, &CallOptions::new(), None),
            Err(HeadError::Metadata(MetadataError::InvalidValue { .. }))
        ));
    }
}
