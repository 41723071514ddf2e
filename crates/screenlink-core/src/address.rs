//! Connection URL parsing and transport selection.
//!
//! Every client destination and server location is a URL of the form
//!
//! ```text
//! scheme://[host[:port]][/path]
//! ```
//!
//! The scheme alone decides which wire transport is used:
//!
//! | scheme              | transport                                   |
//! |---------------------|---------------------------------------------|
//! | `unix`              | [`TransportKind::Embedded`] (unix socket)   |
//! | `tcp+tv`, `tv+tcp`  | [`TransportKind::RawSocket`] (TCP framing)  |
//! | anything else       | [`TransportKind::Unknown`]                  |
//!
//! Parsing is strict: a URL either matches the grammar completely or is
//! rejected as a whole. There is no partially parsed result.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

use crate::error::ScreenlinkError;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z][A-Za-z0-9+.\-]*)://(?:([A-Za-z0-9_.]+)(?::([1-9][0-9]*))?)?(/(?:[A-Za-z0-9_.\-]+(?:/[A-Za-z0-9_.\-]+)*/?)?)?$",
    )
    .expect("connection url regex must compile")
});

/// The URL did not match the connection address grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a valid connection address: '{url}'")]
pub struct AddressParseError {
    pub url: String,
}

impl From<AddressParseError> for ScreenlinkError {
    fn from(err: AddressParseError) -> Self {
        ScreenlinkError::MalformedAddress { url: err.url }
    }
}

/// The wire mechanism selected by a URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Local RPC over a unix domain socket.
    Embedded,
    /// Length-prefixed envelopes over TCP.
    RawSocket,
    Unknown,
}

impl TransportKind {
    /// Select the transport for a scheme. Case-insensitive and total.
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme.to_ascii_lowercase().as_str() {
            "unix" => TransportKind::Embedded,
            "tcp+tv" | "tv+tcp" => TransportKind::RawSocket,
            _ => TransportKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Embedded => "embedded",
            TransportKind::RawSocket => "raw-socket",
            TransportKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Select the transport for a scheme.
///
/// Free-function form of [`TransportKind::from_scheme`].
pub fn select_transport(scheme: &str) -> TransportKind {
    TransportKind::from_scheme(scheme)
}

/// A parsed connection URL.
///
/// Only produced by [`ConnectionAddress::parse`]; immutable afterwards.
/// `port` is 0 when the URL carries no port. `path` keeps its leading `/`
/// and any trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionAddress {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl ConnectionAddress {
    /// Parse a connection URL.
    ///
    /// The scheme is lowercased; host and path are returned verbatim.
    pub fn parse(url: &str) -> Result<Self, AddressParseError> {
        let reject = || AddressParseError {
            url: url.to_string(),
        };

        let caps = URL_RE.captures(url).ok_or_else(reject)?;

        let port = match caps.get(3) {
            // The digit run may be arbitrarily long; anything past u16 is invalid.
            Some(m) => m.as_str().parse::<u16>().map_err(|_| reject())?,
            None => 0,
        };

        Ok(Self {
            scheme: caps[1].to_ascii_lowercase(),
            host: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            port,
            path: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The transport this address selects.
    pub fn transport(&self) -> TransportKind {
        TransportKind::from_scheme(&self.scheme)
    }

    /// The same address with a different port.
    ///
    /// Used by servers that bind port 0 to report the port the OS assigned.
    pub(crate) fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl FromStr for ConnectionAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(url: &str) -> (String, String, u16, String, TransportKind) {
        let addr = ConnectionAddress::parse(url)
            .unwrap_or_else(|e| panic!("expected {} to parse: {}", url, e));
        (
            addr.scheme().to_string(),
            addr.host().to_string(),
            addr.port(),
            addr.path().to_string(),
            addr.transport(),
        )
    }

    #[test]
    fn test_valid_urls() {
        use TransportKind::*;
        let cases: &[(&str, &str, &str, u16, &str, TransportKind)] = &[
            ("unix:///tmp", "unix", "", 0, "/tmp", Embedded),
            ("Unix:///tmp", "unix", "", 0, "/tmp", Embedded),
            ("UNIX:///tmp", "unix", "", 0, "/tmp", Embedded),
            ("unix:///Path/_SubDir/d.-2/", "unix", "", 0, "/Path/_SubDir/d.-2/", Embedded),
            ("unix:///", "unix", "", 0, "/", Embedded),
            ("unix://", "unix", "", 0, "", Embedded),
            ("foo:///path/to/file", "foo", "", 0, "/path/to/file", Unknown),
            ("http://localhost:80", "http", "localhost", 80, "", Unknown),
            ("http://localhost:80/", "http", "localhost", 80, "/", Unknown),
            ("http://localhost:8000/path", "http", "localhost", 8000, "/path", Unknown),
            ("http://localhost:8000/path/", "http", "localhost", 8000, "/path/", Unknown),
            (
                "https://example.com:433/path/subpath",
                "https",
                "example.com",
                433,
                "/path/subpath",
                Unknown,
            ),
            (
                "ftp://host.example.com:21/path_1/_2",
                "ftp",
                "host.example.com",
                21,
                "/path_1/_2",
                Unknown,
            ),
            ("svn+ssh://localhost:12345", "svn+ssh", "localhost", 12345, "", Unknown),
            ("TCP+TV://host:456", "tcp+tv", "host", 456, "", RawSocket),
            ("tCp+tV://192.168.52.1:999", "tcp+tv", "192.168.52.1", 999, "", RawSocket),
            ("tcp+tv+0://192.168.52.1:999", "tcp+tv+0", "192.168.52.1", 999, "", Unknown),
            ("tv+tcp://myhost:2", "tv+tcp", "myhost", 2, "", RawSocket),
            ("tv+tcp://myhost", "tv+tcp", "myhost", 0, "", RawSocket),
            ("http://localhost:65535", "http", "localhost", 65535, "", Unknown),
            ("unix:///a/b", "unix", "", 0, "/a/b", Embedded),
        ];

        for (url, scheme, host, port, path, kind) in cases {
            assert_eq!(
                parts(url),
                (
                    scheme.to_string(),
                    host.to_string(),
                    *port,
                    path.to_string(),
                    *kind
                ),
                "url: {}",
                url
            );
        }
    }

    #[test]
    fn test_malformed_urls() {
        let cases = [
            "",
            "?",
            "foo",
            "12",
            "123://",
            "123://path",
            "123:///path",
            "unix:///tmp//",
            "unix:///tmp//foo",
            "unix:///tmp//foo/",
            "unix:////tmp",
            "unix:////",
            "http://localhost:0",
            "http://localhost:00",
            "http://localhost:01",
            "http://localhost:",
            "http://localhost:80:80",
            "http://localhost:65536",
            "http://localhost:9999999999999999999999999999999999999",
            "http:///localhost:80",
            "http:///localhost:80/path",
            "http://localhost:80/path//",
            "http://localhost:80/path:123",
            "unix:///tmp\n",
        ];

        for url in cases {
            let result = ConnectionAddress::parse(url);
            assert_eq!(
                result,
                Err(AddressParseError {
                    url: url.to_string()
                }),
                "url should be rejected: {:?}",
                url
            );
        }
    }

    #[test]
    fn test_host_and_path_keep_case() {
        let addr: ConnectionAddress = "TV+TCP://MyHost:7/Some/Path".parse().unwrap();
        assert_eq!(addr.scheme(), "tv+tcp");
        assert_eq!(addr.host(), "MyHost");
        assert_eq!(addr.path(), "/Some/Path");
    }

    #[test]
    fn test_select_transport_is_case_insensitive() {
        assert_eq!(select_transport("unix"), TransportKind::Embedded);
        assert_eq!(select_transport("UNIX"), TransportKind::Embedded);
        assert_eq!(select_transport("Tv+Tcp"), TransportKind::RawSocket);
        assert_eq!(select_transport("tcp+tv"), TransportKind::RawSocket);
        assert_eq!(select_transport("tcp"), TransportKind::Unknown);
        assert_eq!(select_transport(""), TransportKind::Unknown);
    }

    #[test]
    fn test_display_reproduces_normalized_url() {
        for url in ["unix:///tmp/sock", "tcp+tv://127.0.0.1:9000", "tv+tcp://myhost", "unix:///"] {
            let addr = ConnectionAddress::parse(url).unwrap();
            assert_eq!(addr.to_string(), url);
        }
        let addr = ConnectionAddress::parse("TCP+TV://host:456").unwrap();
        assert_eq!(addr.to_string(), "tcp+tv://host:456");
    }

    #[test]
    fn test_with_port() {
        let addr = ConnectionAddress::parse("tcp+tv://127.0.0.1").unwrap();
        let bound = addr.with_port(40123);
        assert_eq!(bound.port(), 40123);
        assert_eq!(bound.to_string(), "tcp+tv://127.0.0.1:40123");
    }

    #[test]
    fn test_parse_error_converts_to_malformed_address() {
        let err: ScreenlinkError = ConnectionAddress::parse("foo").unwrap_err().into();
        assert!(matches!(err, ScreenlinkError::MalformedAddress { url } if url == "foo"));
    }
}
