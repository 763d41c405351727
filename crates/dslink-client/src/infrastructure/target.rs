//! Where to connect, and in which wire format.
//!
//! A broker endpoint is given as a WebSocket URL.  The wire format is
//! negotiated through the URL as well: `?format=msgpack` selects MessagePack
//! in binary frames, anything else (or nothing) selects JSON in text frames.
//!
//! ```text
//! wss://broker.example.com/ws?dsId=link-1&format=msgpack
//! └┬┘   └───────┬────────┘└┬┘ └─────────────┬───────────┘
//! scheme      host    path       query (kept verbatim)
//! ```

use std::fmt;

use dslink_core::WireFormat;
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::Uri;

/// Errors from parsing a broker URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),

    #[error("URL '{0}' has no host")]
    MissingHost(String),

    #[error("unknown wire format '{0}' (expected json or msgpack)")]
    UnknownFormat(String),
}

/// `ws` or `wss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

/// A fully resolved connect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus query string, always starting with `/`.
    pub path: String,
    pub format: WireFormat,
}

impl ConnectTarget {
    /// Parses a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetError`] for unparsable URLs, other schemes, a missing
    /// host, or an unknown `format=` value.
    ///
    /// # Example
    ///
    /// ```rust
    /// use dslink_client::infrastructure::target::{ConnectTarget, Scheme};
    /// use dslink_core::WireFormat;
    ///
    /// let target = ConnectTarget::parse("wss://broker.local/ws?format=msgpack").unwrap();
    /// assert_eq!(target.scheme, Scheme::Wss);
    /// assert_eq!(target.port, 443);
    /// assert_eq!(target.format, WireFormat::MessagePack);
    /// ```
    pub fn parse(url: &str) -> Result<Self, TargetError> {
        let uri: Uri = url.parse().map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
            TargetError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("ws") => Scheme::Ws,
            Some(s) if s.eq_ignore_ascii_case("wss") => Scheme::Wss,
            Some(other) => return Err(TargetError::UnsupportedScheme(other.to_string())),
            None => return Err(TargetError::UnsupportedScheme(String::new())),
        };

        let host = match uri.host() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(TargetError::MissingHost(url.to_string())),
        };

        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());

        let path = match uri.path_and_query() {
            Some(pq) if pq.as_str().starts_with('/') => pq.as_str().to_string(),
            Some(pq) => format!("/{}", pq.as_str()),
            None => "/".to_string(),
        };

        let format = match uri.query().and_then(format_param) {
            Some(name) => {
                WireFormat::from_name(name).ok_or_else(|| TargetError::UnknownFormat(name.to_string()))?
            }
            None => WireFormat::Json,
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
            format,
        })
    }

    /// Replaces the negotiated format and rewrites the `format=` query
    /// parameter to match, so the broker sees the same choice.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        let param = format!("format={}", format.name());
        let rewritten = {
            let (path, query) = self.path.split_once('?').unwrap_or((self.path.as_str(), ""));
            let mut pairs: Vec<&str> = query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .filter(|pair| pair.split_once('=').map_or(*pair, |(key, _)| key) != "format")
                .collect();
            pairs.push(&param);
            format!("{path}?{}", pairs.join("&"))
        };

        self.path = rewritten;
        self.format = format;
        self
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Wss
    }

    /// The URL handed to the WebSocket client, with an explicit port.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url(), self.format)
    }
}

/// Value of the first `format=` pair in a query string.
fn format_param(query: &str) -> Option<&str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "format")
        .map(|(_, value)| value)
}
