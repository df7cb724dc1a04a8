use std::{fmt, str::FromStr};

use http::{Uri, uri::Authority};

use crate::utils::combine_uris;

/// Reasons an upstream origin URL is rejected.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{url:?} is not a valid url: {source}")]
    Invalid {
        url: String,
        #[source]
        source: http::uri::InvalidUri,
    },
    #[error("{0:?} is not an absolute url, expected http://host[:port][/path]")]
    NotAbsolute(String),
    #[error("{url:?} uses unsupported scheme {scheme:?}, expected http or https")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("{0:?} has no host")]
    MissingHost(String),
}

/// A single upstream origin every request of one listener is forwarded to.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Scheme, authority and optional base path/query of the origin
    pub origin: Uri,
}

impl Upstream {
    pub fn parse(url: &str) -> Result<Self, UpstreamError> {
        let origin = url.parse::<Uri>().map_err(|source| UpstreamError::Invalid {
            url: url.to_owned(),
            source,
        })?;

        let scheme = origin
            .scheme_str()
            .ok_or_else(|| UpstreamError::NotAbsolute(url.to_owned()))?;
        if scheme != "http" && scheme != "https" {
            return Err(UpstreamError::UnsupportedScheme {
                url: url.to_owned(),
                scheme: scheme.to_owned(),
            });
        }

        if origin.host().is_none_or(str::is_empty) {
            return Err(UpstreamError::MissingHost(url.to_owned()));
        }

        Ok(Self { origin })
    }

    /// Authority the outbound `Host` header is derived from.
    pub fn authority(&self) -> Option<&Authority> {
        self.origin.authority()
    }

    /// Rewrites an inbound request target onto this origin.
    pub fn target_uri(&self, inbound: &Uri) -> Result<Uri, http::Error> {
        combine_uris(&self.origin, inbound)
    }
}

impl FromStr for Upstream {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.origin)
    }
}
