//! HTTP/1.1 vocabulary shared by the server, the router and the cache.
//!
//! [`ResponseWriter`] is the sink every layer writes into; [`Response`] is
//! what handlers build and what a recorded sink turns back into.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;
pub mod writer;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;
pub use writer::{ResponseRecorder, ResponseWriter};

// Declares `StatusCode` together with its numeric and reason-phrase tables so
// the three can never drift apart.
macro_rules! status_codes {
    ($( $variant:ident = $code:literal => $reason:literal, )+) => {
        /// An HTTP response status code.
        ///
        /// # Examples
        ///
        /// ```
        /// use starmap::http::StatusCode;
        ///
        /// let status = StatusCode::Ok;
        /// assert_eq!(status.as_u16(), 200);
        /// assert_eq!(status.canonical_reason(), "OK");
        /// assert_eq!(StatusCode::from_u16(304), Some(StatusCode::NotModified));
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $( $variant = $code, )+
        }

        impl StatusCode {
            /// Returns the numeric status code as a `u16`.
            pub fn as_u16(self) -> u16 {
                self as u16
            }

            /// Returns the canonical reason phrase for this status code.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $( Self::$variant => $reason, )+
                }
            }

            /// Looks up a known status code by its numeric value.
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    Continue = 100 => "Continue",
    SwitchingProtocols = 101 => "Switching Protocols",

    Ok = 200 => "OK",
    Created = 201 => "Created",
    Accepted = 202 => "Accepted",
    NoContent = 204 => "No Content",
    PartialContent = 206 => "Partial Content",

    MovedPermanently = 301 => "Moved Permanently",
    Found = 302 => "Found",
    SeeOther = 303 => "See Other",
    NotModified = 304 => "Not Modified",
    TemporaryRedirect = 307 => "Temporary Redirect",
    PermanentRedirect = 308 => "Permanent Redirect",

    BadRequest = 400 => "Bad Request",
    Unauthorized = 401 => "Unauthorized",
    Forbidden = 403 => "Forbidden",
    NotFound = 404 => "Not Found",
    MethodNotAllowed = 405 => "Method Not Allowed",
    Conflict = 409 => "Conflict",
    PayloadTooLarge = 413 => "Payload Too Large",
    UnprocessableEntity = 422 => "Unprocessable Entity",
    TooManyRequests = 429 => "Too Many Requests",

    InternalServerError = 500 => "Internal Server Error",
    NotImplemented = 501 => "Not Implemented",
    BadGateway = 502 => "Bad Gateway",
    ServiceUnavailable = 503 => "Service Unavailable",
    GatewayTimeout = 504 => "Gateway Timeout",
}

impl StatusCode {
    /// Returns `true` for `2xx` codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Returns `true` for `4xx` and `5xx` codes.
    pub fn is_error(self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (code, reason) = (self.as_u16(), self.canonical_reason());
        write!(f, "{code} {reason}")
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

// Same idea as `status_codes!`: one table feeds the enum, `as_str` and parsing.
macro_rules! methods {
    ($( $variant:ident => $token:literal, )+) => {
        /// A request method.
        ///
        /// Unknown tokens are kept as [`Method::Custom`], so extension methods
        /// still route and get their own cache keys.
        ///
        /// ```
        /// use starmap::http::Method;
        ///
        /// assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        /// assert_eq!("PURGE".parse::<Method>().unwrap().as_str(), "PURGE");
        /// ```
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Method {
            $( $variant, )+
            Custom(String),
        }

        impl Method {
            /// The token as sent on the request line.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $token, )+
                    Self::Custom(token) => token.as_str(),
                }
            }
        }

        impl std::str::FromStr for Method {
            type Err = std::convert::Infallible;

            fn from_str(token: &str) -> Result<Self, Self::Err> {
                Ok(match token {
                    $( $token => Self::$variant, )+
                    _ => Self::Custom(token.to_owned()),
                })
            }
        }
    };
}

methods! {
    Get => "GET",
    Head => "HEAD",
    Post => "POST",
    Put => "PUT",
    Patch => "PATCH",
    Delete => "DELETE",
    Options => "OPTIONS",
    Connect => "CONNECT",
    Trace => "TRACE",
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        Method::as_str(self)
    }
}
