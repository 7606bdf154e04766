//! Request and response envelopes for line-oriented JSON-RPC over TCP.
//!
//! Two dialects are spoken:
//! - [`Dialect::V1`], the envelope used by `JSON-RPC 1.0` servers such as Go's
//!   `net/rpc/jsonrpc`: `params` is always a one-element Array and the response
//!   carries both `result` and `error`, one of them `null`.
//! - [`Dialect::V2`], the [`JSON-RPC 2.0` Specification](https://www.jsonrpc.org/specification).
//!
//! > When quoted, the `JSON-RPC 2.0` specification will appear as blockquoted text, like so.

use std::{borrow::Cow, fmt, str::FromStr};

use clap::ValueEnum;
use serde::{
    de::{Error as _, Unexpected},
    ser::SerializeSeq as _,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::{value::RawValue, Number, Value};

/// The envelope convention used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Dialect {
    /// `{"method", "params": [P], "id"}`, as spoken by Go's `net/rpc/jsonrpc`.
    #[default]
    V1,
    /// `{"jsonrpc": "2.0", "method", "params": P, "id"}`.
    V2,
}

impl Dialect {
    pub fn request<'a>(
        self,
        method: &'a str,
        payload: Option<&'a RawValue>,
        id: &'a Id,
    ) -> Request<'a> {
        match self {
            Dialect::V1 => Request {
                jsonrpc: None,
                method,
                params: Params::Wrapped(payload),
                id,
            },
            Dialect::V2 => Request {
                jsonrpc: Some(V2),
                method,
                params: payload.map_or(Params::Omitted, Params::Direct),
                id,
            },
        }
    }
}

/// A request object, borrowing its payload so raw parameter text is written verbatim.
#[derive(Serialize, Debug, Clone, Copy)]
pub struct Request<'a> {
    /// > A String specifying the version of the JSON-RPC protocol.
    /// > MUST be exactly "2.0".
    ///
    /// Absent in [`Dialect::V1`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<V2>,
    /// > A String containing the name of the method to be invoked.
    pub method: &'a str,
    /// > A Structured value that holds the parameter values to be used during the
    /// > invocation of the method.
    /// > This member MAY be omitted.
    #[serde(skip_serializing_if = "Params::is_omitted")]
    pub params: Params<'a>,
    /// > An identifier established by the Client that MUST contain a String,
    /// > Number, or NULL value if included.
    pub id: &'a Id,
}

/// How the payload is placed in the `params` member.
#[derive(Debug, Clone, Copy)]
pub enum Params<'a> {
    /// No `params` member at all.
    Omitted,
    /// A one-element Array, holding `null` when there is no payload.
    Wrapped(Option<&'a RawValue>),
    /// The payload itself.
    Direct(&'a RawValue),
}

impl Params<'_> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Params::Omitted)
    }
}

impl Serialize for Params<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Params::Omitted => serializer.serialize_none(),
            Params::Wrapped(payload) => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(payload)?;
                seq.end()
            }
            Params::Direct(payload) => payload.serialize(serializer),
        }
    }
}

/// A witness of the literal string "2.0"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct V2;

impl<'de> Deserialize<'de> for V2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match &*Cow::<str>::deserialize(deserializer)? {
            "2.0" => Ok(Self),
            other => Err(D::Error::invalid_value(Unexpected::Str(other), &"2.0")),
        }
    }
}

impl Serialize for V2 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

/// See [`Request::id`].
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(untagged, expecting = "a string, a number, or null")]
pub enum Id {
    String(String),
    Number(Number),
    #[default]
    Null,
}

impl FromStr for Id {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(it) => write!(f, "{it:?}"),
            Id::Number(it) => write!(f, "{it}"),
            Id::Null => f.write_str("null"),
        }
    }
}

/// A response object in either dialect.
///
/// `result` keeps the server's bytes untouched.
#[derive(Debug, Deserialize)]
pub struct Response {
    /// > A String specifying the version of the JSON-RPC protocol.
    /// > MUST be exactly "2.0".
    ///
    /// Absent in [`Dialect::V1`] replies.
    #[serde(default)]
    pub jsonrpc: Option<V2>,
    /// > It MUST be the same as the value of the id member in the Request Object.
    #[serde(default)]
    pub id: Id,
    /// Distinguishes an absent member from `null`.
    #[serde(default, deserialize_with = "deserialize_some")]
    pub result: Option<Option<Box<RawValue>>>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

/// Distinguish between absent and present but null.
///
/// See <https://github.com/serde-rs/serde/issues/984#issuecomment-314143738>
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl Response {
    /// A non-null `error` wins over any `result`, matching `JSON-RPC 1.0` servers
    /// that send both members.
    ///
    /// A [`Dialect::V2`] reply must carry `"jsonrpc": "2.0"`.
    pub fn into_result(self, dialect: Dialect) -> Result<Reply, ResponseError> {
        if dialect == Dialect::V2 && self.jsonrpc.is_none() {
            return Err(ResponseError::MissingVersion);
        }
        match (self.result, self.error) {
            (_, Some(error)) => Err(ResponseError::Remote(error)),
            (Some(result), None) => Ok(Reply(result)),
            (None, None) => Err(ResponseError::Incomplete),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The server reported an application error.
    #[error("{0}")]
    Remote(ErrorPayload),
    #[error("response must have an `error` or `result` member")]
    Incomplete,
    #[error("response is missing `\"jsonrpc\": \"2.0\"`")]
    MissingVersion,
}

/// The `result` member of a successful response, as received.
#[derive(Debug)]
pub struct Reply(Option<Box<RawValue>>);

impl Reply {
    /// The reply text; a `null` result reads as `null`.
    pub fn get(&self) -> &str {
        self.0.as_deref().map_or("null", RawValue::get)
    }
}

/// The `error` member of a response.
///
/// `JSON-RPC 1.0` servers send a string, `JSON-RPC 2.0` servers an [`Error`] object.
/// Either is accepted regardless of the dialect spoken.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Object(Error),
    Message(String),
    Other(Value),
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPayload::Object(it) => it.fmt(f),
            ErrorPayload::Message(it) if it.is_empty() => f.write_str("unspecified error"),
            ErrorPayload::Message(it) => f.write_str(it),
            ErrorPayload::Other(it) => write!(f, "invalid error {it}"),
        }
    }
}

/// A `JSON-RPC 2.0` error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Error {
    /// > A Number that indicates the error type that occurred.
    /// > This MUST be an integer.
    pub code: i64,
    /// > A String providing a short description of the error.
    pub message: String,
    /// > A Primitive or Structured value that contains additional information about the error.
    /// > This may be omitted.
    #[serde(default)]
    pub data: Option<Value>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(data) = &self.data {
            write!(f, ": {data}")?;
        }
        Ok(())
    }
}
