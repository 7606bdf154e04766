//! Building the request payload from command-line tokens or stdin.
//!
//! Tokens come in three shapes:
//!
//! ```text
//! value       a single string:        "value"
//! :json       a single raw JSON value: json
//! key=value   an Object member:       "key":"value"
//! key:=json   an Object member:       "key":json
//! ```
//!
//! Raw JSON is passed through untouched; nothing here validates it.

use std::{
    fmt,
    io::{self, Read},
};

use serde_json::Value;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Couldn't read from stdin")]
    Stdin(#[source] io::Error),
}

/// A single parameter value as typed on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Quoted as a JSON string.
    String(String),
    /// Inserted verbatim.
    Raw(String),
}

/// The payload to send, before it is rendered to JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Params {
    /// No tokens and nothing piped.
    #[default]
    Absent,
    /// Everything read from stdin, verbatim.
    Stdin(String),
    /// One token without an `=`.
    Single(Arg),
    /// `key=value` and `key:=value` tokens, in order.
    Object(Vec<(String, Arg)>),
}

impl Params {
    /// Classify the tokens following the method name.
    ///
    /// `stdin` is only consulted when there are no tokens, and should be `Some`
    /// only when data is being piped in.
    pub fn build<S, R>(tokens: &[S], stdin: Option<R>) -> Result<Self, ParamsError>
    where
        S: AsRef<str>,
        R: Read,
    {
        match tokens {
            [] => match stdin {
                Some(mut stdin) => {
                    let mut buf = String::new();
                    stdin.read_to_string(&mut buf).map_err(ParamsError::Stdin)?;
                    trace!(len = buf.len(), "read payload from stdin");
                    Ok(Params::Stdin(buf))
                }
                None => Ok(Params::Absent),
            },
            [token] if !token.as_ref().contains('=') => {
                let token = token.as_ref();
                Ok(Params::Single(match token.strip_prefix(':') {
                    Some(raw) => Arg::Raw(raw.to_owned()),
                    None => Arg::String(token.to_owned()),
                }))
            }
            tokens => tokens
                .iter()
                .map(|it| parse_member(it.as_ref()))
                .collect::<Result<_, _>>()
                .map(Params::Object),
        }
    }

    /// The JSON text of the payload, or [`None`] if there isn't one.
    pub fn to_json(&self) -> Option<String> {
        match self {
            Params::Absent => None,
            Params::Stdin(it) => Some(it.clone()),
            _ => Some(self.to_string()),
        }
    }
}

/// Split `key=value` or `key:=value` at the first `=`.
fn parse_member(token: &str) -> Result<(String, Arg), ParamsError> {
    let invalid = || ParamsError::InvalidArgument(token.to_owned());
    let (key, value) = token.split_once('=').ok_or_else(invalid)?;
    if key.is_empty() {
        return Err(invalid());
    }
    Ok(match key.strip_suffix(':') {
        Some(key) => (key.to_owned(), Arg::Raw(value.to_owned())),
        None => (key.to_owned(), Arg::String(value.to_owned())),
    })
}

fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::String(it) => f.write_str(&quote(it)),
            Arg::Raw(it) => f.write_str(it),
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Params::Absent => Ok(()),
            Params::Stdin(it) => f.write_str(it),
            Params::Single(it) => it.fmt(f),
            Params::Object(members) => {
                f.write_str("{")?;
                for (ix, (key, value)) in members.iter().enumerate() {
                    if ix > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", quote(key), value)?;
                }
                f.write_str("}")
            }
        }
    }
}
