//! One request, one response, over a newline-delimited TCP stream.
//!
//! # Wire Format
//!
//! ```text
//! {"method":"Arith.Echo","params":[{"greeting":"hi"}],"id":0}\n
//! {"id":0,"result":"hi","error":null}\n
//! ```

use std::{
    io::{self, BufRead as _, BufReader, Write as _},
    net::{TcpStream, ToSocketAddrs as _},
    time::Duration,
};

use serde_json::value::RawValue;
use tracing::{debug, trace};

use crate::jsonrpc_types::{Dialect, Id, Reply, Response, ResponseError};
use crate::render;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("dial tcp {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("parameters are not valid JSON")]
    InvalidParams(#[source] serde_json::Error),
    #[error("couldn't encode request")]
    Encode(#[source] serde_json::Error),
    #[error("no response within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Io(io::Error),
    #[error("connection closed before a response was received")]
    Closed,
    #[error("invalid JSON reply {raw:?}")]
    Malformed {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: Id, actual: Id },
    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl CallError {
    fn io(e: io::Error, timeout: Option<Duration>) -> Self {
        match (e.kind(), timeout) {
            (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(timeout)) => {
                CallError::TimedOut(timeout)
            }
            _ => CallError::Io(e),
        }
    }
}

/// Turn payload text into a raw JSON value, ready to embed in a request.
///
/// Text spanning several lines is compacted so the request stays on one line;
/// anything else is kept byte-for-byte.
pub fn encode_payload(text: &str) -> Result<Box<RawValue>, CallError> {
    let text = match text.contains(['\n', '\r']) {
        true => render::compact(text),
        false => text.to_owned(),
    };
    RawValue::from_string(text).map_err(CallError::InvalidParams)
}

/// Render the request line, without the trailing newline.
pub fn encode_request(
    dialect: Dialect,
    method: &str,
    payload: Option<&str>,
    id: &Id,
) -> Result<String, CallError> {
    let payload = payload.map(encode_payload).transpose()?;
    serde_json::to_string(&dialect.request(method, payload.as_deref(), id))
        .map_err(CallError::Encode)
}

/// A connection to a JSON-RPC server.
///
/// The socket is closed when this is dropped.
#[derive(Debug)]
pub struct Client {
    stream: BufReader<TcpStream>,
    timeout: Option<Duration>,
}

impl Client {
    /// Connect to `addr` (`host:port`), trying each resolved address in turn.
    ///
    /// With a `timeout`, it bounds the connect and every later read and write.
    pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<Self, CallError> {
        let connect_error = |source: io::Error| CallError::Connect {
            addr: addr.to_owned(),
            source,
        };
        let stream = match timeout {
            None => TcpStream::connect(addr).map_err(connect_error)?,
            Some(timeout) => {
                let mut last_err = None;
                let mut stream = None;
                for socket_addr in addr.to_socket_addrs().map_err(connect_error)? {
                    match TcpStream::connect_timeout(&socket_addr, timeout) {
                        Ok(it) => {
                            stream = Some(it);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                let stream = stream.ok_or_else(|| {
                    connect_error(last_err.unwrap_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
                    }))
                })?;
                stream.set_read_timeout(Some(timeout)).map_err(connect_error)?;
                stream.set_write_timeout(Some(timeout)).map_err(connect_error)?;
                stream
            }
        };
        debug!(peer = ?stream.peer_addr().ok(), "connected");
        Ok(Self {
            stream: BufReader::new(stream),
            timeout,
        })
    }

    /// Send one encoded request and wait for its response.
    ///
    /// `id` and `dialect` are those the request was encoded with.
    pub fn call(&mut self, request: &str, id: &Id, dialect: Dialect) -> Result<Reply, CallError> {
        trace!(request, "sending");
        let timeout = self.timeout;
        let io_error = |e| CallError::io(e, timeout);
        let writer = self.stream.get_mut();
        writer.write_all(request.as_bytes()).map_err(io_error)?;
        writer.write_all(b"\n").map_err(io_error)?;
        writer.flush().map_err(io_error)?;

        let mut line = String::new();
        let read = self.stream.read_line(&mut line).map_err(io_error)?;
        if read == 0 {
            return Err(CallError::Closed);
        }
        trace!(response = line.trim_end(), "received");

        let response = serde_json::from_str::<Response>(&line).map_err(|source| {
            CallError::Malformed {
                raw: line.trim_end().to_owned(),
                source,
            }
        })?;
        if response.id != *id {
            return Err(CallError::IdMismatch {
                expected: id.clone(),
                actual: response.id,
            });
        }
        Ok(response.into_result(dialect)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{io::Read as _, net::TcpListener, thread};

    /// Accepts one connection, records the request line and answers with `reply`.
    fn serve_once(reply: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).unwrap();
            reader.get_mut().write_all(reply.as_bytes()).unwrap();
            request
        });
        (addr, handle)
    }

    fn id0() -> Id {
        Id::Number(0.into())
    }

    #[test]
    fn payload_on_one_line_is_kept() {
        assert_eq!(encode_payload(r#"{"x": 1}"#).unwrap().get(), r#"{"x": 1}"#);
    }

    #[test]
    fn payload_on_many_lines_is_compacted() {
        assert_eq!(
            encode_payload("{\n  \"x\": 1\n}\n").unwrap().get(),
            r#"{"x":1}"#
        );
    }

    #[test]
    fn invalid_payload_is_rejected() {
        assert!(matches!(
            encode_payload("{oops"),
            Err(CallError::InvalidParams(_))
        ));
        assert!(matches!(encode_payload(""), Err(CallError::InvalidParams(_))));
    }

    #[test]
    fn encode_v1() {
        assert_eq!(
            encode_request(Dialect::V1, "Echo", Some(r#"{"greeting":"hi"}"#), &id0()).unwrap(),
            r#"{"method":"Echo","params":[{"greeting":"hi"}],"id":0}"#
        );
    }

    #[test]
    fn round_trip() {
        let (addr, server) = serve_once("{\"id\":0,\"result\":{\"greeting\":\"hi\"},\"error\":null}\n");
        let request = encode_request(Dialect::V1, "Echo", Some(r#"{"greeting":"hi"}"#), &id0()).unwrap();
        let mut client = Client::connect(&addr, None).unwrap();
        let reply = client.call(&request, &id0(), Dialect::V1).unwrap();
        assert_eq!(reply.get(), r#"{"greeting":"hi"}"#);
        assert_eq!(
            server.join().unwrap(),
            "{\"method\":\"Echo\",\"params\":[{\"greeting\":\"hi\"}],\"id\":0}\n"
        );
    }

    #[test]
    fn reply_without_trailing_newline() {
        let (addr, _server) = serve_once(r#"{"id":0,"result":[1,2],"error":null}"#);
        let mut client = Client::connect(&addr, None).unwrap();
        let reply = client.call(r#"{"method":"x","params":[null],"id":0}"#, &id0(), Dialect::V1).unwrap();
        assert_eq!(reply.get(), "[1,2]");
    }

    #[test]
    fn remote_error() {
        let (addr, _server) = serve_once("{\"id\":0,\"result\":null,\"error\":\"rpc: can't find method Nope\"}\n");
        let mut client = Client::connect(&addr, None).unwrap();
        let err = client.call(r#"{"method":"Nope","params":[null],"id":0}"#, &id0(), Dialect::V1).unwrap_err();
        assert!(matches!(err, CallError::Response(ResponseError::Remote(_))));
        assert_eq!(err.to_string(), "rpc: can't find method Nope");
    }

    #[test]
    fn malformed_reply_is_rejected() {
        let (addr, _server) = serve_once("this is not json\n");
        let mut client = Client::connect(&addr, None).unwrap();
        let err = client.call(r#"{"method":"x","params":[null],"id":0}"#, &id0(), Dialect::V1).unwrap_err();
        assert!(matches!(&err, CallError::Malformed { raw, .. } if raw == "this is not json"));
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let (addr, _server) = serve_once("{\"id\":1,\"result\":1,\"error\":null}\n");
        let mut client = Client::connect(&addr, None).unwrap();
        let err = client.call(r#"{"method":"x","params":[null],"id":0}"#, &id0(), Dialect::V1).unwrap_err();
        assert!(matches!(err, CallError::IdMismatch { .. }));
    }

    #[test]
    fn closed_without_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0; 64];
            let _ = stream.read(&mut buf);
        });
        let mut client = Client::connect(&addr, None).unwrap();
        let err = client.call(r#"{"method":"x","params":[null],"id":0}"#, &id0(), Dialect::V1).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, CallError::Closed | CallError::Io(_)));
    }

    #[test]
    fn connect_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        assert!(matches!(
            Client::connect(&addr, None),
            Err(CallError::Connect { .. })
        ));
        assert!(matches!(
            Client::connect(&addr, Some(Duration::from_secs(1))),
            Err(CallError::Connect { .. })
        ));
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut client = Client::connect(&addr, Some(Duration::from_millis(200))).unwrap();
        let err = client.call(r#"{"method":"x","params":[null],"id":0}"#, &id0(), Dialect::V1).unwrap_err();
        assert!(matches!(err, CallError::TimedOut(_)));
        drop(listener);
    }

    #[test]
    fn v2_reply_without_version_is_rejected() {
        let (addr, _server) = serve_once("{\"id\":0,\"result\":1}\n");
        let mut client = Client::connect(&addr, None).unwrap();
        let err = client
            .call(r#"{"jsonrpc":"2.0","method":"x","id":0}"#, &id0(), Dialect::V2)
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Response(ResponseError::MissingVersion)
        ));
    }
}
