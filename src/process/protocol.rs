//! Wire format between a process handle and its generator worker.
//!
//! Requests are JSON objects, one per line, tagged by `fn`:
//!
//! | request                              | reply                          |
//! |--------------------------------------|--------------------------------|
//! | `{"fn":"load","path":...}`           | `ok` or an error text line     |
//! | `{"fn":"set","params":{...}}`        | `ok` or an error text line     |
//! | `{"fn":"describe"}`                  | one JSON line of `ParamSpec`s  |
//! | `{"fn":"process"}`                   | one raw block (or splice mark) |
//! | `{"fn":"exit"}`                      | none, the worker exits         |
//!
//! Text replies are terminated by a single newline. Blocks are exactly
//! `block_frames * 2 * 4` bytes of little-endian `f32`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reply text for a successful `load` or `set`.
pub const OK_REPLY: &str = "ok";

/// One request from the renderer side to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fn", rename_all = "lowercase")]
pub enum Request {
    Load { path: String },
    Set { params: BTreeMap<String, String> },
    Describe,
    Process,
    Exit,
}

impl Request {
    /// Encodes the request as one newline-terminated line.
    pub fn to_line(&self) -> String {
        // Serializing a plain enum of strings cannot fail.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    /// Decodes one request line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Encodes a text reply as one line; embedded newlines are flattened.
pub fn text_reply(text: &str) -> Vec<u8> {
    let mut reply = text.replace(['\r', '\n'], " ").into_bytes();
    reply.push(b'\n');
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lines() {
        assert_eq!(Request::Process.to_line(), "{\"fn\":\"process\"}\n");
        assert_eq!(Request::Exit.to_line(), "{\"fn\":\"exit\"}\n");
        assert_eq!(
            Request::Load {
                path: "proj/bass".to_string()
            }
            .to_line(),
            "{\"fn\":\"load\",\"path\":\"proj/bass\"}\n"
        );
    }

    #[test]
    fn test_set_round_trip() {
        let mut params = BTreeMap::new();
        params.insert("freq".to_string(), "220".to_string());
        params.insert("gain".to_string(), "0.5".to_string());
        let request = Request::Set { params };
        assert_eq!(Request::from_line(&request.to_line()).unwrap(), request);
    }

    #[test]
    fn test_unknown_fn_rejected() {
        assert!(Request::from_line("{\"fn\":\"launch\"}").is_err());
        assert!(Request::from_line("not json").is_err());
    }

    #[test]
    fn test_text_reply_is_one_line() {
        assert_eq!(text_reply("ok"), b"ok\n");
        assert_eq!(text_reply("bad\nthing"), b"bad thing\n");
    }
}
