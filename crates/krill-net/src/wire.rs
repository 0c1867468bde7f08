//! Textual wire messages.
//!
//! A message is one header line of space-separated tokens, optionally
//! followed by a binary body separated by `\r\n\r\n`. Absence of the
//! delimiter means no body. Two request namespaces exist: `RING` for the
//! overlay protocol and `CHUNK` for the placement protocol.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use krill_types::{ChunkKey, FileId, RingId};

use crate::error::NetError;

/// Header/body separator.
pub const BODY_DELIMITER: &[u8; 4] = b"\r\n\r\n";

/// Upper bound on any single wire message, header and body included.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// An inbound or outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `RING FINDSUCCESSOR <id>` — one routing step towards `id`.
    FindSuccessor {
        /// The id being resolved.
        id: RingId,
    },
    /// `RING NOTIFY <ip> <port>` — the sender offers itself as predecessor.
    Notify {
        /// Address of the candidate predecessor.
        addr: SocketAddr,
    },
    /// `RING GETPREDECESSOR` — ask for the receiver's predecessor.
    GetPredecessor,
    /// `RING DELEGATE <fileId> <chunkNo> <copyIndex>` + body — store on
    /// behalf of an owner that could not admit the chunk.
    Delegate {
        /// Replica being delegated.
        key: ChunkKey,
        /// Chunk bytes.
        body: Bytes,
    },
    /// `CHUNK PUTCHUNK <fileId> <chunkNo> <copyIndex>` + body.
    PutChunk {
        /// Replica being stored.
        key: ChunkKey,
        /// Chunk bytes.
        body: Bytes,
    },
    /// `CHUNK GETCHUNK <fileId> <chunkNo> <copyIndex>`.
    GetChunk {
        /// Replica being fetched.
        key: ChunkKey,
    },
    /// `CHUNK DELETE <fileId> <chunkNo>` — drop every copy of the chunk.
    Delete {
        /// File the chunk belongs to.
        file_id: FileId,
        /// Chunk index.
        chunk_no: u32,
    },
}

/// A reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `RING NODE <ip> <port>`.
    Node {
        /// The answering node reference's address.
        addr: SocketAddr,
    },
    /// `RING NODE NULL` — no predecessor known.
    NoPredecessor,
    /// `SUCCESS`.
    Success,
    /// `ERROR`.
    Error,
    /// `CHUNK CHUNK <fileId> <chunkNo>` + body.
    Chunk {
        /// File the chunk belongs to.
        file_id: FileId,
        /// Chunk index.
        chunk_no: u32,
        /// Chunk bytes.
        body: Bytes,
    },
}

impl Request {
    /// Verb name, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Request::FindSuccessor { .. } => "FINDSUCCESSOR",
            Request::Notify { .. } => "NOTIFY",
            Request::GetPredecessor => "GETPREDECESSOR",
            Request::Delegate { .. } => "DELEGATE",
            Request::PutChunk { .. } => "PUTCHUNK",
            Request::GetChunk { .. } => "GETCHUNK",
            Request::Delete { .. } => "DELETE",
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::FindSuccessor { id } => header(format!("RING FINDSUCCESSOR {id}")),
            Request::Notify { addr } => {
                header(format!("RING NOTIFY {} {}", addr.ip(), addr.port()))
            }
            Request::GetPredecessor => header("RING GETPREDECESSOR".to_string()),
            Request::Delegate { key, body } => with_body(
                format!(
                    "RING DELEGATE {} {} {}",
                    key.file_id, key.chunk_no, key.copy_index
                ),
                body,
            ),
            Request::PutChunk { key, body } => with_body(
                format!(
                    "CHUNK PUTCHUNK {} {} {}",
                    key.file_id, key.chunk_no, key.copy_index
                ),
                body,
            ),
            Request::GetChunk { key } => header(format!(
                "CHUNK GETCHUNK {} {} {}",
                key.file_id, key.chunk_no, key.copy_index
            )),
            Request::Delete { file_id, chunk_no } => {
                header(format!("CHUNK DELETE {file_id} {chunk_no}"))
            }
        }
    }

    /// Parse wire bytes into a request.
    pub fn parse(raw: &[u8]) -> Result<Self, NetError> {
        if raw.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::TooLarge {
                len: raw.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let (tokens, body) = split_message(raw)?;
        let toks: Vec<&str> = tokens;

        match (toks.first().copied(), toks.get(1).copied()) {
            (Some("RING"), Some("FINDSUCCESSOR")) => {
                expect_no_body(&body)?;
                let id = parse_u64(toks.get(2))?;
                Ok(Request::FindSuccessor { id: RingId(id) })
            }
            (Some("RING"), Some("NOTIFY")) => {
                expect_no_body(&body)?;
                let addr = parse_addr(toks.get(2), toks.get(3))?;
                Ok(Request::Notify { addr })
            }
            (Some("RING"), Some("GETPREDECESSOR")) => {
                expect_no_body(&body)?;
                Ok(Request::GetPredecessor)
            }
            (Some("RING"), Some("DELEGATE")) => Ok(Request::Delegate {
                key: parse_key(&toks)?,
                body: require_body(body)?,
            }),
            (Some("CHUNK"), Some("PUTCHUNK")) => Ok(Request::PutChunk {
                key: parse_key(&toks)?,
                body: require_body(body)?,
            }),
            (Some("CHUNK"), Some("GETCHUNK")) => {
                expect_no_body(&body)?;
                Ok(Request::GetChunk {
                    key: parse_key(&toks)?,
                })
            }
            (Some("CHUNK"), Some("DELETE")) => {
                expect_no_body(&body)?;
                let file_id = parse_file_id(toks.get(2))?;
                let chunk_no = parse_u32(toks.get(3))?;
                Ok(Request::Delete { file_id, chunk_no })
            }
            _ => Err(NetError::Malformed(format!(
                "unknown request header: {:?}",
                toks.join(" ")
            ))),
        }
    }
}

impl Response {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::Node { addr } => header(format!("RING NODE {} {}", addr.ip(), addr.port())),
            Response::NoPredecessor => header("RING NODE NULL".to_string()),
            Response::Success => header("SUCCESS".to_string()),
            Response::Error => header("ERROR".to_string()),
            Response::Chunk {
                file_id,
                chunk_no,
                body,
            } => with_body(format!("CHUNK CHUNK {file_id} {chunk_no}"), body),
        }
    }

    /// Parse wire bytes into a response.
    pub fn parse(raw: &[u8]) -> Result<Self, NetError> {
        if raw.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::TooLarge {
                len: raw.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let (toks, body) = split_message(raw)?;

        match (toks.first().copied(), toks.get(1).copied()) {
            (Some("SUCCESS"), None) => Ok(Response::Success),
            (Some("ERROR"), None) => Ok(Response::Error),
            (Some("RING"), Some("NODE")) => {
                expect_no_body(&body)?;
                if toks.get(2).copied() == Some("NULL") {
                    Ok(Response::NoPredecessor)
                } else {
                    let addr = parse_addr(toks.get(2), toks.get(3))?;
                    Ok(Response::Node { addr })
                }
            }
            (Some("CHUNK"), Some("CHUNK")) => {
                let file_id = parse_file_id(toks.get(2))?;
                let chunk_no = parse_u32(toks.get(3))?;
                Ok(Response::Chunk {
                    file_id,
                    chunk_no,
                    body: require_body(body)?,
                })
            }
            _ => Err(NetError::Malformed(format!(
                "unknown response header: {:?}",
                toks.join(" ")
            ))),
        }
    }
}

fn header(line: String) -> Vec<u8> {
    line.into_bytes()
}

fn with_body(line: String, body: &Bytes) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + BODY_DELIMITER.len() + body.len());
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(BODY_DELIMITER);
    out.extend_from_slice(body);
    out
}

/// Split a raw message at the first body delimiter; tokenize the header.
fn split_message(raw: &[u8]) -> Result<(Vec<&str>, Option<Bytes>), NetError> {
    let (head, body) = match find_delimiter(raw) {
        Some(pos) => (
            &raw[..pos],
            Some(Bytes::copy_from_slice(&raw[pos + BODY_DELIMITER.len()..])),
        ),
        None => (raw, None),
    };
    let head = std::str::from_utf8(head)
        .map_err(|_| NetError::Malformed("header is not valid UTF-8".to_string()))?;
    Ok((head.split_whitespace().collect(), body))
}

fn find_delimiter(raw: &[u8]) -> Option<usize> {
    raw.windows(BODY_DELIMITER.len())
        .position(|w| w == BODY_DELIMITER)
}

fn expect_no_body(body: &Option<Bytes>) -> Result<(), NetError> {
    if body.is_some() {
        return Err(NetError::Malformed("unexpected body".to_string()));
    }
    Ok(())
}

fn require_body(body: Option<Bytes>) -> Result<Bytes, NetError> {
    body.ok_or_else(|| NetError::Malformed("missing body".to_string()))
}

fn parse_key(toks: &[&str]) -> Result<ChunkKey, NetError> {
    Ok(ChunkKey::new(
        parse_file_id(toks.get(2))?,
        parse_u32(toks.get(3))?,
        parse_u32(toks.get(4))?,
    ))
}

fn parse_file_id(tok: Option<&&str>) -> Result<FileId, NetError> {
    tok.and_then(|t| FileId::parse(t))
        .ok_or_else(|| NetError::Malformed("bad file id".to_string()))
}

fn parse_u32(tok: Option<&&str>) -> Result<u32, NetError> {
    tok.and_then(|t| t.parse().ok())
        .ok_or_else(|| NetError::Malformed("bad integer token".to_string()))
}

fn parse_u64(tok: Option<&&str>) -> Result<u64, NetError> {
    tok.and_then(|t| t.parse().ok())
        .ok_or_else(|| NetError::Malformed("bad integer token".to_string()))
}

fn parse_addr(ip: Option<&&str>, port: Option<&&str>) -> Result<SocketAddr, NetError> {
    let ip: IpAddr = ip
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| NetError::Malformed("bad ip token".to_string()))?;
    let port: u16 = port
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| NetError::Malformed("bad port token".to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(copy: u32) -> ChunkKey {
        ChunkKey::new(FileId::parse("deadbeef").unwrap(), 4, copy)
    }

    #[test]
    fn test_find_successor_roundtrip() {
        let req = Request::FindSuccessor { id: RingId(123456) };
        let raw = req.encode();
        assert_eq!(raw, b"RING FINDSUCCESSOR 123456");
        assert_eq!(Request::parse(&raw).unwrap(), req);
    }

    #[test]
    fn test_notify_roundtrip() {
        let req = Request::Notify {
            addr: "10.0.0.2:4100".parse().unwrap(),
        };
        let raw = req.encode();
        assert_eq!(raw, b"RING NOTIFY 10.0.0.2 4100");
        assert_eq!(Request::parse(&raw).unwrap(), req);
    }

    #[test]
    fn test_get_predecessor_roundtrip() {
        let raw = Request::GetPredecessor.encode();
        assert_eq!(raw, b"RING GETPREDECESSOR");
        assert_eq!(Request::parse(&raw).unwrap(), Request::GetPredecessor);
    }

    #[test]
    fn test_putchunk_carries_body() {
        let req = Request::PutChunk {
            key: key(1),
            body: Bytes::from_static(b"chunk bytes"),
        };
        let raw = req.encode();
        assert!(raw.starts_with(b"CHUNK PUTCHUNK deadbeef 4 1\r\n\r\n"));
        assert_eq!(Request::parse(&raw).unwrap(), req);
    }

    #[test]
    fn test_body_may_contain_delimiter_bytes() {
        // Only the first delimiter splits; binary bodies may embed it.
        let body = Bytes::from_static(b"ab\r\n\r\ncd");
        let req = Request::Delegate {
            key: key(0),
            body: body.clone(),
        };
        let parsed = Request::parse(&req.encode()).unwrap();
        match parsed {
            Request::Delegate { body: b, .. } => assert_eq!(b, body),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_putchunk_without_body_rejected() {
        let raw = b"CHUNK PUTCHUNK deadbeef 4 1";
        assert!(matches!(
            Request::parse(raw),
            Err(NetError::Malformed(_))
        ));
    }

    #[test]
    fn test_getchunk_roundtrip() {
        let req = Request::GetChunk { key: key(2) };
        let raw = req.encode();
        assert_eq!(raw, b"CHUNK GETCHUNK deadbeef 4 2");
        assert_eq!(Request::parse(&raw).unwrap(), req);
    }

    #[test]
    fn test_delete_roundtrip() {
        let req = Request::Delete {
            file_id: FileId::parse("deadbeef").unwrap(),
            chunk_no: 9,
        };
        let raw = req.encode();
        assert_eq!(raw, b"CHUNK DELETE deadbeef 9");
        assert_eq!(Request::parse(&raw).unwrap(), req);
    }

    #[test]
    fn test_unknown_verb_rejected() {
        assert!(Request::parse(b"RING EXPLODE 1").is_err());
        assert!(Request::parse(b"PROTOCOL PUTCHUNK a 1 0").is_err());
        assert!(Request::parse(b"").is_err());
    }

    #[test]
    fn test_non_utf8_header_rejected() {
        let raw = [0xff, 0xfe, b' ', b'x'];
        assert!(matches!(
            Request::parse(&raw),
            Err(NetError::Malformed(_))
        ));
    }

    #[test]
    fn test_response_success_error() {
        assert_eq!(Response::parse(b"SUCCESS").unwrap(), Response::Success);
        assert_eq!(Response::parse(b"ERROR").unwrap(), Response::Error);
        assert_eq!(Response::Success.encode(), b"SUCCESS");
        assert_eq!(Response::Error.encode(), b"ERROR");
    }

    #[test]
    fn test_response_node_roundtrip() {
        let resp = Response::Node {
            addr: "192.168.1.7:4200".parse().unwrap(),
        };
        let raw = resp.encode();
        assert_eq!(raw, b"RING NODE 192.168.1.7 4200");
        assert_eq!(Response::parse(&raw).unwrap(), resp);
    }

    #[test]
    fn test_response_null_predecessor() {
        let raw = Response::NoPredecessor.encode();
        assert_eq!(raw, b"RING NODE NULL");
        assert_eq!(Response::parse(&raw).unwrap(), Response::NoPredecessor);
    }

    #[test]
    fn test_response_chunk_roundtrip() {
        let resp = Response::Chunk {
            file_id: FileId::parse("deadbeef").unwrap(),
            chunk_no: 4,
            body: Bytes::from_static(b"payload"),
        };
        let raw = resp.encode();
        assert!(raw.starts_with(b"CHUNK CHUNK deadbeef 4\r\n\r\n"));
        assert_eq!(Response::parse(&raw).unwrap(), resp);
    }

    #[test]
    fn test_response_chunk_empty_body_allowed() {
        let resp = Response::Chunk {
            file_id: FileId::parse("deadbeef").unwrap(),
            chunk_no: 4,
            body: Bytes::new(),
        };
        let parsed = Response::parse(&resp.encode()).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut raw = b"CHUNK PUTCHUNK deadbeef 4 1\r\n\r\n".to_vec();
        raw.resize(MAX_MESSAGE_SIZE + 1, 0u8);
        assert!(matches!(
            Request::parse(&raw),
            Err(NetError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_ipv6_notify_roundtrip() {
        let req = Request::Notify {
            addr: "[::1]:4100".parse().unwrap(),
        };
        assert_eq!(Request::parse(&req.encode()).unwrap(), req);
    }
}
