//! Frame encoding and decoding for the ferry wire protocol.
//!
//! The stream carries three shapes of data:
//!
//! ```text
//! command   : "LIST" | "GET <name>"             (ASCII, no terminator)
//! list      : {"files":[{"name":..,"size":".."}],"count":N}   (JSON, no prefix)
//! header    : [len: u32 BE][JSON: len bytes][zero padding]     (1024 bytes)
//! ```
//!
//! A file body follows its header directly, `size` raw bytes long. Sizes are
//! encoded as decimal strings; decoders also accept bare JSON numbers.

use crate::error::FrameError;
use crate::{HEADER_SIZE, LENGTH_PREFIX_SIZE, MAX_HEADER_PAYLOAD};
use serde::{Deserialize, Serialize};

const CMD_LIST: &str = "LIST";
const CMD_GET: &str = "GET ";

/// One shared file as announced in a list response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Bare file name
    pub name: String,
    /// Size in bytes
    #[serde(with = "size_string")]
    pub size: u64,
}

impl FileEntry {
    /// Create a new entry
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl From<ferry_files::SharedFile> for FileEntry {
    fn from(file: ferry_files::SharedFile) -> Self {
        Self {
            name: file.name,
            size: file.size,
        }
    }
}

/// Directory listing, in scan order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListResponse {
    /// Listed files
    pub files: Vec<FileEntry>,
}

#[derive(Serialize)]
struct ListWire<'a> {
    files: &'a [FileEntry],
    count: usize,
}

impl ListResponse {
    /// Create a listing from entries
    pub fn new(files: Vec<FileEntry>) -> Self {
        Self { files }
    }

    /// Encode as a single JSON document.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Malformed` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        serde_json::to_vec(&ListWire {
            files: &self.files,
            count: self.files.len(),
        })
        .map_err(|e| FrameError::Malformed(e.to_string()))
    }

    /// Decode a buffered list payload.
    ///
    /// # Errors
    ///
    /// - `FrameError::Truncated` if the document has not been fully received
    /// - `FrameError::Malformed` if the bytes can never form a valid listing
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let list: Self = serde_json::from_slice(buf).map_err(|e| {
            if e.is_eof() {
                FrameError::Truncated {
                    expected: buf.len() + 1,
                    actual: buf.len(),
                }
            } else {
                FrameError::Malformed(e.to_string())
            }
        })?;

        if let Some(bad) = list
            .files
            .iter()
            .find(|f| ferry_files::validate_file_name(&f.name).is_err())
        {
            return Err(FrameError::Malformed(format!(
                "listing contains invalid name {:?}",
                bad.name
            )));
        }
        Ok(list)
    }
}

/// Header announcing a file body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// File name
    pub name: String,
    /// Body size in bytes; zero means "not found"
    pub size: u64,
}

impl FileHeader {
    /// Create a new header
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// The zero-size "not found" header for `name`
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }

    /// Encode into a fixed 1024-byte header frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::HeaderTooLarge` if the JSON does not fit.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_header_wire(&HeaderWire {
            name: self.name.clone(),
            size: self.size,
            error: None,
            message: None,
        })
    }
}

/// Why a server refused a GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectCode {
    /// Name is not a bare file name
    UnsafeName,
    /// A transfer is already running on the connection
    Busy,
    /// File exists but could not be read
    Unreadable,
    /// Code not known to this implementation
    Other(String),
}

impl RejectCode {
    /// Wire spelling of the code
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::UnsafeName => "unsafe_name",
            Self::Busy => "busy",
            Self::Unreadable => "unreadable",
            Self::Other(code) => code,
        }
    }

    fn from_wire(code: &str) -> Self {
        match code {
            "unsafe_name" => Self::UnsafeName,
            "busy" => Self::Busy,
            "unreadable" => Self::Unreadable,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A decoded header frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderFrame {
    /// Regular header (size may be zero for "not found")
    File(FileHeader),
    /// Explicit refusal, always carried with size zero
    Rejected {
        /// Name the request was for
        name: String,
        /// Machine-readable reason
        code: RejectCode,
        /// Human-readable reason
        message: String,
    },
}

impl HeaderFrame {
    /// Encode an explicit refusal header frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::HeaderTooLarge` if the JSON does not fit.
    pub fn encode_rejection(
        name: &str,
        code: &RejectCode,
        message: &str,
    ) -> Result<Vec<u8>, FrameError> {
        encode_header_wire(&HeaderWire {
            name: name.to_string(),
            size: 0,
            error: Some(code.as_str().to_string()),
            message: Some(message.to_string()),
        })
    }

    /// Decode the first `HEADER_SIZE` bytes of `buf`.
    ///
    /// # Errors
    ///
    /// - `FrameError::Truncated` if fewer than `HEADER_SIZE` bytes are available
    /// - `FrameError::Malformed` for a bad length prefix or payload
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&buf[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_HEADER_PAYLOAD {
            return Err(FrameError::Malformed(format!(
                "header length prefix {len} exceeds {MAX_HEADER_PAYLOAD}"
            )));
        }

        let payload = &buf[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len];
        let wire: HeaderWire = serde_json::from_slice(payload)
            .map_err(|e| FrameError::Malformed(format!("header payload: {e}")))?;

        Ok(match wire.error {
            Some(code) => Self::Rejected {
                name: wire.name,
                code: RejectCode::from_wire(&code),
                message: wire.message.unwrap_or_default(),
            },
            None => Self::File(FileHeader {
                name: wire.name,
                size: wire.size,
            }),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct HeaderWire {
    name: String,
    #[serde(with = "size_string")]
    size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn encode_header_wire(wire: &HeaderWire) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(wire).map_err(|e| FrameError::Malformed(e.to_string()))?;
    if json.len() > MAX_HEADER_PAYLOAD {
        return Err(FrameError::HeaderTooLarge {
            size: json.len(),
            max: MAX_HEADER_PAYLOAD,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE);
    frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
    frame.extend_from_slice(&json);
    frame.resize(HEADER_SIZE, 0);
    Ok(frame)
}

/// Client-to-server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the directory listing
    List,
    /// Request one file by name
    Get(String),
}

impl Command {
    /// Encode as ASCII command text, without terminator
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::List => CMD_LIST.as_bytes().to_vec(),
            Self::Get(name) => format!("{CMD_GET}{name}").into_bytes(),
        }
    }

    /// Parse one command.
    ///
    /// A single trailing `\n` or `\r\n` is tolerated.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::InvalidCommand` for anything other than `LIST`
    /// or `GET <name>` with a non-empty name.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| FrameError::InvalidCommand("not valid UTF-8".to_string()))?;
        let text = text
            .strip_suffix("\r\n")
            .or_else(|| text.strip_suffix('\n'))
            .unwrap_or(text);

        if text == CMD_LIST {
            return Ok(Self::List);
        }
        match text.strip_prefix(CMD_GET) {
            Some(name) if !name.is_empty() => Ok(Self::Get(name.to_string())),
            _ => Err(FrameError::InvalidCommand(text.chars().take(64).collect())),
        }
    }
}

/// Serde adapter: `u64` written as a decimal string, read from either a
/// string or a number.
mod size_string {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(size: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(size)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid size {text:?}"))),
            Repr::Number(n) => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let frame = FileHeader::new("a.txt", 12).encode().unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let json: serde_json::Value = serde_json::from_slice(&frame[4..4 + len]).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["size"], "12");
        assert!(frame[4 + len..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader::new("b.bin", 2_097_152);
        let frame = header.encode().unwrap();
        assert_eq!(HeaderFrame::decode(&frame).unwrap(), HeaderFrame::File(header));
    }

    #[test]
    fn test_header_decode_ignores_trailing_body_bytes() {
        let mut buf = FileHeader::new("a.txt", 3).encode().unwrap();
        buf.extend_from_slice(b"abc");
        assert_eq!(
            HeaderFrame::decode(&buf).unwrap(),
            HeaderFrame::File(FileHeader::new("a.txt", 3))
        );
    }

    #[test]
    fn test_header_truncated() {
        let frame = FileHeader::new("a.txt", 12).encode().unwrap();
        assert_eq!(
            HeaderFrame::decode(&frame[..1023]),
            Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                actual: 1023
            })
        );
    }

    #[test]
    fn test_header_too_large() {
        let name = "x".repeat(HEADER_SIZE);
        assert!(matches!(
            FileHeader::new(name, 1).encode(),
            Err(FrameError::HeaderTooLarge { max: MAX_HEADER_PAYLOAD, .. })
        ));
    }

    #[test]
    fn test_header_bad_length_prefix() {
        let mut frame = vec![0u8; HEADER_SIZE];
        frame[..4].copy_from_slice(&2000u32.to_be_bytes());
        assert!(matches!(
            HeaderFrame::decode(&frame),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_header_garbage_payload() {
        let mut frame = vec![0u8; HEADER_SIZE];
        frame[..4].copy_from_slice(&5u32.to_be_bytes());
        frame[4..9].copy_from_slice(b"hello");
        assert!(matches!(
            HeaderFrame::decode(&frame),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_header_accepts_numeric_size() {
        let json = br#"{"name":"n","size":42}"#;
        let mut frame = vec![0u8; HEADER_SIZE];
        frame[..4].copy_from_slice(&(json.len() as u32).to_be_bytes());
        frame[4..4 + json.len()].copy_from_slice(json);
        assert_eq!(
            HeaderFrame::decode(&frame).unwrap(),
            HeaderFrame::File(FileHeader::new("n", 42))
        );
    }

    #[test]
    fn test_header_rejects_negative_size() {
        let json = br#"{"name":"n","size":"-1"}"#;
        let mut frame = vec![0u8; HEADER_SIZE];
        frame[..4].copy_from_slice(&(json.len() as u32).to_be_bytes());
        frame[4..4 + json.len()].copy_from_slice(json);
        assert!(matches!(
            HeaderFrame::decode(&frame),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejection_roundtrip() {
        let frame = HeaderFrame::encode_rejection(
            "../../etc/passwd",
            &RejectCode::UnsafeName,
            "unsafe file name",
        )
        .unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);
        assert_eq!(
            HeaderFrame::decode(&frame).unwrap(),
            HeaderFrame::Rejected {
                name: "../../etc/passwd".into(),
                code: RejectCode::UnsafeName,
                message: "unsafe file name".into(),
            }
        );
    }

    #[test]
    fn test_unknown_reject_code_is_preserved() {
        let frame =
            HeaderFrame::encode_rejection("f", &RejectCode::Other("quota".into()), "no").unwrap();
        assert!(matches!(
            HeaderFrame::decode(&frame).unwrap(),
            HeaderFrame::Rejected { code: RejectCode::Other(c), .. } if c == "quota"
        ));
    }

    #[test]
    fn test_list_wire_format() {
        let list = ListResponse::new(vec![FileEntry::new("a.txt", 12)]);
        let json: serde_json::Value = serde_json::from_slice(&list.encode().unwrap()).unwrap();
        assert_eq!(json["files"][0]["name"], "a.txt");
        assert_eq!(json["files"][0]["size"], "12");
        assert_eq!(json["count"], 1);
    }

    #[test]
    fn test_list_roundtrip_preserves_order() {
        let list = ListResponse::new(vec![
            FileEntry::new("z", 1),
            FileEntry::new("a", 2),
            FileEntry::new("m", 0),
        ]);
        assert_eq!(ListResponse::decode(&list.encode().unwrap()).unwrap(), list);
    }

    #[test]
    fn test_list_without_count_key() {
        let list = ListResponse::decode(br#"{"files":[{"name":"a","size":"3"}]}"#).unwrap();
        assert_eq!(list.files, vec![FileEntry::new("a", 3)]);
    }

    #[test]
    fn test_list_partial_is_truncated() {
        let encoded = ListResponse::new(vec![FileEntry::new("a.txt", 12)])
            .encode()
            .unwrap();
        for cut in 0..encoded.len() {
            let err = ListResponse::decode(&encoded[..cut]).unwrap_err();
            assert!(err.is_recoverable(), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn test_list_garbage_is_malformed() {
        assert!(matches!(
            ListResponse::decode(b"<html>"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ListResponse::decode(br#"{"files":[]}x"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_list_rejects_path_names() {
        assert!(matches!(
            ListResponse::decode(br#"{"files":[{"name":"../x","size":"1"}]}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::List.encode(), b"LIST");
        assert_eq!(Command::Get("a.txt".into()).encode(), b"GET a.txt");
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(b"LIST").unwrap(), Command::List);
        assert_eq!(Command::parse(b"LIST\n").unwrap(), Command::List);
        assert_eq!(
            Command::parse(b"GET my file.txt\r\n").unwrap(),
            Command::Get("my file.txt".into())
        );
        assert_eq!(
            Command::parse(b"GET ../../etc/passwd").unwrap(),
            Command::Get("../../etc/passwd".into())
        );
    }

    #[test]
    fn test_command_parse_rejects() {
        for bad in [&b"GET"[..], b"GET ", b"GETa.txt", b"list", b"PUT x", b"", b"\xff\xfe"] {
            assert!(
                matches!(Command::parse(bad), Err(FrameError::InvalidCommand(_))),
                "{bad:?}"
            );
        }
    }
}
