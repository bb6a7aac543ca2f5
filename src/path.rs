//! Object path codec for sinks and sessions.
//!
//! Sinks live under [`SINK_PREFIX`] keyed by their escaped label, sessions
//! under [`SESSION_PREFIX`] keyed by their escaped decimal id. Paths are never
//! stored, they are recomputed from the identifier whenever needed.

use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::error::Result;
use crate::session::SessionId;

/// Collection root under which every sink and session is enumerated.
pub const ROOT_PATH: &str = "/org/freedesktop/miracle/wfd";
/// Fallback subtree for sink objects.
pub const SINK_PREFIX: &str = "/org/freedesktop/miracle/wfd/sink";
/// Fallback subtree for session objects.
pub const SESSION_PREFIX: &str = "/org/freedesktop/miracle/wfd/session";
/// Subtree of the wifi daemon's peer objects, referenced by the sink `Peer` property.
pub const PEER_PREFIX: &str = "/org/freedesktop/miracle/wifi/peer";

/// Well-known bus name claimed by the service.
pub const SERVICE_NAME: &str = "org.freedesktop.miracle.wfd";
pub const SINK_INTERFACE: &str = "org.freedesktop.miracle.wfd.Sink";
pub const SESSION_INTERFACE: &str = "org.freedesktop.miracle.wfd.Session";

/// Returns the `/` sentinel used when an object reference is unset.
pub fn none_path() -> OwnedObjectPath {
    ObjectPath::from_static_str_unchecked("/").into()
}

/// Escapes an arbitrary label into a single valid path element.
///
/// Every byte outside `[A-Za-z0-9]` becomes `_` followed by two lowercase hex
/// digits, and so does a leading digit. The empty label is written as a lone
/// `_`.
pub fn escape_label(label: &str) -> String {
    if label.is_empty() {
        return "_".to_string();
    }

    let mut escaped = String::with_capacity(label.len() * 3);
    for (i, byte) in label.bytes().enumerate() {
        if byte.is_ascii_alphabetic() || (i > 0 && byte.is_ascii_digit()) {
            escaped.push(byte as char);
        } else {
            escaped.push('_');
            escaped.push(hex_digit(byte >> 4));
            escaped.push(hex_digit(byte & 0xf));
        }
    }
    escaped
}

/// Reverses [`escape_label`]. Returns `None` if the result is not UTF-8.
pub fn unescape_label(element: &str) -> Option<String> {
    if element == "_" {
        return Some(String::new());
    }

    let bytes = element.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(out).ok()
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|value| value as u8)
}

/// Appends the escaped `id` under `prefix`.
pub fn encode(prefix: &str, id: &str) -> Result<OwnedObjectPath> {
    let path = format!("{prefix}/{}", escape_label(id));
    Ok(OwnedObjectPath::try_from(path)?)
}

/// Strips `prefix` from `path` and unescapes the remaining element.
///
/// `None` means the path does not belong to this subtree, so the caller can
/// try the next prefix. Elements [`encode`] would not have produced, such as
/// a bare leading digit, do not belong to it either.
pub fn decode(path: &str, prefix: &str) -> Option<String> {
    let element = path.strip_prefix(prefix)?.strip_prefix('/')?;
    if element.is_empty() || element.contains('/') {
        return None;
    }
    unescape_label(element).filter(|label| escape_label(label) == element)
}

pub fn sink_path(label: &str) -> Result<OwnedObjectPath> {
    encode(SINK_PREFIX, label)
}

pub fn session_path(id: SessionId) -> Result<OwnedObjectPath> {
    encode(SESSION_PREFIX, &id.to_string())
}

/// Path of the wifi peer object a sink was discovered from.
pub fn peer_path(label: &str) -> Result<OwnedObjectPath> {
    encode(PEER_PREFIX, label)
}

/// Decodes a sink path back into its label.
pub fn decode_sink(path: &str) -> Option<String> {
    decode(path, SINK_PREFIX)
}

/// Decodes a session path into its element.
///
/// The outer `Option` reports whether the path lies in the session subtree;
/// the inner one whether the element is a valid id.
pub fn decode_session(path: &str) -> Option<Option<SessionId>> {
    decode(path, SESSION_PREFIX).map(|element| element.parse().ok())
}
