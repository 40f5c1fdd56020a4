//! Placeholder torrent container codec
//!
//! Radarr/Sonarr only move .torrent files around, so the download URL of a
//! DDL release is smuggled through the pipeline inside a minimal bencoded
//! torrent: the `comment` field carries the URL, `url-list` duplicates it
//! for consumers that read either, and the `info` dictionary holds just
//! enough filler (a fake length, a single digest) to satisfy generic
//! torrent parsers.
//!
//! Bencode rules: byte strings are `<byte-length>:<raw-bytes>`, integers are
//! `i<value>e`, dictionaries are `d<pairs>e` with keys in lexicographic
//! order. The decoder is a tolerant field scanner, not a full parser: it
//! must recover URLs from containers this encoder never produced, as long
//! as a recognizable `comment` or `url-list` field exists.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Fake payload length advertised in the `info` dictionary. Equal to the
/// fake piece length so the container describes exactly one piece.
const FAKE_LENGTH: i64 = 16384;

const ANNOUNCE: &str = "udp://tracker.invalid:6969/announce";

/// What a placeholder decodes back into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    /// The carried download URL.
    pub url: String,
    /// Display name, when an `info.name` field exists.
    pub name: Option<String>,
    /// Original size hint, when an `info.length` field exists.
    pub length: Option<i64>,
}

fn bstr(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s);
}

fn bint(out: &mut Vec<u8>, value: i64) {
    out.push(b'i');
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'e');
}

/// Deterministic 20-byte digest standing in for the piece hash.
///
/// Torrent parsers only require the field to be present and well-sized; the
/// value just has to be stable for identical (name, url) inputs.
fn fake_pieces(name: &str, url: &str) -> [u8; 20] {
    let digest = Sha256::digest(format!("{}{}", name, url).as_bytes());
    let mut pieces = [0u8; 20];
    pieces.copy_from_slice(&digest[..20]);
    pieces
}

/// Encode a placeholder container for a (name, url) pair.
///
/// `size` only feeds the `info.length` hint when present and positive; the
/// piece structure stays fake either way.
pub fn encode(name: &str, url: &str, size: Option<i64>) -> Vec<u8> {
    let length = size.filter(|&s| s > 0).unwrap_or(FAKE_LENGTH);
    let mut out = Vec::with_capacity(256 + name.len() + 2 * url.len());

    // Top-level dictionary, keys in lexicographic order:
    // announce, comment, created by, creation date, info, url-list.
    out.push(b'd');

    bstr(&mut out, b"announce");
    bstr(&mut out, ANNOUNCE.as_bytes());

    bstr(&mut out, b"comment");
    bstr(&mut out, url.as_bytes());

    bstr(&mut out, b"created by");
    bstr(&mut out, concat!("ddlarr/", env!("CARGO_PKG_VERSION")).as_bytes());

    bstr(&mut out, b"creation date");
    bint(&mut out, Utc::now().timestamp());

    bstr(&mut out, b"info");
    {
        // info keys: length, name, piece length, pieces.
        out.push(b'd');
        bstr(&mut out, b"length");
        bint(&mut out, length);
        bstr(&mut out, b"name");
        bstr(&mut out, name.as_bytes());
        bstr(&mut out, b"piece length");
        bint(&mut out, FAKE_LENGTH);
        bstr(&mut out, b"pieces");
        bstr(&mut out, &fake_pieces(name, url));
        out.push(b'e');
    }

    bstr(&mut out, b"url-list");
    bstr(&mut out, url.as_bytes());

    out.push(b'e');
    out
}

/// Find `needle` in `haystack`, returning the offset just past it.
fn find_after(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + needle.len())
}

/// Parse a length-prefixed byte string at `pos`.
fn read_bstr(data: &[u8], pos: usize) -> Option<&[u8]> {
    let colon = data[pos..].iter().position(|&b| b == b':')? + pos;
    let len: usize = std::str::from_utf8(&data[pos..colon]).ok()?.parse().ok()?;
    let start = colon + 1;
    data.get(start..start + len)
}

/// Parse an `i<digits>e` integer at `pos`.
fn read_bint(data: &[u8], pos: usize) -> Option<i64> {
    if data.get(pos) != Some(&b'i') {
        return None;
    }
    let end = data[pos..].iter().position(|&b| b == b'e')? + pos;
    std::str::from_utf8(&data[pos + 1..end]).ok()?.parse().ok()
}

/// Read the value of a length-prefixed field, e.g. `7:comment`.
fn field_bytes<'a>(data: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let marker = format!("{}:{}", key.len(), key);
    let pos = find_after(data, marker.as_bytes())?;
    read_bstr(data, pos)
}

/// Decode a placeholder container.
///
/// The scan operates on raw bytes so the declared byte lengths stay exact;
/// only after slicing is the content interpreted as UTF-8, which keeps
/// multi-byte names intact. Returns `None` when neither a `comment` nor a
/// `url-list` field is present.
pub fn decode(data: &[u8]) -> Option<DecodedPayload> {
    let url_bytes = field_bytes(data, "comment")
        .filter(|b| !b.is_empty())
        .or_else(|| field_bytes(data, "url-list").filter(|b| !b.is_empty()))?;
    let url = String::from_utf8(url_bytes.to_vec()).ok()?;

    // Name and length live inside the info dictionary; scan from its marker
    // so a top-level "name" in some foreign container doesn't shadow it.
    let info_start = find_after(data, b"4:info").unwrap_or(0);
    let info = &data[info_start..];

    let name = field_bytes(info, "name")
        .and_then(|b| String::from_utf8(b.to_vec()).ok())
        .filter(|s| !s.is_empty());

    let length = find_after(info, b"6:length").and_then(|pos| read_bint(info, pos));

    Some(DecodedPayload { url, name, length })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_round_trip() {
        let data = encode("Movie.Title.mkv", "https://host.example/file", None);
        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.url, "https://host.example/file");
        assert_eq!(decoded.name.as_deref(), Some("Movie.Title.mkv"));
        assert_eq!(decoded.length, Some(FAKE_LENGTH));
    }

    #[test]
    fn test_round_trip_non_ascii_name() {
        let data = encode("Amélie.Poulain.mkv", "https://host.example/film", None);
        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("Amélie.Poulain.mkv"));
        assert_eq!(decoded.url, "https://host.example/film");
    }

    #[test]
    fn test_round_trip_url_with_query_and_encoding() {
        let url = "https://dl-protect.link/abc?fn=Mo%20vie.mkv&rl=a2";
        let data = encode("x", url, None);
        assert_eq!(decode(&data).unwrap().url, url);
    }

    #[test]
    fn test_size_hint_carried() {
        let data = encode("a.mkv", "https://h/f", Some(1_234_567));
        assert_eq!(decode(&data).unwrap().length, Some(1_234_567));

        // Zero and negative sizes fall back to the fake length.
        let data = encode("a.mkv", "https://h/f", Some(0));
        assert_eq!(decode(&data).unwrap().length, Some(FAKE_LENGTH));
    }

    #[test]
    fn test_keys_are_sorted() {
        let data = encode("n", "https://u", None);
        let text: Vec<u8> = data.clone();
        let pos = |needle: &str| {
            find_after(&text, needle.as_bytes()).expect(needle)
        };
        assert!(pos("8:announce") < pos("7:comment"));
        assert!(pos("7:comment") < pos("10:created by"));
        assert!(pos("10:created by") < pos("13:creation date"));
        assert!(pos("13:creation date") < pos("4:info"));
        assert!(pos("4:info") < pos("8:url-list"));
        // info keys
        assert!(pos("6:length") < pos("4:name"));
        assert!(pos("4:name") < pos("12:piece length"));
        assert!(pos("12:piece length") < pos("6:pieces"));
    }

    #[test]
    fn test_decode_foreign_container_with_url_list_only() {
        // Hand-built container with no comment field.
        let mut data = Vec::new();
        data.push(b'd');
        bstr(&mut data, b"url-list");
        bstr(&mut data, b"https://mirror.example/file.bin");
        data.push(b'e');

        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.url, "https://mirror.example/file.bin");
        assert_eq!(decoded.name, None);
        assert_eq!(decoded.length, None);
    }

    #[test]
    fn test_decode_without_url_fields_is_none() {
        let mut data = Vec::new();
        data.push(b'd');
        bstr(&mut data, b"announce");
        bstr(&mut data, b"udp://tracker.example/announce");
        data.push(b'e');
        assert!(decode(&data).is_none());

        assert!(decode(b"garbage").is_none());
        assert!(decode(b"").is_none());
    }

    #[test]
    fn test_pieces_digest_is_deterministic() {
        // creation date differs between calls; everything else must not.
        let a = encode("n.mkv", "https://u/f", None);
        let b = encode("n.mkv", "https://u/f", None);
        let pieces = |data: &[u8]| {
            let pos = find_after(data, b"6:pieces").unwrap();
            read_bstr(data, pos).unwrap().to_vec()
        };
        assert_eq!(pieces(&a), pieces(&b));
        assert_eq!(pieces(&a).len(), 20);
    }

    #[test]
    fn test_decode_truncated_length_prefix_is_safe() {
        // A comment marker whose declared length overruns the buffer must
        // not panic and must not return a short read.
        let data = b"d7:comment99:https://short";
        assert!(decode(data).is_none());
    }
}
