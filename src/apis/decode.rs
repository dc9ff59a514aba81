//! Payload decoding for delimited downloads: archive sniffing, text encoding
//! fallback and delimiter detection. Everything here is pure.

use crate::error::FetchFailure;
use encoding_rs::{Encoding, UTF_16LE};
use std::io::{Cursor, Read};

pub const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SNIFF_SAMPLE_CHARS: usize = 4096;
const SUSPICIOUSLY_SHORT: usize = 10;

pub fn looks_like_zip(content_type: &str, bytes: &[u8]) -> bool {
    content_type.to_lowercase().contains("zip") || bytes.starts_with(b"PK")
}

/// Extract the first `.csv` entry of a zip archive.
pub fn extract_first_csv(bytes: &[u8]) -> Result<(String, Vec<u8>), FetchFailure> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FetchFailure::Decode(format!("invalid archive: {e}")))?;
    for idx in 0..archive.len() {
        let mut entry = archive
            .by_index(idx)
            .map_err(|e| FetchFailure::Decode(format!("unreadable archive entry: {e}")))?;
        if entry.name().to_lowercase().ends_with(".csv") {
            let name = entry.name().to_string();
            let mut raw = Vec::new();
            entry
                .read_to_end(&mut raw)
                .map_err(|e| FetchFailure::Decode(format!("failed to inflate {name}: {e}")))?;
            return Ok((name, raw));
        }
    }
    Err(FetchFailure::Format("no CSV file inside archive".to_string()))
}

/// UTF-8 with an optional signature.
pub fn decode_utf8_sig(bytes: &[u8]) -> Option<String> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(body).ok().map(str::to_string)
}

/// UTF-16 honoring a byte-order mark, little endian without one.
pub fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (encoding, bom_len): (&'static Encoding, usize) = match Encoding::for_bom(bytes) {
        Some((enc, len)) if enc != encoding_rs::UTF_8 => (enc, len),
        _ => (UTF_16LE, 0),
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .map(|text| text.into_owned())
}

/// UTF-8-with-signature first, UTF-16 second.
pub fn decode_text(bytes: &[u8]) -> Result<String, FetchFailure> {
    decode_utf8_sig(bytes)
        .or_else(|| decode_utf16(bytes))
        .ok_or_else(|| FetchFailure::Decode("neither UTF-8 nor UTF-16".to_string()))
}

/// Decode a body that was not recognised as an archive. A very short or
/// archive-looking UTF-8 result means the server mislabeled the payload, so
/// UTF-16 is attempted instead.
pub fn decode_plain_body(bytes: &[u8]) -> Result<String, FetchFailure> {
    match decode_utf8_sig(bytes) {
        Some(text) if text.chars().count() >= SUSPICIOUSLY_SHORT && !text.contains("PK\u{3}\u{4}") => {
            Ok(text)
        }
        Some(_) => decode_utf16(bytes).ok_or_else(|| {
            FetchFailure::Decode("short or archive-like body is not valid UTF-16".to_string())
        }),
        None => decode_utf16(bytes)
            .ok_or_else(|| FetchFailure::Decode("neither UTF-8 nor UTF-16".to_string())),
    }
}

pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Pick the delimiter among comma, semicolon and tab that splits the sampled
/// lines into the same non-zero number of fields most consistently.
/// Returns `None` when no candidate is plausible.
pub fn sniff_delimiter(text: &str) -> Option<u8> {
    let sample: String = text.chars().take(SNIFF_SAMPLE_CHARS).collect();
    let mut lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).collect();
    // The last sampled line may be truncated.
    if text.chars().count() > SNIFF_SAMPLE_CHARS && lines.len() > 1 {
        lines.pop();
    }
    if lines.is_empty() {
        return None;
    }

    let mut best: Option<(u8, usize, usize)> = None;
    for delim in [b',', b';', b'\t'] {
        let counts: Vec<usize> = lines.iter().map(|l| count_unquoted(l, delim as char)).collect();
        let header = counts[0];
        if header == 0 {
            continue;
        }
        let consistent = counts.iter().filter(|c| **c == header).count();
        let better = match best {
            None => true,
            Some((_, best_consistent, best_count)) => {
                consistent > best_consistent || (consistent == best_consistent && header > best_count)
            }
        };
        if better {
            best = Some((delim, consistent, header));
        }
    }
    best.map(|(delim, _, _)| delim)
}

fn count_unquoted(line: &str, delim: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delim && !in_quotes {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut out = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_utf8_signature_is_stripped() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFYear,Value").unwrap(), "Year,Value");
    }

    #[test]
    fn test_utf16_fallback() {
        let bytes = utf16le_with_bom("Year;Country of asylum\n2020;Chad");
        assert_eq!(decode_text(&bytes).unwrap(), "Year;Country of asylum\n2020;Chad");
    }

    #[test]
    fn test_plain_body_retries_utf16_when_suspiciously_short() {
        // "Year" in UTF-16LE without BOM is valid UTF-8 containing NULs, but short.
        let bytes: Vec<u8> = "Year".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_plain_body(&bytes).unwrap(), "Year");
    }

    #[test]
    fn test_plain_body_accepts_regular_utf8() {
        assert_eq!(decode_plain_body(b"Year,Country,Value\n").unwrap(), "Year,Country,Value\n");
    }

    #[test]
    fn test_zip_detection_by_header_or_magic() {
        assert!(looks_like_zip("application/zip", b"garbage"));
        assert!(looks_like_zip("text/csv", b"PK\x03\x04rest"));
        assert!(!looks_like_zip("text/csv", b"Year,Value"));
    }

    #[test]
    fn test_extract_first_csv_entry() {
        let archive = zip_with(&[
            ("readme.txt", b"ignore me"),
            ("data/population.CSV", b"Year,Value\n2020,1"),
            ("other.csv", b"nope"),
        ]);
        let (name, bytes) = extract_first_csv(&archive).unwrap();
        assert_eq!(name, "data/population.CSV");
        assert_eq!(bytes, b"Year,Value\n2020,1");
    }

    #[test]
    fn test_archive_without_csv_is_format_failure() {
        let archive = zip_with(&[("readme.txt", b"hi")]);
        assert!(matches!(extract_first_csv(&archive), Err(FetchFailure::Format(_))));
        assert!(matches!(extract_first_csv(b"PK not really"), Err(FetchFailure::Decode(_))));
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), Some(b','));
        assert_eq!(sniff_delimiter("a;b;c\n1,5;2;3\n"), Some(b';'));
        assert_eq!(sniff_delimiter("a\tb\n1\t2\n"), Some(b'\t'));
        assert_eq!(sniff_delimiter("\"x,y\";b\n\"1,2\";3\n"), Some(b';'));
        assert_eq!(sniff_delimiter("single column\nrow\n"), None);
    }

    #[test]
    fn test_normalize_newlines() {
        assert_eq!(normalize_newlines("a\r\nb\rc\n"), "a\nb\nc\n");
    }
}
