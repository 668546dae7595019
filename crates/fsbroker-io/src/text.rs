//! Text encoding and line-splitting helpers shared by the operations.

use std::path::Path;

use fsbroker_error::{ErrorCode, OpError};

fn lookup(label: &str, path: &Path) -> Result<&'static encoding_rs::Encoding, OpError> {
    encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
        OpError::new(ErrorCode::EncodingError, format!("Unknown encoding '{label}'"))
            .with_path(path)
    })
}

/// Strictly decodes `bytes` with the named encoding. Malformed sequences
/// are errors, never replacement characters.
pub(crate) fn decode_text(bytes: &[u8], label: &str, path: &Path) -> Result<String, OpError> {
    let encoding = lookup(label, path)?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|cow| cow.into_owned())
        .ok_or_else(|| {
            OpError::new(
                ErrorCode::EncodingError,
                format!("Failed to decode file with encoding '{label}'"),
            )
            .with_path(path)
        })
}

/// Strictly encodes `text` with the named encoding; characters the target
/// encoding cannot represent are errors.
pub(crate) fn encode_text(text: &str, label: &str, path: &Path) -> Result<Vec<u8>, OpError> {
    let encoding = lookup(label, path)?;
    let (bytes, _, had_unmappable) = encoding.encode(text);
    if had_unmappable {
        return Err(OpError::new(
            ErrorCode::EncodingError,
            format!("Failed to encode content with encoding '{label}'"),
        )
        .with_path(path));
    }
    Ok(bytes.into_owned())
}

/// Splits into lines keeping the terminators, the shape READ slices over.
/// `"a\nb"` has two lines; a trailing newline does not add an empty line.
pub(crate) fn split_lines_keep_ends(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Splits into logical lines without terminators (for diffing). Handles
/// both `\n` and `\r\n`; a trailing terminator does not add an empty line.
pub(crate) fn split_logical_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n')
        .map(|line| {
            let line = line.strip_suffix('\n').unwrap_or(line);
            line.strip_suffix('\r').unwrap_or(line)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_ends_round_trips() {
        let text = "line 1\nline 2\nline 3";
        let lines = split_lines_keep_ends(text);
        assert_eq!(lines, vec!["line 1\n", "line 2\n", "line 3"]);
        assert_eq!(lines.concat(), text);
    }

    #[test]
    fn trailing_newline_does_not_add_a_line() {
        assert_eq!(split_lines_keep_ends("a\nb\n").len(), 2);
        assert_eq!(split_logical_lines("a\nb\n"), vec!["a", "b"]);
        assert!(split_logical_lines("").is_empty());
    }

    #[test]
    fn logical_lines_strip_crlf() {
        assert_eq!(split_logical_lines("a\r\nb"), vec!["a", "b"]);
    }

    #[test]
    fn strict_decode_rejects_malformed_utf8() {
        let path = Path::new("/tmp/x");
        assert!(decode_text(&[0xff, 0xfe, 0x41], "utf-8", path).is_err());
        assert_eq!(decode_text(b"ok", "utf-8", path).unwrap(), "ok");
    }

    #[test]
    fn unknown_label_is_an_encoding_error() {
        let err = decode_text(b"x", "not-a-real-encoding", Path::new("/tmp/x")).unwrap_err();
        assert_eq!(err.code, fsbroker_error::ErrorCode::EncodingError);
    }
}
