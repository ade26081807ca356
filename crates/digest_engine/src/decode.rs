use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// A web response body converted to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub html: String,
    pub encoding: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to decode bytes as {encoding}: {message}")]
    DecodeFailure {
        encoding: &'static str,
        message: String,
    },
}

/// Decode a web page body. Order: byte-order mark, `charset` from the
/// Content-Type header, then detection over the bytes themselves.
///
/// Malformed sequences are an error rather than silently replaced, so the
/// caller can report the source as undecodable.
pub fn decode_page(
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<DecodedPage, DecodeError> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_as(bytes, encoding);
    }

    let declared = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()));
    if let Some(encoding) = declared {
        return decode_as(bytes, encoding);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_as(bytes, detector.guess(None, true))
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(&['"', '\''][..]).to_string())
    })
}

fn decode_as(bytes: &[u8], encoding: &'static Encoding) -> Result<DecodedPage, DecodeError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(DecodeError::DecodeFailure {
            encoding: encoding.name(),
            message: "malformed byte sequence".to_string(),
        });
    }
    Ok(DecodedPage {
        html: text.into_owned(),
        encoding: encoding.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_charset_wins_over_detection() {
        // "café" in Latin-1
        let bytes = b"<p>caf\xe9</p>";
        let page = decode_page(bytes, Some("text/html; Charset=\"ISO-8859-1\"")).unwrap();
        assert_eq!(page.html, "<p>café</p>");
        assert_eq!(page.encoding, "windows-1252");
    }

    #[test]
    fn bom_overrides_header() {
        let bytes = b"\xEF\xBB\xBF<p>ok</p>";
        let page = decode_page(bytes, Some("text/html; charset=iso-8859-1")).unwrap();
        assert_eq!(page.encoding, "UTF-8");
        assert_eq!(page.html, "<p>ok</p>");
    }

    #[test]
    fn invalid_utf8_under_declared_charset_is_rejected() {
        let bytes = b"<p>\xff\xfe\xfd</p>";
        let err = decode_page(bytes, Some("text/html; charset=utf-8")).unwrap_err();
        assert!(matches!(err, DecodeError::DecodeFailure { encoding: "UTF-8", .. }));
    }
}
