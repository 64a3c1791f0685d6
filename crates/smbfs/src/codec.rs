//! Percent-encoding at the path/URI boundary.
//!
//! Components are encoded with the standard form encoder, except that a
//! space becomes `%20` and `! ' ( ) ~ *` stay literal. In-memory path
//! components are always decoded.

use crate::error::{Result, SmbFsError};

/// Escapes the encoder produces that are rendered literally again.
const LITERAL_AFTER_ENCODING: [(&str, &str); 5] = [
    ("%21", "!"),
    ("%27", "'"),
    ("%28", "("),
    ("%29", ")"),
    ("%2A", "*"),
];

/// Percent-encodes one path component for use in an address.
pub fn encode_component(component: &str) -> String {
    let mut encoded = urlencoding::encode(component).into_owned();
    for (escape, literal) in LITERAL_AFTER_ENCODING {
        if encoded.contains(escape) {
            encoded = encoded.replace(escape, literal);
        }
    }
    encoded
}

/// Plain percent-decoding; `+` stays literal. Used for URI paths.
pub fn decode_uri_component(component: &str) -> Result<String> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| SmbFsError::invalid(format!("invalid escape in '{}': {}", component, e)))
}

/// Form decoding; `+` means space. Used when reconstructing UNC names.
pub fn decode_form_component(component: &str) -> Result<String> {
    decode_uri_component(&component.replace('+', " "))
}

/// Encodes every `/`-separated segment of `path`, keeping separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// `\\host\share\dir\file` to `smb://host/share/dir/file`.
pub fn unc_to_uri(unc: &str) -> String {
    format!("smb:{}", encode_path(&unc.replace('\\', "/")))
}

/// `smb://host/share/dir/file` to `\\host\share\dir\file`.
pub fn uri_to_unc(uri: &str) -> Result<String> {
    let rest = uri
        .strip_prefix("smb:")
        .ok_or_else(|| SmbFsError::invalid(format!("'{}' is not an SMB address", uri)))?;
    let segments = rest
        .split('/')
        .map(decode_form_component)
        .collect::<Result<Vec<_>>>()?;
    Ok(segments.join("\\"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESERVED: &str = "!'()~ äöüß";
    const RESERVED_WIRE: &str = "!'()~%20%C3%A4%C3%B6%C3%BC%C3%9F";

    #[test]
    fn test_reserved_characters_encode_exactly() {
        assert_eq!(encode_component(RESERVED), RESERVED_WIRE);
    }

    #[test]
    fn test_reserved_characters_roundtrip() {
        let wire = encode_component(RESERVED);
        assert_eq!(decode_uri_component(&wire).unwrap(), RESERVED);
    }

    #[test]
    fn test_fully_escaped_form_decodes_to_literal() {
        let decoded =
            decode_uri_component("%21%27%28%29%7E%20%C3%A4%C3%B6%C3%BC%C3%9F").unwrap();
        assert_eq!(decoded, RESERVED);
    }

    #[test]
    fn test_slash_and_percent_are_escaped_in_component() {
        assert_eq!(encode_component("a/b%c"), "a%2Fb%25c");
        assert_eq!(encode_component("x*y"), "x*y");
    }

    #[test]
    fn test_plus_handling_differs_between_decoders() {
        assert_eq!(decode_uri_component("a+b").unwrap(), "a+b");
        assert_eq!(decode_form_component("a+b").unwrap(), "a b");
        assert_eq!(encode_component("a+b"), "a%2Bb");
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("/a b/c/"), "/a%20b/c/");
        assert_eq!(encode_path("rel"), "rel");
    }

    #[test]
    fn test_unc_to_uri() {
        let uri = unc_to_uri("\\\\host\\share\\path\\sub\\!'()~ äöüß");
        assert_eq!(
            uri,
            "smb://host/share/path/sub/!'()~%20%C3%A4%C3%B6%C3%BC%C3%9F"
        );
    }

    #[test]
    fn test_uri_to_unc() {
        let unc = uri_to_unc("smb://host/share/path/sub/!'()~%20%C3%A4%C3%B6%C3%BC%C3%9F").unwrap();
        assert_eq!(unc, "\\\\host\\share\\path\\sub\\!'()~ äöüß");
    }

    #[test]
    fn test_uri_to_unc_rejects_other_schemes() {
        assert!(uri_to_unc("file:///tmp").is_err());
    }
}
