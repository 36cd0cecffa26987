// src/uri_prefix.rs

/// URI identifier codes understood by this service (NFC Forum RTD URI, first entries).
/// The index is the code byte.
pub const URI_PREFIXES: [&str; 7] = [
    "",             // 0x00 - no prepending
    "http://www.",  // 0x01
    "https://www.", // 0x02
    "http://",      // 0x03
    "https://",     // 0x04
    "tel:",         // 0x05
    "mailto:",      // 0x06
];

/// Unknown codes map to the empty prefix.
pub fn prefix_for_code(code: u8) -> &'static str {
    URI_PREFIXES.get(code as usize).copied().unwrap_or("")
}

/// Inverse of [`prefix_for_code`]: picks the longest matching prefix and
/// returns its code with the rest of the URI. Falls back to code 0x00.
pub fn split_uri(url: &str) -> (u8, &str) {
    URI_PREFIXES
        .iter()
        .enumerate()
        .filter(|(_, prefix)| url.starts_with(*prefix))
        .max_by_key(|(_, prefix)| prefix.len())
        .map(|(code, prefix)| (code as u8, &url[prefix.len()..]))
        .unwrap_or((0x00, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(prefix_for_code(0x00), "");
        assert_eq!(prefix_for_code(0x01), "http://www.");
        assert_eq!(prefix_for_code(0x04), "https://");
        assert_eq!(prefix_for_code(0x06), "mailto:");
    }

    #[test]
    fn every_byte_has_a_prefix() {
        for code in 0..=u8::MAX {
            let prefix = prefix_for_code(code);
            if code > 0x06 {
                assert_eq!(prefix, "", "code {code:#04x}");
            }
        }
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(split_uri("https://www.example.com"), (0x02, "example.com"));
        assert_eq!(split_uri("https://example.com"), (0x04, "example.com"));
        assert_eq!(split_uri("http://www.a.b"), (0x01, "a.b"));
        assert_eq!(split_uri("http://a.b"), (0x03, "a.b"));
        assert_eq!(split_uri("tel:+15551234"), (0x05, "+15551234"));
    }

    #[test]
    fn unknown_scheme_keeps_full_string() {
        assert_eq!(split_uri("ftp://files.example"), (0x00, "ftp://files.example"));
        assert_eq!(split_uri("valet"), (0x00, "valet"));
    }
}
