//! Idempotent XML escaping.
//!
//! UPnP control traffic nests XML inside XML: DIDL-Lite metadata travels as
//! an escaped string inside a SOAP argument. Callers hand us strings that may
//! or may not already be escaped, so a second pass must be a no-op.
//! Otherwise `&amp;` becomes `&amp;amp;` and the renderer shows garbage
//! titles (the classic double-escaping defect).

use std::borrow::Cow;

/// Escape the five XML-unsafe characters, exactly once.
///
/// An `&` that already starts a valid entity reference (`&amp;`, `&lt;`,
/// `&gt;`, `&quot;`, `&apos;`, or a numeric `&#...;` form) is left alone, so
/// `escape_xml(escape_xml(s)) == escape_xml(s)` for every `s`.
pub fn escape_xml(input: &str) -> Cow<'_, str> {
    let needs_work = input
        .char_indices()
        .any(|(i, c)| matches!(c, '<' | '>' | '"' | '\'') || (c == '&' && !is_entity_start(input, i)));

    if !needs_work {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 16);
    for (i, c) in input.char_indices() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '&' if !is_entity_start(input, i) => out.push_str("&amp;"),
            other => out.push(other),
        }
    }

    Cow::Owned(out)
}

/// True when the `&` at byte offset `pos` begins a recognized entity.
fn is_entity_start(input: &str, pos: usize) -> bool {
    let rest = &input[pos..];

    for named in ["&amp;", "&lt;", "&gt;", "&quot;", "&apos;"] {
        if rest.starts_with(named) {
            return true;
        }
    }

    // Numeric character references: &#38; (decimal) or &#x26; (hex).
    let Some(body) = rest.strip_prefix("&#") else {
        return false;
    };
    let (digits, valid): (&str, fn(char) -> bool) = match body.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, |c| c.is_ascii_hexdigit()),
        None => (body, |c| c.is_ascii_digit()),
    };
    let Some(end) = digits.find(';') else {
        return false;
    };
    end > 0 && digits[..end].chars().all(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_unsafe_characters() {
        assert_eq!(escape_xml("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_xml(r#"say "hi""#), "say &quot;hi&quot;");
        assert_eq!(escape_xml("it's"), "it&apos;s");
    }

    #[test]
    fn clean_input_borrows() {
        assert!(matches!(escape_xml("no special chars"), Cow::Borrowed(_)));
    }

    #[test]
    fn escaping_is_idempotent() {
        let samples = [
            "plain",
            "a < b & c",
            "&amp; already escaped",
            "mixed & and &lt; entities",
            "numeric &#38; and &#x26; refs",
            "trailing ampersand &",
            "&#; not a real entity",
            r#"<DIDL-Lite xmlns="urn:didl">"#,
        ];

        for s in samples {
            let once = escape_xml(s).into_owned();
            let twice = escape_xml(&once).into_owned();
            assert_eq!(once, twice, "double escape changed: {s}");
        }
    }

    #[test]
    fn bare_ampersand_before_fake_entity_is_escaped() {
        assert_eq!(escape_xml("&notanentity"), "&amp;notanentity");
        assert_eq!(escape_xml("&#xZZ;"), "&amp;#xZZ;");
    }

    #[test]
    fn hex_digits_are_only_valid_after_the_x_prefix() {
        // &#3a; is not a decimal reference; &#x3a; is a hex one.
        assert_eq!(escape_xml("&#3a;"), "&amp;#3a;");
        assert_eq!(escape_xml("&#x3a;"), "&#x3a;");
        assert_eq!(escape_xml("&#58;"), "&#58;");
    }
}
