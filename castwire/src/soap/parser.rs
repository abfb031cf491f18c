//! SOAP response parsing.
//!
//! Parsing is namespace-prefix tolerant: devices use `s:`, `SOAP-ENV:` or no
//! prefix at all for the envelope, so elements are matched by local-name
//! suffix rather than qualified name.

use std::io::BufReader;

use xmltree::Element;

use super::{SoapBody, SoapEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("document root is not a SOAP Envelope")]
    MissingEnvelope,

    #[error("SOAP Envelope has no Body")]
    MissingBody,
}

/// Parse a SOAP 1.1 response document.
pub fn parse_soap_envelope(xml: &str) -> Result<SoapEnvelope, SoapParseError> {
    let reader = BufReader::new(xml.as_bytes());
    let root = Element::parse(reader)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    let body = find_child_with_suffix(&root, "Body").ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        body: SoapBody {
            content: body.clone(),
        },
    })
}

/// First direct child whose local name ends with `suffix`.
pub(crate) fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent
        .children
        .iter()
        .find_map(|n| n.as_element().filter(|e| e.name.ends_with(suffix)))
}

/// Text content of a direct child element, by exact local name.
pub(crate) fn extract_child_text(parent: &Element, name: &str) -> Option<String> {
    parent
        .children
        .iter()
        .find_map(|n| n.as_element().filter(|e| e.name == name))
        .and_then(|e| e.get_text())
        .map(|t| t.into_owned())
}
