//! Parsed SOAP envelope structures.

use std::collections::HashMap;

use xmltree::Element;

/// A parsed SOAP envelope. The body keeps its raw XML tree so callers can
/// pull whatever fields their action cares about.
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    pub body: SoapBody,
}

/// SOAP body, wrapping the `<s:Body>` element.
#[derive(Debug, Clone)]
pub struct SoapBody {
    pub content: Element,
}

impl SoapEnvelope {
    /// The single child of the body: an `ActionResponse` element on success
    /// or a `Fault` element on error.
    pub fn body_element(&self) -> Option<&Element> {
        self.body.content.children.iter().find_map(|n| n.as_element())
    }

    /// True when the body carries a SOAP fault.
    pub fn is_fault(&self) -> bool {
        self.body_element().is_some_and(|e| e.name.ends_with("Fault"))
    }

    /// All direct children of the response element, as name/text pairs.
    ///
    /// Namespace prefixes on field names are stripped. Fields a device left
    /// empty or reported as `NOT_IMPLEMENTED` are still returned; the caller
    /// decides what a usable value is.
    pub fn response_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        let Some(response) = self.body_element() else {
            return fields;
        };
        for child in &response.children {
            if let Some(elem) = child.as_element() {
                let value = elem.get_text().map(|t| t.into_owned()).unwrap_or_default();
                fields.insert(elem.name.clone(), value);
            }
        }
        fields
    }

    /// One response field by name, if present and non-empty.
    pub fn field(&self, name: &str) -> Option<String> {
        let Some(response) = self.body_element() else {
            return None;
        };
        response
            .children
            .iter()
            .find_map(|n| n.as_element().filter(|e| e.name == name))
            .and_then(|e| e.get_text())
            .map(|t| t.into_owned())
            .filter(|t| !t.is_empty())
    }
}
