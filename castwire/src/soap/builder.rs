//! SOAP action request construction.
//!
//! Requests are assembled by string, not through an XML tree emitter, because
//! argument values may arrive pre-escaped (DIDL-Lite metadata travels as an
//! escaped document inside `CurrentURIMetaData`). [`escape_xml`] is
//! idempotent, so already-escaped values pass through unchanged while raw
//! ones get escaped exactly once.

use crate::escape::escape_xml;

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Build a SOAP 1.1 action request envelope.
///
/// `service_type` is the full URN, e.g.
/// `urn:schemas-upnp-org:service:AVTransport:1`. Arguments are emitted in
/// the order given; some renderers reject reordered arguments.
pub fn build_soap_request(service_type: &str, action: &str, args: &[(&str, &str)]) -> String {
    let mut body = String::with_capacity(512);
    body.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    body.push_str(&format!(
        r#"<s:Envelope xmlns:s="{SOAP_NS}" s:encodingStyle="{SOAP_ENCODING}">"#
    ));
    body.push_str("<s:Body>");
    body.push_str(&format!(r#"<u:{action} xmlns:u="{service_type}">"#));
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", escape_xml(value)));
    }
    body.push_str(&format!("</u:{action}>"));
    body.push_str("</s:Body></s:Envelope>");
    body
}

/// The `SOAPACTION` header value for an action, quotes included.
pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

    #[test]
    fn builds_action_with_arguments() {
        let xml = build_soap_request(
            AVT,
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", "http://192.168.1.10:9740/t/song.mp3"),
                ("CurrentURIMetaData", ""),
            ],
        );

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
        assert!(xml.contains(r#"<u:SetAVTransportURI xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">"#));
        assert!(xml.contains("<InstanceID>0</InstanceID>"));
        assert!(xml.contains("<CurrentURIMetaData></CurrentURIMetaData>"));
        assert!(xml.ends_with("</s:Body></s:Envelope>"));
    }

    #[test]
    fn escapes_raw_values_once() {
        let xml = build_soap_request(AVT, "Seek", &[("Target", "a&b")]);
        assert!(xml.contains("<Target>a&amp;b</Target>"));
    }

    #[test]
    fn pre_escaped_metadata_is_not_double_escaped() {
        let metadata = "&lt;DIDL-Lite&gt;&lt;item&gt;Tom &amp; Jerry&lt;/item&gt;&lt;/DIDL-Lite&gt;";
        let xml = build_soap_request(AVT, "SetAVTransportURI", &[("CurrentURIMetaData", metadata)]);
        assert!(xml.contains(metadata));
        assert!(!xml.contains("&amp;lt;"));
        assert!(!xml.contains("&amp;amp;"));
    }

    #[test]
    fn soapaction_header_is_quoted() {
        assert_eq!(
            soap_action_header(AVT, "Play"),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Play\""
        );
    }
}
