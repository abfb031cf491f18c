//! DIDL-Lite media metadata.
//!
//! The metadata document sent along with `SetAVTransportURI`. Renderers
//! disagree on how much of it they want: some play fine with an empty string,
//! some need a well-formed item, and some TVs only show titles when the DLNA
//! attributes are present. [`DidlVariant`] captures those three levels and
//! the device profile layer picks one per vendor.

use serde::{Deserialize, Serialize};

const DIDL_NS: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
const UPNP_NS: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const DLNA_NS: &str = "urn:schemas-dlna-org:metadata-1-0/";

/// DLNA.ORG_OP=01 (range seek), CI=0, streaming flags.
const DLNA_FEATURES: &str = "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// How rich a DIDL-Lite document a device wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DidlVariant {
    /// Title and resource only.
    Minimal,
    /// Title, upnp:class and a protocolInfo resource.
    Standard,
    /// Standard plus DLNA.ORG flags in protocolInfo.
    DlnaExtended,
}

/// Root of a DIDL-Lite document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "DIDL-Lite")]
pub struct DidlLite {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,

    #[serde(rename = "@xmlns:dc", skip_serializing_if = "Option::is_none")]
    pub xmlns_dc: Option<String>,

    #[serde(rename = "@xmlns:upnp", skip_serializing_if = "Option::is_none")]
    pub xmlns_upnp: Option<String>,

    #[serde(rename = "@xmlns:dlna", skip_serializing_if = "Option::is_none")]
    pub xmlns_dlna: Option<String>,

    #[serde(rename = "item", default)]
    pub items: Vec<Item>,
}

/// A single media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID")]
    pub parent_id: String,

    #[serde(rename = "@restricted")]
    pub restricted: String,

    #[serde(rename = "dc:title", alias = "title")]
    pub title: String,

    #[serde(
        rename = "upnp:class",
        alias = "class",
        skip_serializing_if = "Option::is_none"
    )]
    pub class: Option<String>,

    #[serde(rename = "res", default)]
    pub resources: Vec<Resource>,
}

/// A `<res>` element: where the content lives and how it is served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "@protocolInfo", skip_serializing_if = "Option::is_none")]
    pub protocol_info: Option<String>,

    #[serde(rename = "$text")]
    pub uri: String,
}

impl DidlLite {
    /// Parse a DIDL-Lite document (already unescaped).
    pub fn parse(input: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(input)
    }
}

/// Map a MIME type to the `upnp:class` a renderer expects.
fn upnp_class_for_mime(mime: &str) -> &'static str {
    if mime.starts_with("video/") {
        "object.item.videoItem"
    } else if mime.starts_with("image/") {
        "object.item.imageItem"
    } else {
        "object.item.audioItem.musicTrack"
    }
}

/// Build the DIDL-Lite metadata document for one media URL.
///
/// The result is raw XML; the SOAP request builder escapes it when it is
/// embedded as a `CurrentURIMetaData` argument.
pub fn build_didl_metadata(title: &str, url: &str, mime: &str, variant: DidlVariant) -> String {
    let protocol_info = match variant {
        DidlVariant::Minimal => None,
        DidlVariant::Standard => Some(format!("http-get:*:{mime}:*")),
        DidlVariant::DlnaExtended => Some(format!("http-get:*:{mime}:{DLNA_FEATURES}")),
    };

    let document = DidlLite {
        xmlns: DIDL_NS.to_string(),
        xmlns_dc: Some(DC_NS.to_string()),
        xmlns_upnp: (variant != DidlVariant::Minimal).then(|| UPNP_NS.to_string()),
        xmlns_dlna: (variant == DidlVariant::DlnaExtended).then(|| DLNA_NS.to_string()),
        items: vec![Item {
            id: "0".to_string(),
            parent_id: "-1".to_string(),
            restricted: "1".to_string(),
            title: title.to_string(),
            class: (variant != DidlVariant::Minimal)
                .then(|| upnp_class_for_mime(mime).to_string()),
            resources: vec![Resource {
                protocol_info,
                uri: url.to_string(),
            }],
        }],
    };

    match quick_xml::se::to_string(&document) {
        Ok(xml) => xml,
        // A Vec sink does not fail; kept so the signature stays infallible.
        Err(_) => format!(r#"<DIDL-Lite xmlns="{DIDL_NS}"/>"#),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://192.168.1.10:9740/a1b2/track.mp3";

    #[test]
    fn minimal_variant_has_no_class_or_protocol_info() {
        let xml = build_didl_metadata("Song", URL, "audio/mpeg", DidlVariant::Minimal);
        assert!(xml.contains("<dc:title>Song</dc:title>"));
        assert!(xml.contains(URL));
        assert!(!xml.contains("upnp:class"));
        assert!(!xml.contains("protocolInfo"));
    }

    #[test]
    fn standard_variant_carries_protocol_info() {
        let xml = build_didl_metadata("Song", URL, "audio/mpeg", DidlVariant::Standard);
        assert!(xml.contains("<upnp:class>object.item.audioItem.musicTrack</upnp:class>"));
        assert!(xml.contains(r#"protocolInfo="http-get:*:audio/mpeg:*""#));
        assert!(!xml.contains("DLNA.ORG"));
    }

    #[test]
    fn dlna_variant_adds_org_flags() {
        let xml = build_didl_metadata("Movie", URL, "video/mp4", DidlVariant::DlnaExtended);
        assert!(xml.contains("object.item.videoItem"));
        assert!(xml.contains("DLNA.ORG_OP=01"));
        assert!(xml.contains("xmlns:dlna"));
    }

    #[test]
    fn titles_with_markup_are_escaped_by_the_serializer() {
        let xml = build_didl_metadata("Tom & Jerry <HD>", URL, "video/mp4", DidlVariant::Standard);
        assert!(xml.contains("Tom &amp; Jerry &lt;HD&gt;"));
    }

    #[test]
    fn built_document_parses_back() {
        let xml = build_didl_metadata("Song", URL, "audio/mpeg", DidlVariant::Standard);
        let parsed = DidlLite::parse(&xml).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title, "Song");
        assert_eq!(parsed.items[0].resources[0].uri, URL);
    }
}
