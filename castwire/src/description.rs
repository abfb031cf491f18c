//! Device description XML: the document a device serves at its SSDP
//! LOCATION URL.
//!
//! Parsing is streaming (quick-xml) because descriptions from embedded
//! firmware can be large and occasionally sloppy; we only keep the fields a
//! control point needs. Relative service URLs are resolved against the
//! description URL here, once, so the rest of the engine only ever sees
//! absolute URLs.

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use url::Url;
use xmltree::{Element, EmitterConfig, XMLNode};

use crate::escape::escape_xml;

/// One `<service>` entry of a device description, URLs already absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub event_sub_url: String,
    pub scpd_url: String,
}

/// The subset of a UPnP device description a control point cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub services: Vec<ServiceDescription>,
}

#[derive(Debug, Error)]
pub enum DescriptionParseError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid description base URL '{url}': {source}")]
    BadBaseUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("missing required device element: {0}")]
    MissingField(&'static str),
}

#[derive(Default)]
struct PartialService {
    service_type: Option<String>,
    service_id: Option<String>,
    control_url: Option<String>,
    event_sub_url: Option<String>,
    scpd_url: Option<String>,
}

impl PartialService {
    fn finish(self, base: &Url) -> Option<ServiceDescription> {
        // serviceType and controlURL are the minimum to drive a service;
        // eventing and SCPD URLs are optional in the wild.
        Some(ServiceDescription {
            service_type: self.service_type?,
            service_id: self.service_id.unwrap_or_default(),
            control_url: resolve(base, &self.control_url?),
            event_sub_url: self.event_sub_url.map(|u| resolve(base, &u)).unwrap_or_default(),
            scpd_url: self.scpd_url.map(|u| resolve(base, &u)).unwrap_or_default(),
        })
    }
}

/// Resolve a possibly relative URL against the description URL.
fn resolve(base: &Url, candidate: &str) -> String {
    match base.join(candidate) {
        Ok(url) => url.to_string(),
        // A candidate the URL parser rejects outright is left as-is; the
        // control point's fallback path probing will deal with it.
        Err(_) => candidate.to_string(),
    }
}

/// Parse a device description document.
///
/// `description_url` is the URL the XML was fetched from; it provides the
/// base for relative `controlURL`/`eventSubURL`/`SCPDURL` values.
pub fn parse_device_description(
    xml: &str,
    description_url: &str,
) -> Result<DeviceDescription, DescriptionParseError> {
    let base = Url::parse(description_url).map_err(|source| DescriptionParseError::BadBaseUrl {
        url: description_url.to_string(),
        source,
    })?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut device_depth: u32 = 0;
    let mut in_service = false;
    let mut current_tag: Option<String> = None;
    let mut current_service = PartialService::default();

    let mut udn: Option<String> = None;
    let mut device_type: Option<String> = None;
    let mut friendly_name: Option<String> = None;
    let mut manufacturer: Option<String> = None;
    let mut model_name: Option<String> = None;
    let mut services: Vec<ServiceDescription> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "device" => {
                        device_depth += 1;
                        current_tag = None;
                    }
                    "service" if device_depth > 0 => {
                        in_service = true;
                        current_service = PartialService::default();
                        current_tag = None;
                    }
                    _ if device_depth > 0 => {
                        current_tag = Some(name);
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "device" => device_depth = device_depth.saturating_sub(1),
                    "service" if in_service => {
                        in_service = false;
                        let partial = std::mem::take(&mut current_service);
                        if let Some(service) = partial.finish(&base) {
                            services.push(service);
                        }
                    }
                    _ => {}
                }
                current_tag = None;
            }
            Event::Text(e) => {
                if device_depth == 0 {
                    continue;
                }
                let Some(tag) = &current_tag else { continue };
                let text = e.decode().map_err(quick_xml::Error::Encoding)?.into_owned();

                if in_service {
                    match tag.as_str() {
                        "serviceType" => current_service.service_type = Some(text),
                        "serviceId" => current_service.service_id = Some(text),
                        "controlURL" => current_service.control_url = Some(text),
                        "eventSubURL" => current_service.event_sub_url = Some(text),
                        "SCPDURL" => current_service.scpd_url = Some(text),
                        _ => {}
                    }
                } else {
                    // Only the first (root) device's identity fields count;
                    // embedded devices still contribute their services.
                    match tag.as_str() {
                        "UDN" => udn.get_or_insert(text),
                        "deviceType" => device_type.get_or_insert(text),
                        "friendlyName" => friendly_name.get_or_insert(text),
                        "manufacturer" => manufacturer.get_or_insert(text),
                        "modelName" => model_name.get_or_insert(text),
                        _ => continue,
                    };
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(DeviceDescription {
        udn: udn.ok_or(DescriptionParseError::MissingField("UDN"))?,
        device_type: device_type.ok_or(DescriptionParseError::MissingField("deviceType"))?,
        friendly_name: friendly_name
            .ok_or(DescriptionParseError::MissingField("friendlyName"))?,
        manufacturer: manufacturer.unwrap_or_default(),
        model_name: model_name.unwrap_or_default(),
        services,
    })
}

/// Serialize a [`DeviceDescription`] back to description XML.
///
/// Emits absolute URLs as-is. Used for test fixtures; real devices produce
/// their own documents.
pub fn build_device_description_xml(desc: &DeviceDescription) -> String {
    let mut device = Element::new("device");
    push_text_child(&mut device, "deviceType", &desc.device_type);
    push_text_child(&mut device, "friendlyName", &desc.friendly_name);
    push_text_child(&mut device, "manufacturer", &desc.manufacturer);
    push_text_child(&mut device, "modelName", &desc.model_name);
    push_text_child(&mut device, "UDN", &desc.udn);

    let mut service_list = Element::new("serviceList");
    for svc in &desc.services {
        let mut service = Element::new("service");
        push_text_child(&mut service, "serviceType", &svc.service_type);
        push_text_child(&mut service, "serviceId", &svc.service_id);
        push_text_child(&mut service, "controlURL", &svc.control_url);
        push_text_child(&mut service, "eventSubURL", &svc.event_sub_url);
        push_text_child(&mut service, "SCPDURL", &svc.scpd_url);
        service_list.children.push(XMLNode::Element(service));
    }
    device.children.push(XMLNode::Element(service_list));

    let mut root = Element::new("root");
    root.attributes.insert(
        "xmlns".to_string(),
        "urn:schemas-upnp-org:device-1-0".to_string(),
    );
    root.children.push(XMLNode::Element(device));

    let mut out = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    // Writing to a Vec cannot fail; fall back to a minimal document if the
    // emitter ever does.
    if root.write_with_config(&mut out, config).is_err() {
        return format!(
            "<root><device><UDN>{}</UDN></device></root>",
            escape_xml(&desc.udn)
        );
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn push_text_child(parent: &mut Element, name: &str, text: &str) {
    let mut child = Element::new(name);
    child.children.push(XMLNode::Text(text.to_string()));
    parent.children.push(XMLNode::Element(child));
}
