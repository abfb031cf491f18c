//! SOAP transport.
//!
//! [`SoapTransport`] is the seam between typed service clients and the
//! network: the production implementation POSTs over HTTP with `ureq`,
//! tests substitute canned responses and count calls.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace};
use ureq::Agent;

use castwire::soap::{
    build_soap_request, parse_soap_envelope, parse_upnp_fault, soap_action_header,
};

use crate::errors::ControlError;

/// One SOAP POST: action in, response fields out.
pub trait SoapTransport: Send + Sync {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<HashMap<String, String>, ControlError>;
}

/// HTTP transport on a `ureq` agent.
pub struct HttpSoapTransport {
    agent: Agent,
}

impl HttpSoapTransport {
    pub fn new(timeout: Duration) -> Self {
        // 4xx/5xx must not become transport errors: an HTTP 500 carries the
        // SOAP fault body we need to read.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl SoapTransport for HttpSoapTransport {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<HashMap<String, String>, ControlError> {
        let body_xml = build_soap_request(service_type, action, args);
        let header = soap_action_header(service_type, action);

        trace!(action, control_url, "sending SOAP action");

        let mut response = self
            .agent
            .post(control_url)
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("SOAPAction", &header)
            .send(body_xml)
            .map_err(|e| classify_ureq_error(e, control_url))?;

        let status = response.status();
        let raw_body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ControlError::Network(format!("reading SOAP response body: {e}")))?;

        let envelope = parse_soap_envelope(&raw_body)?;

        if let Some(fault) = parse_upnp_fault(&envelope) {
            debug!(action, fault = %fault.summary(), "SOAP fault");
            return Err(ControlError::from_fault(fault));
        }

        // Some devices answer a fault with plain 500 and a non-fault body;
        // treat any non-success status without a fault as a device error.
        if !status.is_success() {
            return Err(ControlError::Device(format!(
                "HTTP {status} from {control_url} for {action}"
            )));
        }

        Ok(envelope.response_fields())
    }
}

fn classify_ureq_error(err: ureq::Error, control_url: &str) -> ControlError {
    match err {
        ureq::Error::Timeout(_) => {
            ControlError::Timeout(format!("SOAP request to {control_url} timed out"))
        }
        other => ControlError::Network(format!("SOAP request to {control_url}: {other}")),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder =
        Box<dyn Fn(&str, &[(&str, &str)]) -> Result<HashMap<String, String>, ControlError> + Send + Sync>;

    /// Scriptable transport that counts invocations per action.
    pub(crate) struct FakeTransport {
        calls: AtomicUsize,
        log: Mutex<Vec<String>>,
        responder: Responder,
    }

    impl FakeTransport {
        pub(crate) fn new(
            responder: impl Fn(&str, &[(&str, &str)]) -> Result<HashMap<String, String>, ControlError>
            + Send
            + Sync
            + 'static,
        ) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
                responder: Box::new(responder),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn calls_for(&self, action: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.as_str() == action)
                .count()
        }
    }

    impl SoapTransport for FakeTransport {
        fn invoke(
            &self,
            _control_url: &str,
            _service_type: &str,
            action: &str,
            args: &[(&str, &str)],
        ) -> Result<HashMap<String, String>, ControlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(action.to_string());
            (self.responder)(action, args)
        }
    }

    pub(crate) fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
