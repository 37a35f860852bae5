// ── SOAP envelope codec (§4.5) ──
//
// Inbound envelopes are untrusted and structurally variable (whichever
// RPC the device is responding to, or an Inform, or a Fault) so they go
// through a real event-based parser. Outbound envelopes are a small,
// fully-known set of shapes, so they're built from templates with the
// values escaped through `quick_xml::escape` -- no generic writer state
// machine needed for a fixed handful of message kinds.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::CwmpError;
use crate::event_code::EventCode;
use crate::fault::{FaultCode, SoapFault};

#[derive(Debug, Clone)]
pub struct InformEvent {
    pub code: EventCode,
    pub command_key: String,
}

#[derive(Debug, Clone)]
pub struct Inform {
    pub manufacturer: String,
    pub oui: String,
    pub product_class: String,
    pub serial_number: String,
    pub events: Vec<InformEvent>,
    pub max_envelopes: u32,
    /// The `ParameterList` device-reported values that always accompany
    /// an Inform; populated with real values when a `4 VALUE CHANGE`
    /// event is present, otherwise just the handful of identity fields
    /// most stacks echo unconditionally.
    pub parameter_values: Vec<ParameterValue>,
}

#[derive(Debug, Clone)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
    pub value_type: String,
}

#[derive(Debug, Clone)]
pub struct TransferCompleteEvent {
    pub command_key: String,
    pub fault: Option<SoapFault>,
}

/// One parsed request or response body. The engine's session state
/// machine dispatches on this; it never sees XML.
#[derive(Debug, Clone)]
pub enum Body {
    Inform(Inform),
    EmptyPost,
    GetParameterValuesResponse(Vec<ParameterValue>),
    SetParameterValuesResponse { status: u32 },
    AddObjectResponse { instance_number: u32, status: u32 },
    DeleteObjectResponse { status: u32 },
    RebootResponse,
    FactoryResetResponse,
    DownloadResponse { status: u32 },
    UploadResponse { status: u32 },
    TransferComplete(TransferCompleteEvent),
    Fault(SoapFault),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub cwmp_id: Option<String>,
    pub body: Body,
}

fn local_name(name: &[u8]) -> &[u8] {
    name.split(|b| *b == b':').next_back().unwrap_or(name)
}

/// Parse one SOAP envelope. Rejects envelopes longer than `max_size`
/// before doing any XML work, per §4.5.
pub fn decode(raw: &str, max_size: usize) -> Result<Envelope, CwmpError> {
    if raw.len() > max_size {
        return Err(CwmpError::EnvelopeTooLarge);
    }
    if raw.trim().is_empty() {
        return Ok(Envelope { cwmp_id: None, body: Body::EmptyPost });
    }

    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text = true;

    let mut cwmp_id = None;
    let mut stack: Vec<String> = Vec::new();
    let mut events = Vec::new();
    let mut parameter_values = Vec::new();
    let mut pending_name = String::new();
    let mut pending_type = String::new();
    let mut fault_code: Option<u32> = None;
    let mut fault_text = String::new();
    let mut body_kind: Option<String> = None;
    let mut scalar: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    loop {
        match reader.read_event().map_err(|e| CwmpError::MalformedEnvelope(e.to_string()))? {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) => {
                let name = String::from_utf8_lossy(local_name(tag.name().as_ref())).to_string();
                if stack.len() == 2 && body_kind.is_none() {
                    // First element inside soap:Body names the RPC kind.
                    body_kind = Some(name.clone());
                }
                if name == "Name" {
                    pending_name.clear();
                }
                if name == "type" || name == "dataType" {
                    // attribute-style types are handled below; element form
                    // is rare but tolerated.
                }
                for attr in tag.attributes().flatten() {
                    let key = String::from_utf8_lossy(local_name(attr.key.as_ref())).to_string();
                    if key == "type" {
                        pending_type = String::from_utf8_lossy(&attr.value).to_string();
                    }
                }
                stack.push(name);
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(|e| CwmpError::MalformedEnvelope(e.to_string()))?.to_string();
                if let Some(top) = stack.last() {
                    match top.as_str() {
                        "ID" => cwmp_id = Some(value),
                        "Name" => pending_name = value,
                        "Value" => {
                            if stack.iter().any(|s| s == "ParameterValueStruct") {
                                parameter_values.push(ParameterValue {
                                    name: pending_name.clone(),
                                    value: value.clone(),
                                    value_type: if pending_type.is_empty() { "string".to_string() } else { pending_type.clone() },
                                });
                                pending_type.clear();
                            }
                        }
                        "EventCode" => events.push(InformEvent { code: EventCode::parse(&value), command_key: String::new() }),
                        "CommandKey" => {
                            if let Some(last) = events.last_mut() {
                                if last.command_key.is_empty() {
                                    last.command_key.clone_from(&value);
                                }
                            }
                            scalar.insert("CommandKey".into(), value);
                        }
                        "FaultCode" => fault_code = value.parse().ok(),
                        "FaultString" => fault_text = value,
                        other => {
                            scalar.insert(other.to_string(), value);
                        }
                    }
                }
            }
            Event::End(_) => {
                stack.pop();
            }
            _ => {}
        }
    }

    let body = match body_kind.as_deref() {
        Some("Inform") => Body::Inform(Inform {
            manufacturer: scalar.get("Manufacturer").cloned().unwrap_or_default(),
            oui: scalar.get("OUI").cloned().unwrap_or_default(),
            product_class: scalar.get("ProductClass").cloned().unwrap_or_default(),
            serial_number: scalar.get("SerialNumber").cloned().unwrap_or_default(),
            events,
            max_envelopes: scalar.get("MaxEnvelopes").and_then(|s| s.parse().ok()).unwrap_or(1),
            parameter_values,
        }),
        Some("GetParameterValuesResponse") => Body::GetParameterValuesResponse(parameter_values),
        Some("SetParameterValuesResponse") => Body::SetParameterValuesResponse { status: scalar.get("Status").and_then(|s| s.parse().ok()).unwrap_or(0) },
        Some("AddObjectResponse") => Body::AddObjectResponse {
            instance_number: scalar.get("InstanceNumber").and_then(|s| s.parse().ok()).unwrap_or(0),
            status: scalar.get("Status").and_then(|s| s.parse().ok()).unwrap_or(0),
        },
        Some("DeleteObjectResponse") => Body::DeleteObjectResponse { status: scalar.get("Status").and_then(|s| s.parse().ok()).unwrap_or(0) },
        Some("RebootResponse") => Body::RebootResponse,
        Some("FactoryResetResponse") => Body::FactoryResetResponse,
        Some("DownloadResponse") => Body::DownloadResponse { status: scalar.get("Status").and_then(|s| s.parse().ok()).unwrap_or(0) },
        Some("UploadResponse") => Body::UploadResponse { status: scalar.get("Status").and_then(|s| s.parse().ok()).unwrap_or(0) },
        Some("TransferComplete") => Body::TransferComplete(TransferCompleteEvent {
            command_key: scalar.get("CommandKey").cloned().unwrap_or_default(),
            fault: fault_code.and_then(FaultCode::from_code).map(|code| SoapFault::with_text(code, fault_text.clone())),
        }),
        Some("Fault") => {
            let code = fault_code.and_then(FaultCode::from_code).unwrap_or(FaultCode::InternalError);
            Body::Fault(SoapFault::with_text(code, fault_text))
        }
        Some(other) => return Err(CwmpError::MalformedEnvelope(format!("unsupported RPC body {other}"))),
        None => Body::EmptyPost,
    };

    Ok(Envelope { cwmp_id, body })
}

const ENVELOPE_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap-env:Envelope xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/"
  xmlns:cwmp="urn:dslforum-org:cwmp-1-2"><soap-env:Header>"#;

fn header(cwmp_id: &str) -> String {
    format!("<cwmp:ID soap-env:mustUnderstand=\"1\">{}</cwmp:ID>", escape(cwmp_id))
}

fn wrap(cwmp_id: &str, body: &str) -> String {
    format!("{ENVELOPE_OPEN}{}</soap-env:Header><soap-env:Body>{body}</soap-env:Body></soap-env:Envelope>", header(cwmp_id))
}

#[must_use]
pub fn encode_inform_response(cwmp_id: &str, max_envelopes: u32) -> String {
    wrap(cwmp_id, &format!("<cwmp:InformResponse><MaxEnvelopes>{max_envelopes}</MaxEnvelopes></cwmp:InformResponse>"))
}

#[must_use]
pub fn encode_get_parameter_values(cwmp_id: &str, names: &[String]) -> String {
    let items: String = names.iter().map(|n| format!("<string>{}</string>", escape(n))).collect();
    wrap(cwmp_id, &format!("<cwmp:GetParameterValues><ParameterNames soap-enc:arrayType=\"xsd:string[{}]\">{items}</ParameterNames></cwmp:GetParameterValues>", names.len()))
}

#[must_use]
pub fn encode_set_parameter_values(cwmp_id: &str, values: &[ParameterValue], parameter_key: &str) -> String {
    let items: String = values
        .iter()
        .map(|v| {
            format!(
                "<ParameterValueStruct><Name>{}</Name><Value xsi:type=\"xsd:{}\">{}</Value></ParameterValueStruct>",
                escape(&v.name),
                escape(&v.value_type),
                escape(&v.value)
            )
        })
        .collect();
    wrap(
        cwmp_id,
        &format!(
            "<cwmp:SetParameterValues><ParameterList soap-enc:arrayType=\"cwmp:ParameterValueStruct[{}]\">{items}</ParameterList><ParameterKey>{}</ParameterKey></cwmp:SetParameterValues>",
            values.len(),
            escape(parameter_key)
        ),
    )
}

#[must_use]
pub fn encode_add_object(cwmp_id: &str, object_path: &str, parameter_key: &str) -> String {
    wrap(cwmp_id, &format!("<cwmp:AddObject><ObjectName>{}</ObjectName><ParameterKey>{}</ParameterKey></cwmp:AddObject>", escape(object_path), escape(parameter_key)))
}

#[must_use]
pub fn encode_delete_object(cwmp_id: &str, object_path: &str, parameter_key: &str) -> String {
    wrap(cwmp_id, &format!("<cwmp:DeleteObject><ObjectName>{}</ObjectName><ParameterKey>{}</ParameterKey></cwmp:DeleteObject>", escape(object_path), escape(parameter_key)))
}

#[must_use]
pub fn encode_reboot(cwmp_id: &str, command_key: &str) -> String {
    wrap(cwmp_id, &format!("<cwmp:Reboot><CommandKey>{}</CommandKey></cwmp:Reboot>", escape(command_key)))
}

#[must_use]
pub fn encode_factory_reset(cwmp_id: &str) -> String {
    wrap(cwmp_id, "<cwmp:FactoryReset></cwmp:FactoryReset>")
}

#[must_use]
pub fn encode_download(cwmp_id: &str, command_key: &str, file_type: &str, url: &str, username: &str, password: &str, file_size: u64) -> String {
    wrap(
        cwmp_id,
        &format!(
            "<cwmp:Download><CommandKey>{}</CommandKey><FileType>{}</FileType><URL>{}</URL><Username>{}</Username><Password>{}</Password><FileSize>{file_size}</FileSize></cwmp:Download>",
            escape(command_key),
            escape(file_type),
            escape(url),
            escape(username),
            escape(password)
        ),
    )
}

#[must_use]
pub fn encode_upload(cwmp_id: &str, command_key: &str, file_type: &str, url: &str, username: &str, password: &str) -> String {
    wrap(
        cwmp_id,
        &format!(
            "<cwmp:Upload><CommandKey>{}</CommandKey><FileType>{}</FileType><URL>{}</URL><Username>{}</Username><Password>{}</Password></cwmp:Upload>",
            escape(command_key),
            escape(file_type),
            escape(url),
            escape(username),
            escape(password)
        ),
    )
}

#[must_use]
pub fn encode_transfer_complete_response(cwmp_id: &str) -> String {
    wrap(cwmp_id, "<cwmp:TransferCompleteResponse></cwmp:TransferCompleteResponse>")
}

#[must_use]
pub fn encode_fault(cwmp_id: &str, fault: &SoapFault) -> String {
    wrap(
        cwmp_id,
        &format!(
            "<soap-env:Fault><faultcode>Client</faultcode><faultstring>CWMP fault</faultstring><detail><cwmp:Fault><FaultCode>{}</FaultCode><FaultString>{}</FaultString></cwmp:Fault></detail></soap-env:Fault>",
            fault.code.code(),
            escape(&fault.text)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFORM: &str = r#"<?xml version="1.0"?>
<soap-env:Envelope xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
<soap-env:Header><cwmp:ID soap-env:mustUnderstand="1">77</cwmp:ID></soap-env:Header>
<soap-env:Body><cwmp:Inform>
<DeviceId><Manufacturer>Acme</Manufacturer><OUI>001122</OUI><ProductClass>Router</ProductClass><SerialNumber>SN1</SerialNumber></DeviceId>
<Event><EventStruct><EventCode>1 BOOT</EventCode><CommandKey></CommandKey></EventStruct></Event>
<MaxEnvelopes>1</MaxEnvelopes>
</cwmp:Inform></soap-env:Body></soap-env:Envelope>"#;

    #[test]
    fn decodes_inform_with_header_id() {
        let envelope = decode(INFORM, 1 << 20).unwrap();
        assert_eq!(envelope.cwmp_id.as_deref(), Some("77"));
        let Body::Inform(inform) = envelope.body else { panic!("expected Inform") };
        assert_eq!(inform.manufacturer, "Acme");
        assert_eq!(inform.serial_number, "SN1");
        assert_eq!(inform.events.len(), 1);
        assert!(inform.events[0].code.is_boot());
    }

    #[test]
    fn value_change_inform_carries_the_changed_parameters() {
        let xml = r#"<?xml version="1.0"?>
<soap-env:Envelope xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
<soap-env:Header><cwmp:ID soap-env:mustUnderstand="1">78</cwmp:ID></soap-env:Header>
<soap-env:Body><cwmp:Inform>
<DeviceId><Manufacturer>Acme</Manufacturer><OUI>001122</OUI><ProductClass>Router</ProductClass><SerialNumber>SN1</SerialNumber></DeviceId>
<Event><EventStruct><EventCode>4 VALUE CHANGE</EventCode><CommandKey></CommandKey></EventStruct></Event>
<ParameterList><ParameterValueStruct><Name>Device.WiFi.SSID.1.Enable</Name><Value xsi:type="xsd:boolean">true</Value></ParameterValueStruct></ParameterList>
<MaxEnvelopes>1</MaxEnvelopes>
</cwmp:Inform></soap-env:Body></soap-env:Envelope>"#;
        let envelope = decode(xml, 1 << 20).unwrap();
        let Body::Inform(inform) = envelope.body else { panic!("expected Inform") };
        assert!(inform.events[0].code.is_value_change());
        assert_eq!(inform.parameter_values.len(), 1);
        assert_eq!(inform.parameter_values[0].name, "Device.WiFi.SSID.1.Enable");
    }

    #[test]
    fn empty_post_decodes_to_empty_post() {
        let envelope = decode("", 1024).unwrap();
        assert!(matches!(envelope.body, Body::EmptyPost));
    }

    #[test]
    fn oversized_envelope_is_rejected() {
        let result = decode(INFORM, 8);
        assert!(matches!(result, Err(CwmpError::EnvelopeTooLarge)));
    }

    #[test]
    fn inform_response_echoes_the_cwmp_id() {
        let xml = encode_inform_response("77", 1);
        assert!(xml.contains("<cwmp:ID soap-env:mustUnderstand=\"1\">77</cwmp:ID>"));
        assert!(xml.contains("<MaxEnvelopes>1</MaxEnvelopes>"));
    }

    #[test]
    fn fault_envelope_carries_code_and_text() {
        let fault = SoapFault::with_text(FaultCode::InvalidParameterValue, "bad value");
        let xml = encode_fault("1", &fault);
        assert!(xml.contains("9007"));
        assert!(xml.contains("bad value"));
    }

    #[test]
    fn factory_reset_round_trips_through_encode_and_decode() {
        let request = encode_factory_reset("1");
        assert!(request.contains("<cwmp:FactoryReset>"));

        let response = r#"<?xml version="1.0"?>
<soap-env:Envelope xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
<soap-env:Header><cwmp:ID soap-env:mustUnderstand="1">1</cwmp:ID></soap-env:Header>
<soap-env:Body><cwmp:FactoryResetResponse></cwmp:FactoryResetResponse></soap-env:Body></soap-env:Envelope>"#;
        let envelope = decode(response, 1 << 20).unwrap();
        assert!(matches!(envelope.body, Body::FactoryResetResponse));
    }

    #[test]
    fn set_parameter_values_escapes_special_characters() {
        let values = vec![ParameterValue { name: "Device.A".into(), value: "<tricky>&\"value\"".into(), value_type: "string".into() }];
        let xml = encode_set_parameter_values("1", &values, "key-1");
        assert!(!xml.contains("<tricky>"));
        assert!(xml.contains("&lt;tricky&gt;"));
    }
}
