//! Serialization of a named port set into one compact label value.
//!
//! A custom format rather than JSON because the runtime caps label-value
//! size, so brevity matters:
//!
//! ```text
//! portId:portNum/transportProtocol[/applicationProtocol][,portId:...]
//! ```
//!
//! A legacy format with `.`/`-`/`_` separators, written by older versions,
//! is accepted on read only.

use std::collections::{BTreeMap, HashMap};

use crate::attributes::label_value::{LabelValue, MAX_LABEL_VALUE_BYTES};
use crate::error::BackendError;
use crate::port_spec::{PortSpec, TransportProtocol};

const PORT_ID_AND_INFO_SEPARATOR: char = ':';
const PORT_NUM_AND_PROTOCOL_SEPARATOR: char = '/';
const PORT_SPECS_SEPARATOR: char = ',';

const LEGACY_PORT_ID_AND_INFO_SEPARATOR: char = '.';
const LEGACY_PORT_NUM_AND_PROTOCOL_SEPARATOR: char = '-';
const LEGACY_PORT_SPECS_SEPARATOR: char = '_';

const DISALLOWED_CHARS: [char; 3] = [
    PORT_ID_AND_INFO_SEPARATOR,
    PORT_NUM_AND_PROTOCOL_SEPARATOR,
    PORT_SPECS_SEPARATOR,
];

fn validate_free_of_separators(kind: &str, value: &str) -> Result<(), BackendError> {
    if let Some(bad) = value.chars().find(|c| DISALLOWED_CHARS.contains(c)) {
        return Err(BackendError::port_spec(format!(
            "{kind} '{value}' contains disallowed character '{bad}'"
        )));
    }
    Ok(())
}

/// Serializes a named port set into one label value.
///
/// Rejects port IDs or application-protocol strings containing any
/// separator character, and rejects two ports sharing an identical
/// (number, transport protocol) pair under different IDs.
pub fn serialize_port_specs(
    ports: &BTreeMap<String, PortSpec>,
) -> Result<LabelValue, BackendError> {
    let mut fragments = Vec::with_capacity(ports.len());
    let mut used_spec_strs: HashMap<String, &str> = HashMap::new();

    for (port_id, port_spec) in ports {
        validate_free_of_separators("port ID", port_id)?;

        let spec_str = format!(
            "{}{}{}",
            port_spec.number(),
            PORT_NUM_AND_PROTOCOL_SEPARATOR,
            port_spec.transport_protocol(),
        );
        if let Some(previous_port_id) = used_spec_strs.get(spec_str.as_str()) {
            return Err(BackendError::port_spec(format!(
                "port '{port_id}' declares spec '{spec_str}', but that spec is already in use \
                 by port '{previous_port_id}'"
            )));
        }
        used_spec_strs.insert(spec_str.clone(), port_id);

        let mut fragment = format!("{port_id}{PORT_ID_AND_INFO_SEPARATOR}{spec_str}");
        if let Some(application_protocol) = port_spec.maybe_application_protocol() {
            validate_free_of_separators("application protocol", application_protocol)?;
            fragment.push(PORT_NUM_AND_PROTOCOL_SEPARATOR);
            fragment.push_str(application_protocol);
        }
        fragments.push(fragment);
    }

    let result = fragments.join(&PORT_SPECS_SEPARATOR.to_string());
    if result.len() > MAX_LABEL_VALUE_BYTES {
        return Err(BackendError::port_spec(format!(
            "the serialized port specs are {} bytes long but the max label value size is \
             {MAX_LABEL_VALUE_BYTES}; the container must listen on fewer ports",
            result.len()
        )));
    }
    LabelValue::new(result)
}

/// Deserializes a ports label value.
///
/// Tries the current separators first; on failure retries with the legacy
/// separator set, and if both fail propagates the error from the current
/// format.
pub fn deserialize_port_specs(specs_str: &str) -> Result<BTreeMap<String, PortSpec>, BackendError> {
    let current_format_err = match deserialize_with_separators(
        specs_str,
        PORT_SPECS_SEPARATOR,
        PORT_ID_AND_INFO_SEPARATOR,
        PORT_NUM_AND_PROTOCOL_SEPARATOR,
    ) {
        Ok(result) => return Ok(result),
        Err(err) => err,
    };

    if let Ok(result) = deserialize_with_separators(
        specs_str,
        LEGACY_PORT_SPECS_SEPARATOR,
        LEGACY_PORT_ID_AND_INFO_SEPARATOR,
        LEGACY_PORT_NUM_AND_PROTOCOL_SEPARATOR,
    ) {
        return Ok(result);
    }

    Err(BackendError::port_spec(format!(
        "failed to deserialize port spec string '{specs_str}' with both current and legacy \
         separators: {current_format_err}"
    )))
}

fn deserialize_with_separators(
    specs_str: &str,
    specs_separator: char,
    id_and_info_separator: char,
    num_and_protocol_separator: char,
) -> Result<BTreeMap<String, PortSpec>, BackendError> {
    let mut result = BTreeMap::new();
    if specs_str.is_empty() {
        return Ok(result);
    }

    for id_and_spec_str in specs_str.split(specs_separator) {
        let id_and_spec: Vec<&str> = id_and_spec_str.split(id_and_info_separator).collect();
        if id_and_spec.len() != 2 {
            return Err(BackendError::port_spec(format!(
                "expected splitting '{id_and_spec_str}' on '{id_and_info_separator}' to yield \
                 2 fragments but got {}",
                id_and_spec.len()
            )));
        }
        let port_id = id_and_spec[0];
        let spec_str = id_and_spec[1];

        let spec_fragments: Vec<&str> = spec_str.split(num_and_protocol_separator).collect();
        if !(2..=3).contains(&spec_fragments.len()) {
            return Err(BackendError::port_spec(format!(
                "expected splitting '{spec_str}' on '{num_and_protocol_separator}' to yield \
                 2 or 3 fragments but got {}",
                spec_fragments.len()
            )));
        }

        let number: u16 = spec_fragments[0].parse().map_err(|err| {
            BackendError::port_spec(format!(
                "parsing port number '{}': {err}",
                spec_fragments[0]
            ))
        })?;
        let transport_protocol: TransportProtocol = spec_fragments[1].parse()?;

        let mut port_spec = PortSpec::new(number, transport_protocol)?;
        if let Some(application_protocol) = spec_fragments.get(2) {
            port_spec = port_spec.with_application_protocol(*application_protocol);
        }

        result.insert(port_id.to_string(), port_spec);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(number: u16, transport: TransportProtocol) -> PortSpec {
        PortSpec::new(number, transport).unwrap()
    }

    #[test]
    fn valid_port_maps_round_trip() {
        let ports = BTreeMap::from([
            ("grpc".to_string(), port(7443, TransportProtocol::Tcp)),
            (
                "http".to_string(),
                port(8080, TransportProtocol::Tcp).with_application_protocol("http"),
            ),
            ("metrics".to_string(), port(9102, TransportProtocol::Udp)),
        ]);
        let serialized = serialize_port_specs(&ports).unwrap();
        let deserialized = deserialize_port_specs(serialized.as_str()).unwrap();
        assert_eq!(deserialized, ports);
    }

    #[test]
    fn serialized_format_is_stable() {
        let ports = BTreeMap::from([
            ("grpc".to_string(), port(7443, TransportProtocol::Tcp)),
            (
                "http".to_string(),
                port(8080, TransportProtocol::Tcp).with_application_protocol("http"),
            ),
        ]);
        let serialized = serialize_port_specs(&ports).unwrap();
        assert_eq!(serialized.as_str(), "grpc:7443/tcp,http:8080/tcp/http");
    }

    #[test]
    fn legacy_separator_format_is_accepted_on_read() {
        let deserialized = deserialize_port_specs("grpc.7443-tcp_http.8080-tcp").unwrap();
        assert_eq!(deserialized.len(), 2);
        assert_eq!(deserialized["grpc"].number(), 7443);
        assert_eq!(
            deserialized["http"].transport_protocol(),
            TransportProtocol::Tcp
        );
    }

    #[test]
    fn port_ids_with_separator_chars_are_rejected() {
        for bad_id in ["has:colon", "has/slash", "has,comma"] {
            let ports =
                BTreeMap::from([(bad_id.to_string(), port(80, TransportProtocol::Tcp))]);
            assert!(
                serialize_port_specs(&ports).is_err(),
                "port ID '{bad_id}' should have been rejected"
            );
        }
    }

    #[test]
    fn application_protocols_with_separator_chars_are_rejected() {
        for bad_protocol in ["ht:tp", "ht/tp", "ht,tp"] {
            let ports = BTreeMap::from([(
                "web".to_string(),
                port(80, TransportProtocol::Tcp).with_application_protocol(bad_protocol),
            )]);
            assert!(
                serialize_port_specs(&ports).is_err(),
                "application protocol '{bad_protocol}' should have been rejected"
            );
        }
    }

    #[test]
    fn duplicate_number_and_protocol_pair_is_rejected() {
        let ports = BTreeMap::from([
            ("first".to_string(), port(80, TransportProtocol::Tcp)),
            ("second".to_string(), port(80, TransportProtocol::Tcp)),
        ]);
        assert!(serialize_port_specs(&ports).is_err());
    }

    #[test]
    fn same_number_different_protocol_is_accepted() {
        let ports = BTreeMap::from([
            ("dns-tcp".to_string(), port(53, TransportProtocol::Tcp)),
            ("dns-udp".to_string(), port(53, TransportProtocol::Udp)),
        ]);
        serialize_port_specs(&ports).unwrap();
    }

    #[test]
    fn empty_string_deserializes_to_an_empty_map() {
        assert!(deserialize_port_specs("").unwrap().is_empty());
    }

    #[test]
    fn blank_port_fragment_is_rejected() {
        assert!(deserialize_port_specs("grpc:7443/tcp,").is_err());
    }

    #[test]
    fn missing_port_number_is_rejected() {
        assert!(deserialize_port_specs("grpc:/tcp").is_err());
    }

    #[test]
    fn nonnumeric_port_number_is_rejected() {
        assert!(deserialize_port_specs("grpc:seven/tcp").is_err());
    }

    #[test]
    fn unrecognized_transport_protocol_is_rejected() {
        assert!(deserialize_port_specs("grpc:7443/sctp").is_err());
    }

    #[test]
    fn too_many_fragments_are_rejected() {
        assert!(deserialize_port_specs("grpc:7443/tcp/http/extra").is_err());
    }

    #[test]
    fn oversized_serialization_is_rejected() {
        // Enough distinct ports with long IDs to blow the label-value cap.
        let mut ports = BTreeMap::new();
        let filler = "x".repeat(1_100);
        for i in 0..60u16 {
            ports.insert(format!("{filler}{i}"), port(i + 1, TransportProtocol::Tcp));
        }
        assert!(serialize_port_specs(&ports).is_err());
    }
}
