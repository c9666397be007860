// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.

use indexmap::IndexMap;

use crate::{
    FirehoseError, FirehoseResetMode, FirehoseStatus, NakError, QdlChan, firehose_configure,
    firehose_read, firehose_reset,
};

/// The highest protocol version currently supported by the library
pub(crate) const FH_PROTO_VERSION_SUPPORTED: u32 = 1;

// Parsers are kept separate for more flexibility (e.g. log replay analysis)

fn attr<'a>(attrs: &'a IndexMap<String, String>, key: &str) -> Result<&'a str, FirehoseError> {
    attrs
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| FirehoseError::MalformedData(attrs.clone()))
}

fn attr_parse<F: std::str::FromStr>(
    attrs: &IndexMap<String, String>,
    key: &str,
) -> Result<F, FirehoseError> {
    attr(attrs, key)?
        .parse()
        .map_err(|_| FirehoseError::MalformedData(attrs.clone()))
}

/// Check "value" for ack/nak (generic)
pub fn firehose_parser_ack_nak<T: QdlChan>(
    _: &mut T,
    attrs: &IndexMap<String, String>,
) -> Result<FirehoseStatus, FirehoseError> {
    match attr(attrs, "value")? {
        "ACK" => Ok(FirehoseStatus::Ack),
        "NAK" => Ok(FirehoseStatus::Nak),
        _ => Err(FirehoseError::MalformedData(attrs.clone())),
    }
}

/// Parse the \<configure\> response
pub fn firehose_parser_configure_response<T: QdlChan>(
    channel: &mut T,
    attrs: &IndexMap<String, String>,
) -> Result<FirehoseStatus, FirehoseError> {
    if let Ok(FirehoseStatus::Nak) = firehose_parser_ack_nak(channel, attrs) {
        // The device can't handle that big of a buffer; retry once with its
        // counter-offered size rather than trying to parse ACK-only fields
        // (MaxPayloadSizeToTargetInBytesSupported, Version, ...) out of what
        // is actually a NAK response.
        let Some(val) = attrs.get("MaxPayloadSizeToTargetInBytes") else {
            firehose_reset(channel, &FirehoseResetMode::ResetToEdl, 0)?;
            return Err(FirehoseError::Nak(NakError::Configure));
        };
        channel.mut_fh_config().send_buffer_size = val
            .parse::<usize>()
            .map_err(|_| FirehoseError::MalformedData(attrs.clone()))?;
        firehose_configure(channel, true)?;
        return firehose_read(channel, firehose_parser_configure_response);
    }

    let device_max_write_payload_size: usize =
        attr_parse(attrs, "MaxPayloadSizeToTargetInBytesSupported")?;

    // TODO: track negotiated protocol version once a device advertising
    // MinVersionSupported > 1 turns up to test against.
    let version = attr(attrs, "Version")?;
    let min_version_supported: u32 = attr_parse(attrs, "MinVersionSupported")?;

    tracing::info!("found firehose protocol version {version}");

    if min_version_supported < FH_PROTO_VERSION_SUPPORTED {
        return Err(FirehoseError::ProtocolVersionIncompatibility {
            device_min_version: min_version_supported,
        });
    }

    channel.mut_fh_config().xml_buf_size = attr_parse(attrs, "MaxXMLSizeInBytes")?;
    channel.mut_fh_config().send_buffer_size =
        attr_parse(attrs, "MaxPayloadSizeToTargetInBytes")?;

    // If the device can take a larger buffer, reconfigure it.
    if channel.fh_config().send_buffer_size < device_max_write_payload_size {
        tracing::info!(
            "reconfiguring device to use a larger ({}kB) send buffer",
            device_max_write_payload_size / 1024
        );

        channel.mut_fh_config().send_buffer_size = device_max_write_payload_size;
        firehose_configure(channel, true)?;
        firehose_read(channel, firehose_parser_ack_nak)?;
    }

    Ok(FirehoseStatus::Ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use crate::types::{FirehoseConfiguration, QdlDevice};
    use std::io::Write;

    fn dev() -> QdlDevice<LoopbackTransport> {
        QdlDevice {
            rw: LoopbackTransport::pair().0,
            fh_cfg: FirehoseConfiguration::default(),
            reset_on_drop: false,
        }
    }

    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ack_nak_recognizes_both_values() {
        let mut d = dev();
        assert_eq!(
            firehose_parser_ack_nak(&mut d, &attrs(&[("value", "ACK")])).unwrap(),
            FirehoseStatus::Ack
        );
        assert_eq!(
            firehose_parser_ack_nak(&mut d, &attrs(&[("value", "NAK")])).unwrap(),
            FirehoseStatus::Nak
        );
    }

    #[test]
    fn ack_nak_rejects_garbage() {
        let mut d = dev();
        assert!(firehose_parser_ack_nak(&mut d, &attrs(&[("value", "MAYBE")])).is_err());
        assert!(firehose_parser_ack_nak(&mut d, &attrs(&[])).is_err());
    }

    #[test]
    fn configure_response_adopts_negotiated_sizes() {
        let mut d = dev();
        let a = attrs(&[
            ("value", "ACK"),
            ("MaxPayloadSizeToTargetInBytesSupported", "1048576"),
            ("MaxPayloadSizeToTargetInBytes", "1048576"),
            ("MaxXMLSizeInBytes", "4096"),
            ("Version", "1"),
            ("MinVersionSupported", "1"),
        ]);
        let status = firehose_parser_configure_response(&mut d, &a).unwrap();
        assert_eq!(status, FirehoseStatus::Ack);
        assert_eq!(d.fh_cfg.xml_buf_size, 4096);
        assert_eq!(d.fh_cfg.send_buffer_size, 1048576);
    }

    #[test]
    fn configure_response_rejects_incompatible_version() {
        let mut d = dev();
        let a = attrs(&[
            ("value", "ACK"),
            ("MaxPayloadSizeToTargetInBytesSupported", "1048576"),
            ("MaxPayloadSizeToTargetInBytes", "1048576"),
            ("MaxXMLSizeInBytes", "4096"),
            ("Version", "1"),
            ("MinVersionSupported", "99"),
        ]);
        let err = firehose_parser_configure_response(&mut d, &a).unwrap_err();
        assert!(matches!(
            err,
            FirehoseError::ProtocolVersionIncompatibility { device_min_version: 99 }
        ));
    }

    #[test]
    fn configure_response_retries_with_counter_offered_size_on_nak() {
        let (host, mut dut) = LoopbackTransport::pair();
        let mut d = QdlDevice {
            rw: host,
            fh_cfg: FirehoseConfiguration::default(),
            reset_on_drop: false,
        };

        // The device NAKs the first <configure> with a smaller buffer size,
        // then ACKs the retried <configure>.
        let ack = crate::firehose_xml_setup(
            "response",
            &[
                ("value", "ACK"),
                ("MaxPayloadSizeToTargetInBytesSupported", "65536"),
                ("MaxPayloadSizeToTargetInBytes", "65536"),
                ("MaxXMLSizeInBytes", "4096"),
                ("Version", "1"),
                ("MinVersionSupported", "1"),
            ],
        )
        .unwrap();
        dut.write_all(&ack).unwrap();

        let nak = attrs(&[("value", "NAK"), ("MaxPayloadSizeToTargetInBytes", "65536")]);
        let status = firehose_parser_configure_response(&mut d, &nak).unwrap();
        assert_eq!(status, FirehoseStatus::Ack);
        assert_eq!(d.fh_cfg.send_buffer_size, 65536);
    }
}
