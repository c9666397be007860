// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Pluggable Firehose authentication. The original C++ client models this
//! as an `IAuthStrategy` behind a `shared_ptr`; the set of vendors is
//! small and closed, so here it's a tagged variant plus one dispatch
//! function instead of a trait object.

use aes::Aes256;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

use crate::error::FirehoseError;
use crate::types::QdlChan;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum AuthStrategy {
    #[default]
    None,
    /// Nonce challenge encrypted with a device-family AES-256-CBC key,
    /// IV all-zero, no padding (the nonce is always a whole number of
    /// 16-byte blocks on every OnePlus programmer observed).
    OnePlus { key: [u8; 32] },
    /// Vendor-issued RSA-2048 signature, optionally preceded by a
    /// signature over the programmer binary itself.
    Xiaomi {
        signature: Vec<u8>,
        programmer_signature: Option<Vec<u8>>,
    },
    /// Digest then signature, each its own `<sig>` element.
    Vip { digest: Vec<u8>, signature: Vec<u8> },
    /// Resolved to concrete key material by a `cloud::DaSigningService`
    /// call before `configure`; by the time `authenticate` runs the
    /// strategy has already been swapped for one of the variants above.
    Cloud { endpoint: String, api_key: String },
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, FirehoseError> {
    if s.len() % 2 != 0 {
        return Err(FirehoseError::AuthRejected(format!(
            "odd-length hex nonce: {s}"
        )));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| FirehoseError::AuthRejected(format!("bad hex nonce: {e}")))
        })
        .collect()
}

pub fn authenticate<T: QdlChan>(strategy: &AuthStrategy, channel: &mut T) -> Result<(), FirehoseError> {
    match strategy {
        AuthStrategy::None => Ok(()),
        AuthStrategy::OnePlus { key } => authenticate_oneplus(channel, key),
        AuthStrategy::Xiaomi {
            signature,
            programmer_signature,
        } => authenticate_xiaomi(channel, signature, programmer_signature.as_deref()),
        AuthStrategy::Vip { digest, signature } => authenticate_vip(channel, digest, signature),
        AuthStrategy::Cloud { .. } => Err(FirehoseError::AuthRejected(
            "Cloud auth strategy must be resolved to concrete key material before authenticate() runs"
                .into(),
        )),
    }
}

fn authenticate_oneplus<T: QdlChan>(channel: &mut T, key: &[u8; 32]) -> Result<(), FirehoseError> {
    crate::firehose_send_command(channel, "getproperty", &[("Type", "OemInfo")])?;
    let attrs = crate::firehose_read_attrs(channel)?;

    // The device only challenges when it wants to; absence of a nonce
    // means auth isn't required for this programmer and we're done.
    let Some(nonce_hex) = attrs.get("value") else {
        return Ok(());
    };
    let nonce = hex_decode(nonce_hex)?;
    if nonce.len() % 16 != 0 {
        return Err(FirehoseError::AuthRejected(
            "OnePlus nonce is not a whole number of AES blocks".into(),
        ));
    }

    let mut buf = nonce.clone();
    let enc = Aes256CbcEnc::new(key.into(), &[0u8; 16].into());
    enc.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, nonce.len())
        .map_err(|e| FirehoseError::AuthRejected(format!("AES encrypt failed: {e}")))?;

    let token = hex_encode(&buf);
    crate::firehose_send_command(channel, "configure", &[("Token", token.as_str())])?;
    match crate::firehose_read(channel, crate::parsers::firehose_parser_ack_nak)? {
        crate::error::FirehoseStatus::Ack => Ok(()),
        crate::error::FirehoseStatus::Nak => {
            Err(FirehoseError::AuthRejected("device rejected OnePlus token".into()))
        }
    }
}

fn authenticate_xiaomi<T: QdlChan>(
    channel: &mut T,
    signature: &[u8],
    programmer_signature: Option<&[u8]>,
) -> Result<(), FirehoseError> {
    if let Some(prog_sig) = programmer_signature {
        send_sig(channel, prog_sig)?;
    }
    send_sig(channel, signature)
}

fn authenticate_vip<T: QdlChan>(
    channel: &mut T,
    digest: &[u8],
    signature: &[u8],
) -> Result<(), FirehoseError> {
    send_sig(channel, digest)?;
    send_sig(channel, signature)
}

fn send_sig<T: QdlChan>(channel: &mut T, blob: &[u8]) -> Result<(), FirehoseError> {
    let size = blob.len().to_string();
    let hex = hex_encode(blob);
    // `<sig>` carries its payload as element text, not an attribute; build
    // it directly rather than through firehose_xml_setup (which only does
    // attribute-only elements).
    let packet = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" ?><data>\n<sig size_in_bytes=\"{size}\">{hex}</sig>\n</data>\n"
    );
    use std::io::Write;
    channel.write_all(packet.as_bytes())?;
    match crate::firehose_read(channel, crate::parsers::firehose_parser_ack_nak)? {
        crate::error::FirehoseStatus::Ack => Ok(()),
        crate::error::FirehoseStatus::Nak => {
            Err(FirehoseError::AuthRejected("device rejected signature".into()))
        }
    }
}
