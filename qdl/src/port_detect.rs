// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Device enumeration and protocol classification. Merges whatever OS
//! device classes are visible (USB descriptors, COM/tty nodes) into one
//! [`DetectedPort`] list and tags each with the boot-mode protocol its
//! (VID, PID) pair implies.

use std::time::Duration;

use crate::types::{DetectedPort, PortKind};

/// (vid, pid, kind) lookup table. Mirrors the constants already used by
/// the USB transport (`crate::usb::QUALCOMM_VID_PID`/`FASTBOOT_VID_PID`)
/// plus the MTK/Spreadtrum boot-ROM descriptors this engine also targets.
const VID_PID_TABLE: &[(u16, u16, PortKind)] = &[
    (0x05c6, 0x9008, PortKind::QualcommEdl),
    (0x05c6, 0x900e, PortKind::QualcommEdl),
    (0x05c6, 0x9025, PortKind::QualcommDload),
    (0x05c6, 0x901d, PortKind::QualcommDiag),
    (0x0e8d, 0x0003, PortKind::MtkBrom),
    (0x0e8d, 0x2000, PortKind::MtkBrom),
    (0x0e8d, 0x2001, PortKind::MtkPreloader),
    (0x0e8d, 0x2007, PortKind::MtkDa),
    (0x1782, 0x4d00, PortKind::SpreadtrumDownload),
    (0x18d1, 0x4ee0, PortKind::Fastboot),
    (0x18d1, 0xd00d, PortKind::Fastboot),
];

fn classify(vid: u16, pid: u16) -> PortKind {
    VID_PID_TABLE
        .iter()
        .find(|(v, p, _)| *v == vid && *p == pid)
        .map(|(_, _, k)| *k)
        .unwrap_or(PortKind::Unknown)
}

#[cfg(feature = "usb")]
fn detect_usb_ports() -> Vec<DetectedPort> {
    let Ok(devices) = nusb::list_devices().wait() else {
        return Vec::new();
    };
    devices
        .map(|d| {
            let vid = d.vendor_id();
            let pid = d.product_id();
            DetectedPort {
                port_name: None,
                vid,
                pid,
                description: d.product_string().unwrap_or_default().to_string(),
                friendly_name: d.product_string().map(str::to_string),
                instance_id: format!("usb:{:04x}:{:04x}:{}", vid, pid, d.device_address()),
                has_com_port: false,
                is_usb: true,
                classified_kind: classify(vid, pid),
            }
        })
        .collect()
}

#[cfg(not(feature = "usb"))]
fn detect_usb_ports() -> Vec<DetectedPort> {
    Vec::new()
}

#[cfg(feature = "serial")]
fn detect_serial_ports() -> Vec<DetectedPort> {
    let Ok(ports) = serialport::available_ports() else {
        return Vec::new();
    };
    ports
        .into_iter()
        .map(|p| {
            let (vid, pid) = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => (info.vid, info.pid),
                _ => (0, 0),
            };
            DetectedPort {
                port_name: Some(p.port_name.clone()),
                vid,
                pid,
                description: match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        info.product.clone().unwrap_or_default()
                    }
                    _ => String::new(),
                },
                friendly_name: match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => info.product.clone(),
                    _ => None,
                },
                instance_id: p.port_name.clone(),
                has_com_port: true,
                is_usb: matches!(p.port_type, serialport::SerialPortType::UsbPort(_)),
                classified_kind: classify(vid, pid),
            }
        })
        .collect()
}

#[cfg(not(feature = "serial"))]
fn detect_serial_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Merge USB-descriptor-level enumeration with OS tty/COM enumeration.
/// A device can show up in both (e.g. a Qualcomm DIAG port is both a USB
/// interface and a COM port on Windows); entries are merged on (vid, pid)
/// when one side lacks a port_name and the other has one, so a caller
/// sees one row per physical device rather than two partial ones.
pub fn detect_all_ports() -> Vec<DetectedPort> {
    let mut usb = detect_usb_ports();
    let serial = detect_serial_ports();

    let mut merged = Vec::with_capacity(usb.len() + serial.len());
    'serial: for s in serial {
        for u in usb.iter_mut() {
            if u.vid == s.vid && u.pid == s.pid && !u.has_com_port {
                u.port_name = s.port_name.clone();
                u.has_com_port = true;
                continue 'serial;
            }
        }
        merged.push(s);
    }
    merged.append(&mut usb);
    merged
}

/// Block until a port classified as `kind` appears, polling every
/// `interval`. Used by CLI flows that prompt the user to put a device
/// into a particular boot mode and then wait for it to enumerate.
pub fn watch(kind: PortKind, interval: Duration) -> DetectedPort {
    loop {
        if let Some(p) = detect_all_ports().into_iter().find(|p| p.classified_kind == kind) {
            return p;
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_qualcomm_edl_vid_pid() {
        assert_eq!(classify(0x05c6, 0x9008), PortKind::QualcommEdl);
    }

    #[test]
    fn classifies_known_fastboot_vid_pid() {
        assert_eq!(classify(0x18d1, 0x4ee0), PortKind::Fastboot);
    }

    #[test]
    fn unknown_vid_pid_classifies_as_unknown() {
        assert_eq!(classify(0xdead, 0xbeef), PortKind::Unknown);
    }

    #[test]
    fn classifies_mtk_brom_and_preloader_distinctly() {
        assert_eq!(classify(0x0e8d, 0x0003), PortKind::MtkBrom);
        assert_eq!(classify(0x0e8d, 0x2001), PortKind::MtkPreloader);
    }
}
