// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Android boot image header parsing (v0-v3). Extracts kernel/ramdisk/
//! second/dtb/recovery-dtbo slices at their page-aligned offsets.

use crate::error::EngineError;

const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";
const BOOT_MAGIC_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageSlice {
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BootImage {
    pub header_version: u32,
    pub kernel: ImageSlice,
    pub ramdisk: ImageSlice,
    pub second: ImageSlice,
    pub dtb: ImageSlice,
    pub recovery_dtbo: ImageSlice,
    pub cmdline: String,
}

fn page_align(n: usize, page_size: usize) -> usize {
    n.div_ceil(page_size) * page_size
}

fn u32_at(data: &[u8], off: usize) -> Result<u32, EngineError> {
    data.get(off..off + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| EngineError::Parse("boot image header truncated".into()))
}

/// Parse a v0-v3 boot image header. v4 (which moves to a vendor_boot
/// split and drops the monolithic second/recovery-dtbo fields) is out of
/// scope: every device in this engine's target set ships v0-v3.
pub fn parse(data: &[u8]) -> Result<BootImage, EngineError> {
    if data.len() < BOOT_MAGIC_SIZE || &data[0..8] != BOOT_MAGIC {
        return Err(EngineError::Parse("bad boot image magic".into()));
    }

    let kernel_size = u32_at(data, 8)? as usize;
    let kernel_addr = u32_at(data, 12)?;
    let ramdisk_size = u32_at(data, 16)? as usize;
    let ramdisk_addr = u32_at(data, 20)?;
    let second_size = u32_at(data, 24)? as usize;
    let second_addr = u32_at(data, 28)?;
    let _tags_addr = u32_at(data, 32)?;
    let page_size = u32_at(data, 36)? as usize;
    let header_version = u32_at(data, 40)?;
    let _os_version = u32_at(data, 44)?;
    let _ = (kernel_addr, ramdisk_addr, second_addr);

    let cmdline = data
        .get(64..64 + 512)
        .map(|b| {
            let nul = b.iter().position(|&c| c == 0).unwrap_or(b.len());
            String::from_utf8_lossy(&b[..nul]).into_owned()
        })
        .unwrap_or_default();

    if page_size == 0 {
        return Err(EngineError::Parse("boot image page_size is zero".into()));
    }

    let mut offset = page_align(header_size_for_version(header_version), page_size);

    let kernel = ImageSlice {
        offset,
        size: kernel_size,
    };
    offset += page_align(kernel_size, page_size);

    let ramdisk = ImageSlice {
        offset,
        size: ramdisk_size,
    };
    offset += page_align(ramdisk_size, page_size);

    let second = ImageSlice {
        offset,
        size: second_size,
    };
    offset += page_align(second_size, page_size);

    let mut recovery_dtbo = ImageSlice::default();
    let mut dtb = ImageSlice::default();

    if header_version >= 1 {
        let recovery_dtbo_size = u32_at(data, 1632)? as usize;
        recovery_dtbo = ImageSlice {
            offset,
            size: recovery_dtbo_size,
        };
        offset += page_align(recovery_dtbo_size, page_size);
    }
    if header_version >= 2 {
        let dtb_size = u32_at(data, 1648)? as usize;
        dtb = ImageSlice {
            offset,
            size: dtb_size,
        };
    }

    Ok(BootImage {
        header_version,
        kernel,
        ramdisk,
        second,
        dtb,
        recovery_dtbo,
        cmdline,
    })
}

/// v0: 1648 bytes, v1 adds recovery_dtbo fields (+36 bytes incl. its own
/// header_size echo at the end), v2 adds dtb fields (+8 bytes). These are
/// the canonical fixed offsets from the AOSP `bootimg.h` layouts.
fn header_size_for_version(version: u32) -> usize {
    match version {
        0 => 1648,
        1 => 1660,
        _ => 1680,
    }
}

pub fn slice<'a>(data: &'a [u8], s: &ImageSlice) -> Result<&'a [u8], EngineError> {
    if s.size == 0 {
        return Ok(&[]);
    }
    data.get(s.offset..s.offset + s.size)
        .ok_or_else(|| EngineError::Parse("boot image slice out of bounds".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_v0(kernel: &[u8], ramdisk: &[u8], page_size: u32) -> Vec<u8> {
        let mut img = vec![0u8; page_size as usize];
        img[0..8].copy_from_slice(BOOT_MAGIC);
        img[8..12].copy_from_slice(&(kernel.len() as u32).to_le_bytes());
        img[16..20].copy_from_slice(&(ramdisk.len() as u32).to_le_bytes());
        img[36..40].copy_from_slice(&page_size.to_le_bytes());
        img[40..44].copy_from_slice(&0u32.to_le_bytes()); // header_version = 0

        img.extend_from_slice(kernel);
        img.resize(page_size as usize + page_align(kernel.len(), page_size as usize), 0);
        img.extend_from_slice(ramdisk);
        img.resize(
            page_size as usize
                + page_align(kernel.len(), page_size as usize)
                + page_align(ramdisk.len(), page_size as usize),
            0,
        );
        img
    }

    #[test]
    fn parses_v0_kernel_and_ramdisk_offsets() {
        let kernel = vec![0xABu8; 100];
        let ramdisk = vec![0xCDu8; 50];
        let img = build_v0(&kernel, &ramdisk, 4096);
        let parsed = parse(&img).unwrap();
        assert_eq!(parsed.kernel.offset, 4096);
        assert_eq!(parsed.kernel.size, 100);
        assert_eq!(slice(&img, &parsed.kernel).unwrap(), kernel.as_slice());
        assert_eq!(parsed.ramdisk.offset, 4096 * 2);
        assert_eq!(slice(&img, &parsed.ramdisk).unwrap(), ramdisk.as_slice());
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(parse(&[0u8; 64]).is_err());
    }
}
