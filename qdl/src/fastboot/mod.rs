// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Android Fastboot protocol: text commands over a USB bulk pipe.

pub mod protocol;

pub use protocol::{FastbootClient, Response};
