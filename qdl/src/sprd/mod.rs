// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Spreadtrum FDL protocol stack: BSL handshake, FDL1/FDL2 download, and
//! the partition/IMEI/version operations FDL2 exposes afterward.

pub mod fdl;
