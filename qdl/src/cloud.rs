// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! Collaborator interfaces the core consumes but does not own: loader
//! matching (given a chip identity, which programmer to fetch) and DA
//! signing (MediaTek SLA challenge/response). Modeled as traits so the
//! default HTTP-backed implementation can be swapped for a test double,
//! gated behind the `cloud` feature the way `serial`/`usb`/`vip` already
//! gate their own optional surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct LoaderMatchRequest {
    pub msm_id: String,
    pub pk_hash: String,
    pub oem_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderCandidate {
    pub id: String,
    pub filename: String,
    pub vendor: String,
    pub chip: String,
    pub auth_type: String,
    pub download_url: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct LoaderMatchResponse {
    loaders: Vec<LoaderCandidate>,
}

pub trait LoaderMatchService {
    /// A failed or empty match is not fatal to the caller: it just means
    /// no programmer could be located automatically and the user must
    /// supply `--loader-path` themselves.
    fn match_loaders(&self, req: &LoaderMatchRequest) -> Vec<LoaderCandidate>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DaSigningRequest {
    pub da_hash: String,
    pub challenge: String,
    pub hw_code: u16,
    pub sla_version: u8,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DaSigningResponse {
    pub signed_da: Option<String>,
    pub signed_challenge: Option<String>,
    pub certificate: Option<String>,
    pub error: Option<String>,
}

pub trait DaSigningService {
    fn sign(&self, req: &DaSigningRequest) -> DaSigningResponse;
}

#[cfg(feature = "cloud")]
pub struct HttpLoaderMatchService {
    pub api_base: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "cloud")]
impl HttpLoaderMatchService {
    pub fn new(api_base: String) -> Self {
        HttpLoaderMatchService {
            api_base,
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[cfg(feature = "cloud")]
impl LoaderMatchService for HttpLoaderMatchService {
    fn match_loaders(&self, req: &LoaderMatchRequest) -> Vec<LoaderCandidate> {
        let url = format!("{}/match", self.api_base);
        let result = self
            .client
            .post(url)
            .json(req)
            .send()
            .and_then(|r| r.json::<LoaderMatchResponse>());
        match result {
            Ok(resp) => resp.loaders,
            Err(e) => {
                tracing::warn!("loader match request failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(feature = "cloud")]
pub struct HttpDaSigningService {
    pub api_base: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "cloud")]
impl HttpDaSigningService {
    pub fn new(api_base: String) -> Self {
        HttpDaSigningService {
            api_base,
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[cfg(feature = "cloud")]
impl DaSigningService for HttpDaSigningService {
    fn sign(&self, req: &DaSigningRequest) -> DaSigningResponse {
        let url = format!("{}/api/v1/sign/da", self.api_base);
        let result = self
            .client
            .post(url)
            .json(req)
            .send()
            .and_then(|r| r.json::<DaSigningResponse>());
        match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("DA signing request failed: {e}; continuing without SLA auth");
                DaSigningResponse {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }
}
