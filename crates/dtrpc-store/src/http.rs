//! HTTP+JSON wire adapter against a Rhizome-shaped REST overlay: basic-auth
//! list/newsince/fetch/insert endpoints plus keyring identity resolution
//! (§4.1, §6.2).

use crate::{BundleStore, InsertOutcome};
use async_trait::async_trait;
use dtrpc_core::{Bundle, BundleId, Sid, Token, KEY_FROM_HERE};
use dtrpc_error::{DtrpcError, ErrorCode};
use dtrpc_protocol::{row_str, BundleListResponse};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// An HTTP+JSON client for a Rhizome-shaped bundle overlay.
///
/// Speaks basic auth against `/restful/rhizome/*` and
/// `/restful/keyring/identities.json`. Connection refusal and JSON decode
/// failures surface as retryable [`DtrpcError`]s; a 401 response is always
/// fatal.
pub struct HttpBundleStore {
    base_url: String,
    user: String,
    passwd: String,
    client: Client,
}

impl HttpBundleStore {
    /// Construct a client pointed at `base_url` (e.g. `http://localhost:4110`).
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, passwd: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user: user.into(),
            passwd: passwd.into(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, DtrpcError> {
        let resp = self
            .client
            .get(self.url(path))
            .basic_auth(&self.user, Some(&self.passwd))
            .send()
            .await
            .map_err(transport_error)?;
        handle_status(&resp)?;
        resp.json::<Value>().await.map_err(framing_error)
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, DtrpcError> {
        let resp = self
            .client
            .get(self.url(path))
            .basic_auth(&self.user, Some(&self.passwd))
            .send()
            .await
            .map_err(transport_error)?;
        if resp.status() == StatusCode::FORBIDDEN {
            return Err(DtrpcError::new(
                ErrorCode::StoreDecryptionFailed,
                "store could not decrypt payload for local SID",
            ));
        }
        handle_status(&resp)?;
        Ok(resp.bytes().await.map_err(transport_error)?.to_vec())
    }

    async fn list_at(&self, path: &str) -> Result<Vec<Bundle>, DtrpcError> {
        let raw = self.get_json(path).await?;
        let parsed: BundleListResponse = serde_json::from_value(raw).map_err(framing_error)?;
        let rows = parsed.into_rows()?;
        rows.iter().map(row_to_bundle).collect()
    }
}

#[async_trait]
impl BundleStore for HttpBundleStore {
    async fn identity(&self) -> Result<Sid, DtrpcError> {
        let raw = self.get_json("/restful/keyring/identities.json").await?;
        let identities: Vec<String> = serde_json::from_value(raw).map_err(framing_error)?;
        let first = identities.first().ok_or_else(|| {
            DtrpcError::new(ErrorCode::AuthNoIdentity, "keyring has no local identities")
        })?;
        Sid::parse(first)
            .map_err(|e| DtrpcError::new(ErrorCode::AuthNoIdentity, e.to_string()))
    }

    async fn list(&self) -> Result<Vec<Bundle>, DtrpcError> {
        self.list_at("/restful/rhizome/bundlelist.json").await
    }

    async fn newsince(&self, token: Token) -> Result<Vec<Bundle>, DtrpcError> {
        self.list_at(&format!("/restful/rhizome/newsince/{}/bundlelist.json", token.0))
            .await
    }

    async fn fetch(&self, id: &BundleId) -> Result<Bundle, DtrpcError> {
        let manifest_raw = self.get_json(&format!("/restful/rhizome/{}.rhm", id.as_str())).await?;
        let manifest: BTreeMap<String, String> =
            serde_json::from_value(manifest_raw).map_err(framing_error)?;
        let payload = self
            .get_bytes(&format!("/restful/rhizome/{}/decrypted.bin", id.as_str()))
            .await?;
        let token = manifest
            .get("token")
            .and_then(|t| t.parse::<u64>().ok())
            .map(Token)
            .unwrap_or_default();
        Ok(Bundle {
            bundle_id: id.clone(),
            token,
            manifest,
            payload,
        })
    }

    async fn insert(
        &self,
        manifest: BTreeMap<String, String>,
        payload: Vec<u8>,
        author: &Sid,
    ) -> Result<InsertOutcome, DtrpcError> {
        let form = reqwest::multipart::Form::new()
            .text("bundle-author", author.to_string())
            .text("manifest", serde_json::to_string(&manifest).map_err(framing_error)?)
            .part("payload", reqwest::multipart::Part::bytes(payload));

        let resp = self
            .client
            .post(self.url("/restful/rhizome/insert"))
            .basic_auth(&self.user, Some(&self.passwd))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        handle_status(&resp)?;
        let body: InsertResponse = resp.json().await.map_err(framing_error)?;
        let bundle = insert_response_to_bundle(&body);
        if body.duplicate {
            Ok(InsertOutcome::Duplicate(bundle))
        } else {
            Ok(InsertOutcome::Inserted(bundle))
        }
    }

    async fn update(
        &self,
        id: &BundleId,
        manifest_patch: BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<Bundle, DtrpcError> {
        let form = reqwest::multipart::Form::new()
            .text("bundle-id", id.as_str().to_string())
            .text(
                "manifest",
                serde_json::to_string(&manifest_patch).map_err(framing_error)?,
            )
            .part("payload", reqwest::multipart::Part::bytes(payload));

        let resp = self
            .client
            .post(self.url("/restful/rhizome/insert"))
            .basic_auth(&self.user, Some(&self.passwd))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DtrpcError::new(
                ErrorCode::ProtocolNoMatchingStep,
                format!("bundle {id} not found for update"),
            ));
        }
        handle_status(&resp)?;
        let body: InsertResponse = resp.json().await.map_err(framing_error)?;
        Ok(insert_response_to_bundle(&body))
    }
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    bundle_id: String,
    token: u64,
    #[serde(default)]
    duplicate: bool,
    #[serde(default)]
    manifest: BTreeMap<String, String>,
}

fn insert_response_to_bundle(resp: &InsertResponse) -> Bundle {
    let mut manifest = resp.manifest.clone();
    manifest.entry(KEY_FROM_HERE.to_string()).or_insert_with(|| "true".to_string());
    Bundle {
        bundle_id: BundleId::new(resp.bundle_id.clone()),
        token: Token(resp.token),
        manifest,
        payload: Vec::new(),
    }
}

fn row_to_bundle(row: &dtrpc_protocol::Row) -> Result<Bundle, DtrpcError> {
    let bundle_id = row_str(row, "bundle_id")
        .ok_or_else(|| framing_message("bundle-list row missing bundle_id"))?;
    let token = row
        .get("token")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| framing_message("bundle-list row missing numeric token"))?;

    let mut manifest = BTreeMap::new();
    for key in ["service", "name", "sender", "recipient"] {
        if let Some(value) = row_str(row, key) {
            manifest.insert(key.to_string(), value.to_string());
        }
    }
    let from_here = row.get("from_here").and_then(|v| v.as_bool()).unwrap_or(false);
    manifest.insert(KEY_FROM_HERE.to_string(), from_here.to_string());

    Ok(Bundle {
        bundle_id: BundleId::new(bundle_id.to_string()),
        token: Token(token),
        manifest,
        payload: Vec::new(),
    })
}

fn handle_status(resp: &reqwest::Response) -> Result<(), DtrpcError> {
    match resp.status() {
        StatusCode::UNAUTHORIZED => Err(DtrpcError::new(
            ErrorCode::AuthUnauthorized,
            "store rejected credentials",
        )),
        status if status.is_success() => Ok(()),
        status => Err(DtrpcError::new(
            ErrorCode::TransportUnavailable,
            format!("store returned unexpected status {status}"),
        )),
    }
}

fn transport_error(err: reqwest::Error) -> DtrpcError {
    DtrpcError::new(ErrorCode::TransportUnavailable, err.to_string())
}

fn framing_error(err: impl std::fmt::Display) -> DtrpcError {
    framing_message(&err.to_string())
}

fn framing_message(msg: &str) -> DtrpcError {
    DtrpcError::new(ErrorCode::TransportFraming, msg.to_string())
}
