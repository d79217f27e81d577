//! Remote authority protocol.
//!
//! Two JSON endpoints, both wrapped in a `{success, data, error}` envelope:
//!
//! - `POST {base}/cache/sync-manifest`: the client uploads its manifest and
//!   receives an ordered action list plus auxiliary recommendations.
//! - `POST {base}/cache/validate-integrity`: the server checks the client's
//!   view and may recommend a metadata rebuild.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context};
use audiocache_core::{CacheEntry, CacheError, CacheIndex, CacheResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SyncError;

/// `cache_type` sent with every request from this component.
pub const CACHE_TYPE_AUDIO: &str = "audio";

pub const SYNC_MANIFEST_PATH: &str = "cache/sync-manifest";
pub const VALIDATE_INTEGRITY_PATH: &str = "cache/validate-integrity";

/// Recommendation action asking the client to rebuild its metadata.
pub const REBUILD_METADATA_ACTION: &str = "rebuild_cache_metadata";

/// Snapshot of local state uploaded during sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCacheInfo {
    pub files: HashMap<String, CacheEntry>,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    #[serde(rename = "lastCleanTime")]
    pub last_clean_time: u64,
    #[serde(rename = "maxSize")]
    pub max_size: u64,
    #[serde(rename = "maxFiles")]
    pub max_files: usize,
}

impl ClientCacheInfo {
    pub fn from_index(index: &CacheIndex, max_size: u64, max_files: usize) -> Self {
        Self {
            files: index.entries().clone(),
            total_size: index.total_size_bytes(),
            last_clean_time: index.last_clean_time(),
            max_size,
            max_files,
        }
    }
}

/// Snapshot uploaded for integrity validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCacheInfo {
    pub files: HashMap<String, CacheEntry>,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
}

impl IntegrityCacheInfo {
    pub fn from_index(index: &CacheIndex) -> Self {
        Self {
            files: index.entries().clone(),
            total_size: index.total_size_bytes(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CacheRequest<'a, T> {
    cache_type: &'static str,
    client_cache_info: &'a T,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
    fn into_data(self, endpoint: &str) -> anyhow::Result<T> {
        if !self.success {
            let reason = match self.error {
                Some(serde_json::Value::String(message)) => message,
                Some(other) => other.to_string(),
                None => "no reason given".to_string(),
            };
            return Err(SyncError::Rejected(format!("{}: {}", endpoint, reason)).into());
        }
        self.data
            .ok_or_else(|| anyhow!("{} response has no data", endpoint))
    }
}

/// Server response to a manifest upload.
///
/// Entries are parsed one at a time. An entry that is not a valid
/// [`SyncAction`] lands in `malformed` and the rest of the list still applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RawManifest")]
pub struct SyncManifest {
    pub actions: Vec<SyncAction>,
    pub server_recommendations: Vec<SyncAction>,
    /// Entries from either list that failed to parse, as received.
    #[serde(skip)]
    pub malformed: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    actions: Vec<serde_json::Value>,
    #[serde(default)]
    server_recommendations: Vec<serde_json::Value>,
}

impl From<RawManifest> for SyncManifest {
    fn from(raw: RawManifest) -> Self {
        let mut malformed = Vec::new();
        let actions = parse_entries(raw.actions, "actions", &mut malformed);
        let server_recommendations = parse_entries(
            raw.server_recommendations,
            "server_recommendations",
            &mut malformed,
        );

        Self {
            actions,
            server_recommendations,
            malformed,
        }
    }
}

fn parse_entries(
    entries: Vec<serde_json::Value>,
    list: &str,
    malformed: &mut Vec<serde_json::Value>,
) -> Vec<SyncAction> {
    entries
        .into_iter()
        .filter_map(|entry| match SyncAction::deserialize(&entry) {
            Ok(action) => Some(action),
            Err(err) => {
                log::warn!("Skipping malformed entry in {}: {} ({})", list, err, entry);
                malformed.push(entry);
                None
            }
        })
        .collect()
}

/// Action kinds understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncActionKind {
    Remove,
    Update,
    ConsiderRemove,
    Prefetch,
}

impl SyncActionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "remove" => Some(Self::Remove),
            "update" => Some(Self::Update),
            "consider_remove" => Some(Self::ConsiderRemove),
            "prefetch" => Some(Self::Prefetch),
            _ => None,
        }
    }
}

impl fmt::Display for SyncActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Remove => "remove",
            Self::Update => "update",
            Self::ConsiderRemove => "consider_remove",
            Self::Prefetch => "prefetch",
        };
        f.write_str(name)
    }
}

/// One server instruction.
///
/// `action` stays a raw string so that kinds added server-side later still
/// deserialize; [`kind`](Self::kind) returns `None` for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAction {
    pub file_key: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Server-side priority label. Unrelated to the local entry priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_access: Option<f64>,
}

impl SyncAction {
    pub fn new(file_key: impl Into<String>, kind: SyncActionKind) -> Self {
        Self {
            file_key: file_key.into(),
            action: kind.to_string(),
            reason: None,
            priority: None,
            days_since_access: None,
        }
    }

    pub fn with_priority(mut self, priority: &str) -> Self {
        self.priority = Some(serde_json::Value::String(priority.to_string()));
        self
    }

    pub fn kind(&self) -> Option<SyncActionKind> {
        SyncActionKind::parse(&self.action)
    }

    /// True when the server flagged this recommendation `"high"`.
    pub fn is_high_priority(&self) -> bool {
        matches!(&self.priority, Some(serde_json::Value::String(p)) if p == "high")
    }
}

/// Server verdict on the client's view of the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<IntegrityRecommendation>,
}

impl IntegrityReport {
    pub fn recommends_rebuild(&self) -> bool {
        self.recommendations
            .iter()
            .any(|r| r.action == REBUILD_METADATA_ACTION)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityRecommendation {
    pub action: String,
    #[serde(flatten)]
    pub details: HashMap<String, serde_json::Value>,
}

/// The server side of sync.
pub trait RemoteAuthority: Send + Sync {
    /// Uploads the manifest and returns the server's instructions.
    fn sync_manifest(&self, info: &ClientCacheInfo) -> anyhow::Result<SyncManifest>;

    /// Asks the server to validate the client's view of the cache.
    fn validate_integrity(&self, info: &IntegrityCacheInfo) -> anyhow::Result<IntegrityReport>;
}

/// [`RemoteAuthority`] over HTTP/JSON.
pub struct HttpRemoteAuthority {
    agent: ureq::Agent,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpRemoteAuthority {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> CacheResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| CacheError::Config(format!("Invalid remote URL {}: {}", base_url, e)))?;
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout(request_timeout)
            .build();

        Ok(Self {
            agent,
            base_url,
            auth_token,
        })
    }

    pub fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("building URL for {}", path))
    }

    fn post<T, R>(&self, path: &str, info: &T) -> anyhow::Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let body = CacheRequest {
            cache_type: CACHE_TYPE_AUDIO,
            client_cache_info: info,
        };

        let mut request = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/json");
        if let Some(token) = &self.auth_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        let response = match request.send_json(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!("POST {} returned status {}: {}", path, status, detail));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(anyhow!("POST {} failed: {}", path, transport));
            }
        };

        let envelope: Envelope<R> = response
            .into_json()
            .with_context(|| format!("decoding {} response", path))?;
        envelope.into_data(path)
    }
}

impl RemoteAuthority for HttpRemoteAuthority {
    fn sync_manifest(&self, info: &ClientCacheInfo) -> anyhow::Result<SyncManifest> {
        self.post(SYNC_MANIFEST_PATH, info)
    }

    fn validate_integrity(&self, info: &IntegrityCacheInfo) -> anyhow::Result<IntegrityReport> {
        self.post(VALIDATE_INTEGRITY_PATH, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiocache_core::Priority;
    use serde_json::json;

    fn authority(base: &str) -> HttpRemoteAuthority {
        HttpRemoteAuthority::new(base, None, Duration::from_secs(1), Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let remote = authority("https://api.example.com/v1");
        assert_eq!(
            remote.endpoint(SYNC_MANIFEST_PATH).unwrap().as_str(),
            "https://api.example.com/v1/cache/sync-manifest"
        );

        let remote = authority("https://api.example.com/");
        assert_eq!(
            remote.endpoint(VALIDATE_INTEGRITY_PATH).unwrap().as_str(),
            "https://api.example.com/cache/validate-integrity"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = HttpRemoteAuthority::new(
            "not a url",
            None,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_manifest_request_shape() {
        let mut index = CacheIndex::new(5);
        index.insert(
            "k.mp3",
            CacheEntry::admitted("https://a/k.mp3", "/c/audio_cache_k.mp3", 10, Priority::DEFAULT, 1),
        );
        let info = ClientCacheInfo::from_index(&index, 100, 50);
        let body = serde_json::to_value(CacheRequest {
            cache_type: CACHE_TYPE_AUDIO,
            client_cache_info: &info,
        })
        .unwrap();

        assert_eq!(body["cache_type"], "audio");
        let info = &body["client_cache_info"];
        assert_eq!(info["totalSize"], 10);
        assert_eq!(info["lastCleanTime"], 5);
        assert_eq!(info["maxSize"], 100);
        assert_eq!(info["maxFiles"], 50);
        assert_eq!(info["files"]["k.mp3"]["size"], 10);
        assert_eq!(info["files"]["k.mp3"]["filePath"], "/c/audio_cache_k.mp3");
    }

    #[test]
    fn test_manifest_response_parses_known_and_unknown_actions() {
        let envelope: Envelope<SyncManifest> = serde_json::from_value(json!({
            "success": true,
            "data": {
                "actions": [
                    {"file_key": "a", "action": "remove", "reason": "deleted upstream"},
                    {"file_key": "b", "action": "transcode"}
                ],
                "server_recommendations": [
                    {"file_key": "c", "action": "consider_remove", "priority": "high", "days_since_access": 20}
                ]
            }
        }))
        .unwrap();

        let manifest = envelope.into_data(SYNC_MANIFEST_PATH).unwrap();
        assert_eq!(manifest.actions[0].kind(), Some(SyncActionKind::Remove));
        assert_eq!(manifest.actions[1].kind(), None);
        let rec = &manifest.server_recommendations[0];
        assert!(rec.is_high_priority());
        assert_eq!(rec.days_since_access, Some(20.0));
    }

    #[test]
    fn test_malformed_entries_do_not_sink_the_manifest() {
        let manifest: SyncManifest = serde_json::from_value(json!({
            "actions": [
                {"file_key": "k", "action": "remove"},
                {"file_key": "j", "action": "consider_remove", "days_since_access": 15.5},
                {"action": "remove"},
                "garbage"
            ],
            "server_recommendations": [
                {"action": "increase_cache_size", "priority": "low"},
                {"file_key": "h", "action": "remove", "priority": "high"}
            ]
        }))
        .unwrap();

        let keys: Vec<_> = manifest.actions.iter().map(|a| a.file_key.as_str()).collect();
        assert_eq!(keys, vec!["k", "j"]);
        assert_eq!(manifest.actions[1].days_since_access, Some(15.5));
        assert_eq!(manifest.server_recommendations.len(), 1);
        assert!(manifest.server_recommendations[0].is_high_priority());

        assert_eq!(manifest.malformed.len(), 3);
        assert_eq!(manifest.malformed[1], json!("garbage"));
        assert_eq!(manifest.malformed[2]["action"], "increase_cache_size");
    }

    #[test]
    fn test_missing_lists_default_to_empty() {
        let manifest: SyncManifest = serde_json::from_value(json!({})).unwrap();
        assert!(manifest.actions.is_empty());
        assert!(manifest.server_recommendations.is_empty());
    }

    #[test]
    fn test_unsuccessful_envelope_is_rejected() {
        let envelope: Envelope<SyncManifest> =
            serde_json::from_value(json!({"success": false, "error": "unauthorized"})).unwrap();
        let err = envelope.into_data(SYNC_MANIFEST_PATH).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::Rejected(msg)) if msg.contains("unauthorized")
        ));
    }

    #[test]
    fn test_numeric_priority_is_not_high() {
        let action: SyncAction =
            serde_json::from_value(json!({"file_key": "x", "action": "remove", "priority": 3}))
                .unwrap();
        assert!(!action.is_high_priority());
    }

    #[test]
    fn test_integrity_report_rebuild_recommendation() {
        let report: IntegrityReport = serde_json::from_value(json!({
            "is_valid": false,
            "issues": [{"type": "size_mismatch"}],
            "recommendations": [{"action": "rebuild_cache_metadata", "reason": "drift"}]
        }))
        .unwrap();
        assert!(report.recommends_rebuild());
        assert_eq!(report.recommendations[0].details["reason"], "drift");
    }
}
