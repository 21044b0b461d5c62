use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

pub type ProfileId = i64;
pub type ModelId = i64;

pub const DEFAULT_MAX_TONES: u8 = 3;
pub const DEFAULT_MAX_RESULTS: u8 = 15;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GearType {
    Amp,
    Ir,
    Pedal,
    #[serde(other)]
    Other,
}

impl GearType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GearType::Amp => "amp",
            GearType::Ir => "ir",
            GearType::Pedal => "pedal",
            GearType::Other => "other",
        }
    }

    /// Parses the catalog's gear label. Unknown labels are `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "amp" => Some(GearType::Amp),
            "ir" => Some(GearType::Ir),
            "pedal" => Some(GearType::Pedal),
            _ => None,
        }
    }
}

impl fmt::Display for GearType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Simple,
    Rig,
}

/// An API key held in memory that is wiped on drop and never printed.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret::new)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub catalog_api_key: Option<Secret>,
    #[serde(default)]
    pub ai_api_key: Option<Secret>,
}

/// One invocation's input. Immutable for the duration of a run.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToneRequest {
    pub request: String,
    pub output_dir: PathBuf,
    #[serde(default = "default_max_tones")]
    pub max_tones: u8,
    #[serde(default = "default_max_results")]
    pub max_results: u8,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_max_tones() -> u8 {
    DEFAULT_MAX_TONES
}

fn default_max_results() -> u8 {
    DEFAULT_MAX_RESULTS
}

impl ToneRequest {
    pub fn new(request: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            request: request.into(),
            output_dir: output_dir.into(),
            max_tones: DEFAULT_MAX_TONES,
            max_results: DEFAULT_MAX_RESULTS,
            ai_model: None,
            mode: SelectionMode::Simple,
            credentials: Credentials::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestAnalysis {
    pub description: String,
    pub gear: Option<GearType>,
    pub search_queries: Vec<String>,
    pub fallback_queries: Vec<String>,
    #[serde(default)]
    pub explanation_steps: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: ProfileId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub gear: GearType,
    pub platform: String,
    #[serde(default)]
    pub downloads_count: u64,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Profile {
    /// `nam` platform profiles ship Neural Amp Modeler captures.
    pub fn is_nam_family(&self) -> bool {
        self.platform.trim().to_ascii_lowercase().starts_with("nam")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub id: ModelId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileRole {
    Tone,
    Amp,
    Cabinet,
}

impl ProfileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileRole::Tone => "tone",
            ProfileRole::Amp => "amp",
            ProfileRole::Cabinet => "cab",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RigPairing {
    pub amp: Profile,
    pub amp_reason: String,
    pub needs_cabinet: bool,
    pub cabinet_decision: String,
    pub cabinet: Option<Profile>,
    pub cabinet_reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode", content = "items")]
pub enum Selection {
    Profiles(Vec<Profile>),
    Rigs(Vec<RigPairing>),
}

impl Selection {
    /// Number of top-level picks (profiles or rigs).
    pub fn len(&self) -> usize {
        match self {
            Selection::Profiles(p) => p.len(),
            Selection::Rigs(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every profile to fetch, in selection order. A rig yields its amp then its cabinet.
    pub fn components(&self) -> Vec<(ProfileRole, &Profile)> {
        match self {
            Selection::Profiles(profiles) => {
                profiles.iter().map(|p| (ProfileRole::Tone, p)).collect()
            }
            Selection::Rigs(rigs) => {
                let mut out = Vec::with_capacity(rigs.len() * 2);
                for rig in rigs {
                    out.push((ProfileRole::Amp, &rig.amp));
                    if let Some(cab) = rig.cabinet.as_ref() {
                        out.push((ProfileRole::Cabinet, cab));
                    }
                }
                out
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Downloaded,
    Failed,
    Skipped,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub profile_id: ProfileId,
    pub profile_title: String,
    pub role: ProfileRole,
    pub file_name: String,
    pub status: DownloadStatus,
    pub size_bytes: u64,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AiStep {
    pub step: u32,
    pub title: String,
    pub details: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunCounts {
    pub attempted: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunCounts {
    pub fn from_records(records: &[DownloadRecord]) -> Self {
        let mut counts = RunCounts {
            attempted: records.len(),
            ..RunCounts::default()
        };
        for r in records {
            match r.status {
                DownloadStatus::Downloaded => counts.downloaded += 1,
                DownloadStatus::Failed => counts.failed += 1,
                DownloadStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    AnalyzingRequest,
    BuildingPool,
    Selecting,
    ResolvingModels,
    Downloading,
    Done,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    CatalogUnavailable,
    CatalogAuthError,
    AiTransportError,
    AiMalformedResponse,
    AiEmptyDecision,
    NoCandidates,
    DownloadFailure,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: Stage,
}

/// The single output of one pipeline invocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub request: String,
    pub ai_model: String,
    pub analysis: Option<RequestAnalysis>,
    pub pool_size: usize,
    pub selection: Option<Selection>,
    pub downloads: Vec<DownloadRecord>,
    pub counts: RunCounts,
    pub ai_steps: Vec<AiStep>,
    pub output_dir: PathBuf,
    pub error: Option<RunError>,
    pub logs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: ProfileId, gear: GearType) -> Profile {
        Profile {
            id,
            title: format!("Profile {id}"),
            description: String::new(),
            gear,
            platform: "nam".to_string(),
            downloads_count: 0,
            author: None,
            url: None,
        }
    }

    #[test]
    fn tone_request_defaults_from_host_json() {
        let raw = r#"{"request":"warm vintage crunch","outputDir":"./out","credentials":{"catalogApiKey":"abc"}}"#;
        let req: ToneRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.max_tones, DEFAULT_MAX_TONES);
        assert_eq!(req.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(req.mode, SelectionMode::Simple);
        assert_eq!(req.credentials.catalog_api_key.unwrap().expose(), "abc");
        assert!(req.credentials.ai_api_key.is_none());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let s = Secret::new("AIza-very-secret");
        assert!(!format!("{s:?}").contains("very-secret"));
    }

    #[test]
    fn unknown_gear_label_decodes_as_other() {
        let g: GearType = serde_json::from_str("\"outboard\"").unwrap();
        assert_eq!(g, GearType::Other);
        assert_eq!(GearType::from_label(" IR "), Some(GearType::Ir));
    }

    #[test]
    fn rig_components_keep_amp_before_cabinet() {
        let sel = Selection::Rigs(vec![
            RigPairing {
                amp: profile(1, GearType::Amp),
                amp_reason: String::new(),
                needs_cabinet: true,
                cabinet_decision: String::new(),
                cabinet: Some(profile(9, GearType::Ir)),
                cabinet_reason: String::new(),
            },
            RigPairing {
                amp: profile(2, GearType::Amp),
                amp_reason: String::new(),
                needs_cabinet: false,
                cabinet_decision: String::new(),
                cabinet: None,
                cabinet_reason: String::new(),
            },
        ]);
        let ids: Vec<(ProfileRole, ProfileId)> =
            sel.components().into_iter().map(|(r, p)| (r, p.id)).collect();
        assert_eq!(
            ids,
            vec![
                (ProfileRole::Amp, 1),
                (ProfileRole::Cabinet, 9),
                (ProfileRole::Amp, 2)
            ]
        );
        assert_eq!(sel.len(), 2);
    }
}
