use crate::modules::catalog::Catalog;
use crate::modules::journal::RunJournal;
use crate::modules::paths::{disambiguate, profile_slug, target_file_name};
use crate::modules::resolver::ResolvedProfile;
use futures_util::stream::{self, StreamExt};
use scout_protocol::{
    DownloadRecord, DownloadStatus, GearType, ModelId, Profile, ProfileId, ProfileRole, RigPairing,
    Selection,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const INFO_FILE: &str = "info.json";
pub const RIG_FILE: &str = "rig.json";

/// A profile's output directory, created on acquisition if absent.
#[derive(Debug, Clone)]
pub struct ProfileDir {
    path: PathBuf,
}

impl ProfileDir {
    pub async fn acquire(root: &Path, slug: &str) -> std::io::Result<Self> {
        let path = root.join(slug);
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// In-progress download target. Removed on drop unless committed.
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn for_target(target: &Path) -> Self {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        Self {
            path: target.with_file_name(name),
            committed: false,
        }
    }

    async fn commit(mut self, target: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InfoFileEntry {
    pub name: String,
    pub model_id: ModelId,
    pub size_bytes: u64,
    #[serde(default)]
    pub source_url: String,
}

/// Contents of `<profile-slug>/info.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProfileInfo {
    pub profile: Profile,
    pub role: ProfileRole,
    pub files: Vec<InfoFileEntry>,
}

impl ProfileInfo {
    /// Upserts by file name; entries already on record stay.
    pub fn merge(&mut self, incoming: Vec<InfoFileEntry>) {
        for entry in incoming {
            match self.files.iter_mut().find(|f| f.name == entry.name) {
                Some(existing) => *existing = entry,
                None => self.files.push(entry),
            }
        }
    }
}

#[derive(Serialize)]
struct RigSummary<'a> {
    id: ProfileId,
    title: &'a str,
    gear: GearType,
    platform: &'a str,
    directory: String,
}

impl<'a> RigSummary<'a> {
    fn of(p: &'a Profile) -> Self {
        Self {
            id: p.id,
            title: &p.title,
            gear: p.gear,
            platform: &p.platform,
            directory: profile_slug(p),
        }
    }
}

#[derive(Serialize)]
struct RigFile<'a> {
    amp: RigSummary<'a>,
    cabinet: Option<RigSummary<'a>>,
    needs_cabinet: bool,
    amp_reason: &'a str,
    cabinet_decision: &'a str,
    cabinet_reason: &'a str,
}

struct Job {
    slot: usize,
    profile_id: ProfileId,
    profile_title: String,
    role: ProfileRole,
    model_id: ModelId,
    file_name: String,
    url: String,
    target: PathBuf,
}

struct JobOutcome {
    slot: usize,
    record: DownloadRecord,
    model_id: ModelId,
    url: String,
}

pub struct DownloadManager<'a> {
    catalog: &'a dyn Catalog,
    output_dir: &'a Path,
    workers: usize,
}

impl<'a> DownloadManager<'a> {
    pub fn new(catalog: &'a dyn Catalog, output_dir: &'a Path, workers: usize) -> Self {
        Self {
            catalog,
            output_dir,
            workers: workers.max(1),
        }
    }

    /// Fetches every resolved file. One record per attempted file, in profile then file order.
    pub async fn download(
        &self,
        resolved: &[ResolvedProfile],
        journal: &mut RunJournal,
    ) -> Vec<DownloadRecord> {
        let mut jobs = Vec::new();
        let mut slots: Vec<Vec<DownloadRecord>> = vec![Vec::new(); resolved.len()];
        let mut dirs: Vec<Option<ProfileDir>> = Vec::with_capacity(resolved.len());
        let mut seen_slugs = HashSet::new();

        for (slot, rp) in resolved.iter().enumerate() {
            let slug = profile_slug(&rp.profile);
            if rp.files.is_empty() || !seen_slugs.insert(slug.clone()) {
                if !rp.files.is_empty() {
                    journal.log(format!(
                        "\"{}\" already handled earlier in this run",
                        rp.profile.title
                    ));
                }
                dirs.push(None);
                continue;
            }
            let mut taken = HashSet::new();
            let names: Vec<String> = rp
                .files
                .iter()
                .map(|m| disambiguate(target_file_name(&rp.profile, m), &mut taken))
                .collect();

            match ProfileDir::acquire(self.output_dir, &slug).await {
                Ok(dir) => {
                    for (m, name) in rp.files.iter().zip(names) {
                        jobs.push(Job {
                            slot,
                            profile_id: rp.profile.id,
                            profile_title: rp.profile.title.clone(),
                            role: rp.role,
                            model_id: m.id,
                            target: dir.file(&name),
                            file_name: name,
                            url: m.url.clone(),
                        });
                    }
                    dirs.push(Some(dir));
                }
                Err(e) => {
                    journal.log(format!(
                        "Could not create directory for \"{}\": {e}",
                        rp.profile.title
                    ));
                    let root = self.output_dir.join(&slug);
                    for name in names {
                        slots[slot].push(DownloadRecord {
                            profile_id: rp.profile.id,
                            profile_title: rp.profile.title.clone(),
                            role: rp.role,
                            path: root.join(&name),
                            file_name: name,
                            status: DownloadStatus::Failed,
                            size_bytes: 0,
                            error: Some(format!("create directory: {e}")),
                        });
                    }
                    dirs.push(None);
                }
            }
        }

        let outcomes: Vec<JobOutcome> = stream::iter(jobs)
            .map(|job| self.fetch_one(job))
            .buffered(self.workers)
            .collect()
            .await;

        let mut entries: Vec<Vec<InfoFileEntry>> = vec![Vec::new(); resolved.len()];
        for o in outcomes {
            let r = &o.record;
            match r.status {
                DownloadStatus::Downloaded => journal.log(format!(
                    "Downloaded {} ({} bytes)",
                    r.path.display(),
                    r.size_bytes
                )),
                DownloadStatus::Skipped => {
                    journal.log(format!("Skipped {} (already exists)", r.path.display()))
                }
                DownloadStatus::Failed => journal.log(format!(
                    "Failed {}: {}",
                    r.file_name,
                    r.error.as_deref().unwrap_or("unknown error")
                )),
            }
            if r.status != DownloadStatus::Failed {
                entries[o.slot].push(InfoFileEntry {
                    name: r.file_name.clone(),
                    model_id: o.model_id,
                    size_bytes: r.size_bytes,
                    source_url: o.url,
                });
            }
            slots[o.slot].push(o.record);
        }

        for ((rp, dir), files) in resolved.iter().zip(&dirs).zip(entries) {
            let Some(dir) = dir else { continue };
            if files.is_empty() {
                continue;
            }
            if let Err(e) = write_info(dir, &rp.profile, rp.role, files).await {
                warn!(error = %e, "info.json write failed");
                journal.log(format!(
                    "Could not write {INFO_FILE} for \"{}\": {e}",
                    rp.profile.title
                ));
            }
        }

        slots.into_iter().flatten().collect()
    }

    async fn fetch_one(&self, job: Job) -> JobOutcome {
        let mut record = DownloadRecord {
            profile_id: job.profile_id,
            profile_title: job.profile_title,
            role: job.role,
            file_name: job.file_name,
            status: DownloadStatus::Failed,
            size_bytes: 0,
            path: job.target.clone(),
            error: None,
        };

        if let Ok(meta) = tokio::fs::metadata(&job.target).await {
            if meta.is_file() {
                record.status = DownloadStatus::Skipped;
                record.size_bytes = meta.len();
                return JobOutcome {
                    slot: job.slot,
                    record,
                    model_id: job.model_id,
                    url: job.url,
                };
            }
        }

        match self.stream_to_disk(&job.url, &job.target).await {
            Ok(bytes) => {
                debug!(path = %job.target.display(), bytes, "downloaded");
                record.status = DownloadStatus::Downloaded;
                record.size_bytes = bytes;
            }
            Err(e) => {
                warn!(path = %job.target.display(), error = %e, "download failed");
                record.error = Some(e);
            }
        }
        JobOutcome {
            slot: job.slot,
            record,
            model_id: job.model_id,
            url: job.url,
        }
    }

    async fn stream_to_disk(&self, url: &str, target: &Path) -> Result<u64, String> {
        let mut chunks = self.catalog.fetch_file(url).await.map_err(|e| e.to_string())?;
        let part = PartFile::for_target(target);
        let mut file = tokio::fs::File::create(&part.path)
            .await
            .map_err(|e| format!("create {}: {e}", part.path.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write: {e}"))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| format!("flush: {e}"))?;
        drop(file);

        if written == 0 {
            return Err("download was empty".to_string());
        }
        part.commit(target)
            .await
            .map_err(|e| format!("rename into place: {e}"))?;
        Ok(written)
    }
}

async fn write_json_atomic(path: &Path, value: &impl Serialize) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await
}

pub async fn read_info(dir: &Path) -> Option<ProfileInfo> {
    let raw = tokio::fs::read(dir.join(INFO_FILE)).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

async fn write_info(
    dir: &ProfileDir,
    profile: &Profile,
    role: ProfileRole,
    entries: Vec<InfoFileEntry>,
) -> std::io::Result<()> {
    let mut info = match read_info(dir.path()).await {
        Some(existing) => existing,
        None => ProfileInfo {
            profile: profile.clone(),
            role,
            files: Vec::new(),
        },
    };
    info.profile = profile.clone();
    info.merge(entries);
    write_json_atomic(&dir.file(INFO_FILE), &info).await
}

/// Writes `rig.json` into each amp directory that holds at least one usable file.
pub async fn write_rig_files(
    output_dir: &Path,
    selection: &Selection,
    records: &[DownloadRecord],
    journal: &mut RunJournal,
) {
    let Selection::Rigs(rigs) = selection else {
        return;
    };
    for rig in rigs {
        let usable = records.iter().any(|r| {
            r.profile_id == rig.amp.id
                && r.role == ProfileRole::Amp
                && r.status != DownloadStatus::Failed
        });
        if !usable {
            continue;
        }
        let dir = output_dir.join(profile_slug(&rig.amp));
        if let Err(e) = write_json_atomic(&dir.join(RIG_FILE), &rig_file(rig)).await {
            journal.log(format!("Could not write {RIG_FILE} for \"{}\": {e}", rig.amp.title));
        }
    }
}

fn rig_file(rig: &RigPairing) -> RigFile<'_> {
    RigFile {
        amp: RigSummary::of(&rig.amp),
        cabinet: rig.cabinet.as_ref().map(RigSummary::of),
        needs_cabinet: rig.needs_cabinet,
        amp_reason: &rig.amp_reason,
        cabinet_decision: &rig.cabinet_decision,
        cabinet_reason: &rig.cabinet_reason,
    }
}
