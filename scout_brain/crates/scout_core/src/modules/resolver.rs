use crate::modules::advisor::{Advisor, AdvisorError};
use crate::modules::catalog::{Catalog, CatalogError};
use crate::modules::journal::RunJournal;
use crate::modules::pipeline::PipelineError;
use futures_util::stream::{self, StreamExt};
use scout_protocol::{ModelFile, Profile, ProfileRole, Selection};

/// A selected profile with the files that will be attempted, in filtered-list order.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub role: ProfileRole,
    pub profile: Profile,
    pub files: Vec<ModelFile>,
    /// Files enumerated by the catalog before filtering.
    pub enumerated: usize,
}

struct Resolution {
    resolved: ResolvedProfile,
    notes: Vec<String>,
    step: Option<(String, Vec<String>)>,
    abort: Option<PipelineError>,
}

pub struct ModelResolver<'a> {
    catalog: &'a dyn Catalog,
    advisor: &'a Advisor<'a>,
    max_keep: usize,
    workers: usize,
}

impl<'a> ModelResolver<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        advisor: &'a Advisor<'a>,
        max_keep: usize,
        workers: usize,
    ) -> Self {
        Self {
            catalog,
            advisor,
            max_keep,
            workers: workers.max(1),
        }
    }

    /// Resolves every selected profile. Results, notes and AiSteps follow selection order.
    pub async fn resolve(
        &self,
        selection: &Selection,
        request: &str,
        journal: &mut RunJournal,
    ) -> Result<Vec<ResolvedProfile>, PipelineError> {
        let components: Vec<(ProfileRole, Profile)> = selection
            .components()
            .into_iter()
            .map(|(role, p)| (role, p.clone()))
            .collect();

        let results: Vec<Resolution> = stream::iter(components)
            .map(|(role, profile)| self.resolve_one(role, profile, request))
            .buffered(self.workers)
            .collect()
            .await;

        let mut out = Vec::with_capacity(results.len());
        for r in results {
            for note in r.notes {
                journal.log(note);
            }
            if let Some((title, details)) = r.step {
                journal.step(title, details);
            }
            if let Some(err) = r.abort {
                return Err(err);
            }
            out.push(r.resolved);
        }
        Ok(out)
    }

    async fn resolve_one(&self, role: ProfileRole, profile: Profile, request: &str) -> Resolution {
        let mut r = Resolution {
            resolved: ResolvedProfile {
                role,
                profile,
                files: Vec::new(),
                enumerated: 0,
            },
            notes: Vec::new(),
            step: None,
            abort: None,
        };
        let title = r.resolved.profile.title.clone();

        let models = match self.catalog.list_models(r.resolved.profile.id).await {
            Ok(m) => m,
            Err(CatalogError::Auth(msg)) => {
                r.abort = Some(CatalogError::Auth(msg).into());
                return r;
            }
            Err(e) => {
                r.notes.push(format!("Listing models for \"{title}\" failed: {e}"));
                return r;
            }
        };
        r.resolved.enumerated = models.len();
        if models.is_empty() {
            r.notes.push(format!("\"{title}\" has no model files; skipping"));
            return r;
        }
        r.notes.push(format!("\"{title}\": {} model file(s) listed", models.len()));

        let step_title = format!("Model filter: {title}");
        match self
            .advisor
            .filter_models(&r.resolved.profile, &models, request, self.max_keep)
            .await
        {
            Ok(picked) => {
                let mut details: Vec<String> = picked
                    .items
                    .iter()
                    .map(|m| {
                        format!(
                            "Keep {} (id {}): {}",
                            m.name,
                            m.id,
                            picked.reason_for(m.id).unwrap_or("no reason given")
                        )
                    })
                    .collect();
                for id in &picked.unknown_ids {
                    r.notes
                        .push(format!("Dropped AI-selected model id {id} for \"{title}\": not listed"));
                    details.push(format!("Ignored unknown id {id}"));
                }
                if picked.items.is_empty() {
                    details.push(format!(
                        "Filter kept nothing; falling back to all {} files",
                        models.len()
                    ));
                    r.notes.push(format!(
                        "AI filter kept no files for \"{title}\"; downloading all {}",
                        models.len()
                    ));
                    r.resolved.files = models;
                } else {
                    r.resolved.files = picked.items;
                    r.resolved.files.truncate(self.max_keep);
                }
                r.step = Some((step_title, details));
            }
            Err(AdvisorError::Transport(e)) => {
                r.step = Some((step_title, vec![format!("Filter failed: {e}")]));
                r.abort = Some(AdvisorError::Transport(e).into());
            }
            Err(e) => {
                r.step = Some((
                    step_title,
                    vec![
                        format!("Filter response unusable: {e}"),
                        format!("Falling back to all {} files", models.len()),
                    ],
                ));
                r.notes.push(format!(
                    "AI filter for \"{title}\" unusable; downloading all {} files",
                    models.len()
                ));
                r.resolved.files = models;
            }
        }
        r
    }
}
