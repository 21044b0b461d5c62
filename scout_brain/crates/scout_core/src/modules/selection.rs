use crate::modules::advisor::{Advisor, Picked};
use crate::modules::catalog::{Catalog, CatalogError};
use crate::modules::cleaner::{drop_redundant_boosts, fallback_needs_cabinet};
use crate::modules::journal::RunJournal;
use crate::modules::pipeline::PipelineError;
use crate::modules::pool::{cab_queries, CandidatePool, PoolBuilder};
use scout_protocol::{GearType, Profile, ProfileId, RequestAnalysis, RigPairing, Selection};
use std::collections::HashSet;
use tracing::warn;

pub struct SelectionEngine<'a> {
    catalog: &'a dyn Catalog,
    advisor: &'a Advisor<'a>,
    search_page_size: usize,
    max_results: usize,
}

fn describe(n: usize, p: &Profile, reason: Option<&str>) -> String {
    format!(
        "#{n} {} (id {}, {}, {} downloads): {}",
        p.title,
        p.id,
        p.gear,
        p.downloads_count,
        reason.unwrap_or("no reason given")
    )
}

impl<'a> SelectionEngine<'a> {
    /// `max_results` bounds every candidate pool this engine builds, including cab pools.
    pub fn new(
        catalog: &'a dyn Catalog,
        advisor: &'a Advisor<'a>,
        search_page_size: usize,
        max_results: usize,
    ) -> Self {
        Self {
            catalog,
            advisor,
            search_page_size,
            max_results,
        }
    }

    /// Asks for the best `max` profiles and keeps only ids present in `pool`.
    async fn pick_from_pool(
        &self,
        pool: &CandidatePool,
        max: usize,
        request: &str,
        amps_only: bool,
        journal: &mut RunJournal,
    ) -> Result<Picked<Profile>, PipelineError> {
        if pool.is_empty() {
            return Err(PipelineError::NoCandidates(
                "the catalog returned no candidates for any query".to_string(),
            ));
        }
        let title = if amps_only { "Amp selection" } else { "Tone selection" };
        journal.log(format!(
            "Asking {} to choose up to {max} of {} candidates",
            self.advisor.model_id(),
            pool.len()
        ));

        let mut picked = match self
            .advisor
            .select_best(pool.profiles(), max, request, amps_only)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                journal.step(title, vec![format!("Selection failed: {e}")]);
                return Err(e.into());
            }
        };

        for id in &picked.unknown_ids {
            warn!(id, "AI referenced a profile outside the pool");
            journal.log(format!("Dropped AI-selected id {id}: not in the candidate pool"));
        }
        picked.items.retain(|p| pool.contains(p.id));
        picked.items.truncate(max);

        let mut details: Vec<String> = picked
            .items
            .iter()
            .enumerate()
            .map(|(i, p)| describe(i + 1, p, picked.reason_for(p.id)))
            .collect();
        if !picked.unknown_ids.is_empty() {
            details.push(format!("Ignored unknown ids: {:?}", picked.unknown_ids));
        }
        journal.step(title, details);

        if picked.items.is_empty() {
            return Err(PipelineError::NoCandidates(
                "none of the AI-selected profiles exist in the candidate pool".to_string(),
            ));
        }
        Ok(picked)
    }

    pub async fn select_profiles(
        &self,
        pool: &CandidatePool,
        max_tones: usize,
        request: &str,
        journal: &mut RunJournal,
    ) -> Result<Selection, PipelineError> {
        let picked = self
            .pick_from_pool(pool, max_tones, request, false, journal)
            .await?;
        let (kept, dropped) = drop_redundant_boosts(picked.items);
        for p in &dropped {
            journal.log(format!(
                "Dropped \"{}\": boost pedal is redundant with a boosted amp already selected",
                p.title
            ));
        }
        if kept.is_empty() {
            return Err(PipelineError::NoCandidates(
                "selection became empty after removing redundant boosts".to_string(),
            ));
        }
        journal.log(format!("Selected {} profile(s)", kept.len()));
        Ok(Selection::Profiles(kept))
    }

    /// Rig mode: choose amps, then pair each with an optional cabinet.
    pub async fn select_rigs(
        &self,
        amp_pool: &CandidatePool,
        max_tones: usize,
        request: &str,
        analysis: &RequestAnalysis,
        journal: &mut RunJournal,
    ) -> Result<Selection, PipelineError> {
        let picked = self
            .pick_from_pool(amp_pool, max_tones, request, true, journal)
            .await?;

        let mut used_cabs: HashSet<ProfileId> = HashSet::new();
        let mut rigs = Vec::with_capacity(picked.items.len());
        for amp in &picked.items {
            let amp_reason = picked
                .reason_for(amp.id)
                .unwrap_or("no reason given")
                .to_string();
            let rig = self
                .pair_cabinet(amp, amp_reason, request, analysis, &mut used_cabs, journal)
                .await?;
            rigs.push(rig);
        }
        journal.log(format!("Assembled {} rig(s)", rigs.len()));
        Ok(Selection::Rigs(rigs))
    }

    async fn pair_cabinet(
        &self,
        amp: &Profile,
        amp_reason: String,
        request: &str,
        analysis: &RequestAnalysis,
        used_cabs: &mut HashSet<ProfileId>,
        journal: &mut RunJournal,
    ) -> Result<RigPairing, PipelineError> {
        let mut rig = RigPairing {
            amp: amp.clone(),
            amp_reason,
            needs_cabinet: false,
            cabinet_decision: String::new(),
            cabinet: None,
            cabinet_reason: String::new(),
        };

        let need = self.advisor.assess_needs_cabinet(request, amp).await;
        let step_title = format!("Cab need: {}", amp.title);
        match need {
            Ok(n) => {
                journal.step(
                    step_title,
                    vec![
                        format!("Needs cab: {}", if n.needs_cabinet { "yes" } else { "no" }),
                        format!("Reason: {}", n.reason),
                    ],
                );
                rig.needs_cabinet = n.needs_cabinet;
                rig.cabinet_decision = n.reason;
            }
            Err(e) => {
                let (needs, reason) = fallback_needs_cabinet(amp);
                journal.step(
                    step_title,
                    vec![
                        format!("Assessment failed: {e}"),
                        format!("Needs cab: {}", if needs { "yes" } else { "no" }),
                        format!("Reason: {reason}"),
                    ],
                );
                journal.log(format!(
                    "Cab assessment for \"{}\" failed; using keyword fallback",
                    amp.title
                ));
                rig.needs_cabinet = needs;
                rig.cabinet_decision = reason.to_string();
            }
        }
        if !rig.needs_cabinet {
            return Ok(rig);
        }

        let (primary, fallback) = cab_queries(analysis, request, &amp.title);
        let built = PoolBuilder::new(self.catalog, self.max_results, self.search_page_size)
            .gear(Some(GearType::Ir))
            .build(&primary, &fallback)
            .await;
        let cab_pool = match built {
            Ok(outcome) => outcome.pool,
            Err(CatalogError::Auth(msg)) => return Err(CatalogError::Auth(msg).into()),
            Err(e) => {
                journal.log(format!("Cab search for \"{}\" failed: {e}", amp.title));
                rig.cabinet_reason = format!("cab search failed: {e}");
                return Ok(rig);
            }
        };

        let mut candidates: Vec<Profile> = cab_pool
            .profiles()
            .iter()
            .filter(|p| !used_cabs.contains(&p.id))
            .cloned()
            .collect();
        if candidates.is_empty() {
            candidates = cab_pool.profiles().to_vec();
        }
        if candidates.is_empty() {
            journal.log(format!("No cab/IR candidates found for \"{}\"", amp.title));
            rig.cabinet_reason = "no cabinet candidates found".to_string();
            return Ok(rig);
        }

        let step_title = format!("Cab selection: {}", amp.title);
        match self.advisor.pick_cabinet(request, amp, &candidates).await {
            Ok(pick) => {
                let mut details = Vec::new();
                if let Some(id) = pick.unknown_id {
                    journal.log(format!("Dropped AI-selected cab id {id}: not among candidates"));
                    details.push(format!("Ignored unknown id {id}"));
                }
                match pick.chosen {
                    Some(cab) => {
                        details.push(format!("Cab: {} (id {})", cab.title, cab.id));
                        used_cabs.insert(cab.id);
                        rig.cabinet = Some(cab);
                    }
                    None => details.push("No cab chosen".to_string()),
                }
                details.push(format!("Reason: {}", pick.reason));
                rig.cabinet_reason = pick.reason;
                journal.step(step_title, details);
            }
            Err(e) => {
                journal.step(step_title, vec![format!("Cab pick failed: {e}")]);
                rig.cabinet_reason = format!("cab pick failed: {e}");
            }
        }
        Ok(rig)
    }
}

