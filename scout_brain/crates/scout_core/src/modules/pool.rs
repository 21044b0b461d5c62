use crate::modules::catalog::{Catalog, CatalogError};
use crate::modules::cleaner::dedupe_queries;
use scout_protocol::{GearType, Profile, ProfileId, RequestAnalysis};
use std::collections::HashSet;
use tracing::{info, warn};

/// Deduplicated, insertion-ordered, size-bounded set of candidate profiles.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    profiles: Vec<Profile>,
    ids: HashSet<ProfileId>,
    max: usize,
}

impl CandidatePool {
    pub fn new(max: usize) -> Self {
        Self {
            profiles: Vec::new(),
            ids: HashSet::new(),
            max,
        }
    }

    /// First occurrence wins. Returns false for duplicates or when full.
    pub fn push(&mut self, profile: Profile) -> bool {
        if self.is_full() || self.ids.contains(&profile.id) {
            return false;
        }
        self.ids.insert(profile.id);
        self.profiles.push(profile);
        true
    }

    pub fn is_full(&self) -> bool {
        self.profiles.len() >= self.max
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, id: ProfileId) -> bool {
        self.ids.contains(&id)
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }
}

#[derive(Debug)]
pub struct PoolOutcome {
    pub pool: CandidatePool,
    pub notes: Vec<String>,
}

pub struct PoolBuilder<'a> {
    catalog: &'a dyn Catalog,
    max_results: usize,
    page_size: usize,
    gear: Option<GearType>,
    keep: Option<fn(&Profile) -> bool>,
}

impl<'a> PoolBuilder<'a> {
    pub fn new(catalog: &'a dyn Catalog, max_results: usize, page_size: usize) -> Self {
        Self {
            catalog,
            max_results,
            page_size,
            gear: None,
            keep: None,
        }
    }

    pub fn gear(mut self, gear: Option<GearType>) -> Self {
        self.gear = gear;
        self
    }

    /// Only admit profiles matching `keep`.
    pub fn only(mut self, keep: fn(&Profile) -> bool) -> Self {
        self.keep = Some(keep);
        self
    }

    /// Runs primary queries, then fallbacks only while the pool is short.
    pub async fn build(
        &self,
        primary: &[String],
        fallback: &[String],
    ) -> Result<PoolOutcome, CatalogError> {
        let mut pool = CandidatePool::new(self.max_results);
        let mut notes = Vec::new();
        let mut attempted = 0usize;
        let mut last_failure: Option<String> = None;
        let mut failed = 0usize;

        let limit = self.max_results.min(self.page_size).max(1);

        for (is_fallback, queries) in [(false, primary), (true, fallback)] {
            if is_fallback {
                if pool.is_full() || queries.is_empty() {
                    break;
                }
                notes.push(format!(
                    "Pool has {} of {} candidates; trying fallback queries",
                    pool.len(),
                    self.max_results
                ));
            }
            for query in queries {
                if pool.is_full() {
                    break;
                }
                attempted += 1;
                match self.catalog.search(query, self.gear, limit).await {
                    Ok(hits) => {
                        let found = hits.len();
                        let mut added = 0usize;
                        for p in hits {
                            if self.keep.is_some_and(|keep| !keep(&p)) {
                                continue;
                            }
                            if pool.push(p) {
                                added += 1;
                            }
                        }
                        info!(query = %query, found, added, "pool search");
                        notes.push(format!(
                            "Search \"{query}\": {found} found, {added} new (pool {})",
                            pool.len()
                        ));
                    }
                    Err(CatalogError::Auth(msg)) => return Err(CatalogError::Auth(msg)),
                    Err(e) => {
                        warn!(query = %query, error = %e, "search failed, skipping query");
                        notes.push(format!("Search \"{query}\" failed: {e}"));
                        failed += 1;
                        last_failure = Some(e.to_string());
                    }
                }
            }
        }

        if attempted > 0 && failed == attempted && pool.is_empty() {
            return Err(CatalogError::Unavailable(format!(
                "all {attempted} searches failed; last error: {}",
                last_failure.unwrap_or_default()
            )));
        }

        Ok(PoolOutcome { pool, notes })
    }
}

const RIG_QUERY_LIMIT: usize = 6;
const CAB_QUERY_LIMIT: usize = 8;

/// Primary and fallback queries for the amp pool of a rig run.
pub fn amp_queries(analysis: &RequestAnalysis, request: &str) -> (Vec<String>, Vec<String>) {
    let primary = dedupe_queries(
        analysis
            .search_queries
            .iter()
            .map(String::as_str)
            .chain([request]),
        RIG_QUERY_LIMIT,
    );
    let amp_fallback = format!("{request} amp");
    let fallback = dedupe_queries(
        analysis
            .fallback_queries
            .iter()
            .map(String::as_str)
            .chain([amp_fallback.as_str()]),
        RIG_QUERY_LIMIT,
    );
    (primary, fallback)
}

/// Primary and fallback queries for the cabinet pool of one amp.
pub fn cab_queries(
    analysis: &RequestAnalysis,
    request: &str,
    amp_title: &str,
) -> (Vec<String>, Vec<String>) {
    let lead = [
        format!("{request} cab ir"),
        format!("{amp_title} ir"),
        format!("{amp_title} cab"),
    ];
    let primary = dedupe_queries(
        lead.iter()
            .map(String::as_str)
            .chain(analysis.search_queries.iter().map(String::as_str)),
        CAB_QUERY_LIMIT,
    );
    let tail = [format!("{request} guitar cabinet"), "guitar cab ir".to_string()];
    let fallback = dedupe_queries(
        analysis
            .fallback_queries
            .iter()
            .map(String::as_str)
            .chain(tail.iter().map(String::as_str)),
        CAB_QUERY_LIMIT,
    );
    (primary, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::catalog::ByteStream;
    use async_trait::async_trait;
    use scout_protocol::ModelFile;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeCatalog {
        hits: HashMap<String, Result<Vec<i64>, &'static str>>,
        calls: Mutex<Vec<String>>,
    }

    fn profile(id: i64) -> Profile {
        Profile {
            id,
            title: format!("Tone {id}"),
            description: String::new(),
            gear: if id >= 100 { GearType::Ir } else { GearType::Amp },
            platform: "nam".to_string(),
            downloads_count: 0,
            author: None,
            url: None,
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn search(
            &self,
            query: &str,
            _gear: Option<GearType>,
            _limit: usize,
        ) -> Result<Vec<Profile>, CatalogError> {
            self.calls.lock().unwrap().push(query.to_string());
            match self.hits.get(query) {
                Some(Ok(ids)) => Ok(ids.iter().copied().map(profile).collect()),
                Some(Err("auth")) => Err(CatalogError::Auth("401".to_string())),
                Some(Err(msg)) => Err(CatalogError::Unavailable(msg.to_string())),
                None => Ok(Vec::new()),
            }
        }
        async fn list_models(&self, _id: ProfileId) -> Result<Vec<ModelFile>, CatalogError> {
            Ok(Vec::new())
        }
        async fn fetch_file(&self, _location: &str) -> Result<ByteStream, CatalogError> {
            Err(CatalogError::Unavailable("unused".to_string()))
        }
    }

    fn catalog(entries: Vec<(&str, Result<Vec<i64>, &'static str>)>) -> FakeCatalog {
        FakeCatalog {
            hits: entries.into_iter().map(|(q, r)| (q.to_string(), r)).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn qs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn dedupes_and_keeps_discovery_order() {
        let cat = catalog(vec![("a", Ok(vec![3, 1, 2])), ("b", Ok(vec![2, 4]))]);
        let out = PoolBuilder::new(&cat, 10, 25)
            .build(&qs(&["a", "b"]), &qs(&["c"]))
            .await
            .unwrap();
        let ids: Vec<i64> = out.pool.profiles().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 1, 2, 4]);
        assert_eq!(cat.calls.lock().unwrap().last().map(String::as_str), Some("c"));
        assert!(out.notes.iter().any(|n| n.contains("fallback")));
    }

    #[tokio::test]
    async fn fallbacks_skipped_when_full() {
        let cat = catalog(vec![("a", Ok(vec![1, 2, 3, 4, 5, 6]))]);
        let out = PoolBuilder::new(&cat, 5, 25)
            .build(&qs(&["a", "b"]), &qs(&["c"]))
            .await
            .unwrap();
        assert_eq!(out.pool.len(), 5);
        assert_eq!(*cat.calls.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_query_is_skipped() {
        let cat = catalog(vec![("a", Err("timeout")), ("b", Ok(vec![7]))]);
        let out = PoolBuilder::new(&cat, 5, 25)
            .build(&qs(&["a", "b"]), &[])
            .await
            .unwrap();
        assert_eq!(out.pool.len(), 1);
        assert!(out.notes.iter().any(|n| n.contains("failed")));
    }

    #[tokio::test]
    async fn every_query_failing_is_unavailable() {
        let cat = catalog(vec![("a", Err("down")), ("b", Err("down"))]);
        let err = PoolBuilder::new(&cat, 5, 25)
            .build(&qs(&["a"]), &qs(&["b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable(_)));
    }

    #[tokio::test]
    async fn auth_aborts_immediately() {
        let cat = catalog(vec![("a", Err("auth")), ("b", Ok(vec![1]))]);
        let err = PoolBuilder::new(&cat, 5, 25)
            .build(&qs(&["a", "b"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Auth(_)));
        assert_eq!(cat.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_an_error() {
        let cat = catalog(vec![]);
        let out = PoolBuilder::new(&cat, 5, 25)
            .build(&qs(&["a"]), &qs(&["b"]))
            .await
            .unwrap();
        assert!(out.pool.is_empty());
    }

    #[test]
    fn rig_query_plans() {
        let analysis = RequestAnalysis {
            description: "d".to_string(),
            gear: None,
            search_queries: vec!["plexi crunch".to_string(), "Vintage Crunch".to_string()],
            fallback_queries: vec!["classic rock".to_string()],
            explanation_steps: Vec::new(),
        };
        let (p, f) = amp_queries(&analysis, "vintage crunch");
        assert_eq!(p, qs(&["plexi crunch", "Vintage Crunch"]));
        assert_eq!(f, qs(&["classic rock", "vintage crunch amp"]));

        let (p, f) = cab_queries(&analysis, "vintage crunch", "JCM800");
        assert_eq!(&p[..3], &qs(&["vintage crunch cab ir", "JCM800 ir", "JCM800 cab"])[..]);
        assert_eq!(p.len(), 5);
        assert_eq!(f.last().map(String::as_str), Some("guitar cab ir"));
    }

    #[tokio::test]
    async fn keep_filter_applies() {
        let cat = catalog(vec![("a", Ok(vec![1, 100, 2]))]);
        let out = PoolBuilder::new(&cat, 5, 25)
            .only(|p| p.gear == GearType::Amp)
            .build(&qs(&["a"]), &[])
            .await
            .unwrap();
        assert_eq!(out.pool.len(), 2);
    }
}
