use crate::modules::cleaner::{amp_has_boost, dedupe_queries, is_boost_pedal, sanitize_line, truncate_chars};
use crate::modules::gemini::{extract_json_like, GeminiError, JsonModel};
use crate::modules::system_prompt as prompts;
use scout_protocol::{GearType, ModelFile, Profile, RequestAnalysis};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_QUERIES: usize = 3;
pub const MAX_EXPLANATION_STEPS: usize = 5;
const PROMPT_DESCRIPTION_CHARS: usize = 160;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("AI call failed: {0}")]
    Transport(GeminiError),
    #[error("AI response malformed: {0}")]
    Malformed(String),
    #[error("AI returned an empty decision: {0}")]
    EmptyDecision(String),
}

/// Outcome of an id-referencing decision, already checked against the input set.
#[derive(Debug, Clone)]
pub struct Picked<T> {
    pub items: Vec<T>,
    pub reasons: Vec<(i64, String)>,
    /// Ids the model returned that were not in the input; dropped.
    pub unknown_ids: Vec<i64>,
}

impl<T> Picked<T> {
    pub fn reason_for(&self, id: i64) -> Option<&str> {
        self.reasons
            .iter()
            .find(|(rid, _)| *rid == id)
            .map(|(_, r)| r.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CabNeed {
    pub needs_cabinet: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CabPick {
    pub chosen: Option<Profile>,
    pub reason: String,
    pub unknown_id: Option<i64>,
}

#[derive(Serialize)]
struct CandidateSummary<'a> {
    id: i64,
    title: &'a str,
    description: String,
    gear: GearType,
    platform: &'a str,
    downloads: u64,
    contains_boost_in_chain: bool,
    is_preamp_or_boost_pedal: bool,
}

impl<'a> CandidateSummary<'a> {
    fn of(p: &'a Profile) -> Self {
        Self {
            id: p.id,
            title: &p.title,
            description: truncate_chars(&sanitize_line(&p.description), PROMPT_DESCRIPTION_CHARS),
            gear: p.gear,
            platform: &p.platform,
            downloads: p.downloads_count,
            contains_boost_in_chain: amp_has_boost(p),
            is_preamp_or_boost_pedal: is_boost_pedal(p),
        }
    }
}

#[derive(Serialize)]
struct ModelSummary<'a> {
    id: i64,
    name: &'a str,
    size: &'a str,
}

fn to_json<T: Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Wraps a [`JsonModel`] with per-decision response contracts.
pub struct Advisor<'a> {
    model: &'a dyn JsonModel,
    reprompts: u32,
}

impl<'a> Advisor<'a> {
    pub fn new(model: &'a dyn JsonModel, reprompts: u32) -> Self {
        Self { model, reprompts }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Sends `prompt`; on an unusable answer re-asks up to `reprompts` times naming the problem.
    async fn ask<T>(
        &self,
        prompt: String,
        schema: Value,
        validate: impl Fn(&Map<String, Value>) -> Result<T, String>,
    ) -> Result<T, AdvisorError> {
        let mut problem = String::new();
        for attempt in 0..=self.reprompts {
            let text = if attempt == 0 {
                prompt.clone()
            } else {
                format!("{prompt}{}", prompts::reprompt_suffix(&problem))
            };
            let raw = match self.model.generate_json(&text, Some(&schema)).await {
                Ok(raw) => raw,
                Err(GeminiError::Parse(msg)) => {
                    problem = msg;
                    warn!(attempt, %problem, "unusable AI response");
                    continue;
                }
                Err(e) => return Err(AdvisorError::Transport(e)),
            };
            match parse_object(&raw).and_then(|obj| validate(&obj)) {
                Ok(v) => return Ok(v),
                Err(p) => {
                    warn!(attempt, problem = %p, "AI response rejected");
                    debug!(raw = %truncate_chars(&raw, 400), "rejected AI response");
                    problem = p;
                }
            }
        }
        Err(AdvisorError::Malformed(problem))
    }

    pub async fn analyze_request(&self, request: &str) -> Result<RequestAnalysis, AdvisorError> {
        let prompt = prompts::analyze_prompt(&sanitize_line(request));
        self.ask(prompt, prompts::analysis_schema(), validate_analysis)
            .await
    }

    /// Picks up to `max_count` profiles from `pool`, best first.
    pub async fn select_best(
        &self,
        pool: &[Profile],
        max_count: usize,
        request: &str,
        amps_only: bool,
    ) -> Result<Picked<Profile>, AdvisorError> {
        let summaries: Vec<CandidateSummary> = pool.iter().map(CandidateSummary::of).collect();
        let prompt = prompts::select_prompt(
            &sanitize_line(request),
            &to_json(&summaries),
            max_count,
            amps_only,
        );
        let (ids, reasons) = self
            .ask(prompt, prompts::id_list_schema(), |obj| {
                validate_id_list(obj, Some(max_count))
            })
            .await?;
        if ids.is_empty() {
            return Err(AdvisorError::EmptyDecision(
                "no profiles selected".to_string(),
            ));
        }
        Ok(resolve_ids(ids, reasons, pool, |p| p.id))
    }

    /// Narrows a profile's files. An empty result is legal and means "no preference".
    pub async fn filter_models(
        &self,
        profile: &Profile,
        models: &[ModelFile],
        request: &str,
        max_keep: usize,
    ) -> Result<Picked<ModelFile>, AdvisorError> {
        let summaries: Vec<ModelSummary> = models
            .iter()
            .map(|m| ModelSummary {
                id: m.id,
                name: &m.name,
                size: &m.size,
            })
            .collect();
        let prompt = prompts::filter_prompt(
            &sanitize_line(request),
            &sanitize_line(&profile.title),
            &truncate_chars(&sanitize_line(&profile.description), PROMPT_DESCRIPTION_CHARS),
            profile.gear.as_str(),
            &to_json(&summaries),
            max_keep,
        );
        let (ids, reasons) = self
            .ask(prompt, prompts::id_list_schema(), |obj| {
                validate_id_list(obj, Some(max_keep))
            })
            .await?;
        Ok(resolve_ids(ids, reasons, models, |m| m.id))
    }

    pub async fn assess_needs_cabinet(
        &self,
        request: &str,
        amp: &Profile,
    ) -> Result<CabNeed, AdvisorError> {
        let prompt = prompts::cab_need_prompt(
            &sanitize_line(request),
            &sanitize_line(&amp.title),
            &truncate_chars(&sanitize_line(&amp.description), PROMPT_DESCRIPTION_CHARS),
        );
        self.ask(prompt, prompts::cab_need_schema(), |obj| {
            let needs = obj
                .get("needs_cab")
                .ok_or("missing required field `needs_cab`")?
                .as_bool()
                .ok_or("`needs_cab` must be a boolean")?;
            Ok(CabNeed {
                needs_cabinet: needs,
                reason: require_string(obj, "reason")?,
            })
        })
        .await
    }

    /// Picks one cabinet from `candidates`, or none.
    pub async fn pick_cabinet(
        &self,
        request: &str,
        amp: &Profile,
        candidates: &[Profile],
    ) -> Result<CabPick, AdvisorError> {
        let summaries: Vec<CandidateSummary> =
            candidates.iter().map(CandidateSummary::of).collect();
        let prompt = prompts::cab_pick_prompt(
            &sanitize_line(request),
            &sanitize_line(&amp.title),
            &truncate_chars(&sanitize_line(&amp.description), PROMPT_DESCRIPTION_CHARS),
            &to_json(&summaries),
        );
        let (id, reason) = self
            .ask(prompt, prompts::cab_pick_schema(), |obj| {
                let raw = obj
                    .get("selected_id")
                    .ok_or("missing required field `selected_id`")?;
                let id = if raw.is_null() {
                    None
                } else {
                    Some(as_id(raw).ok_or("`selected_id` must be an integer id or null")?)
                };
                Ok((id, require_string(obj, "reason")?))
            })
            .await?;
        let chosen = id.and_then(|id| candidates.iter().find(|c| c.id == id).cloned());
        let unknown_id = id.filter(|_| chosen.is_none());
        Ok(CabPick {
            chosen,
            reason,
            unknown_id,
        })
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    let json = extract_json_like(raw).ok_or("no JSON object found in response")?;
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err("response is not a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn require_string(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    let v = obj
        .get(key)
        .ok_or_else(|| format!("missing required field `{key}`"))?;
    let s = v
        .as_str()
        .ok_or_else(|| format!("`{key}` must be a string"))?;
    Ok(sanitize_line(s))
}

fn string_array(
    obj: &Map<String, Value>,
    key: &str,
    required: bool,
    max: usize,
) -> Result<Vec<String>, String> {
    let v = match obj.get(key) {
        Some(v) => v,
        None if required => return Err(format!("missing required field `{key}`")),
        None => return Ok(Vec::new()),
    };
    let items = v
        .as_array()
        .ok_or_else(|| format!("`{key}` must be an array of strings"))?;
    let mut strings = Vec::with_capacity(items.len());
    for item in items {
        strings.push(
            item.as_str()
                .ok_or_else(|| format!("`{key}` must contain only strings"))?,
        );
    }
    let out = dedupe_queries(strings, usize::MAX);
    if out.len() > max {
        return Err(format!("`{key}` has {} entries, at most {max} allowed", out.len()));
    }
    Ok(out)
}

fn as_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn validate_analysis(obj: &Map<String, Value>) -> Result<RequestAnalysis, String> {
    let description = require_string(obj, "description")?;
    if description.is_empty() {
        return Err("`description` must not be empty".to_string());
    }
    let gear = match obj.get("gear_type") {
        None => return Err("missing required field `gear_type`".to_string()),
        Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            GearType::from_label(s)
                .ok_or_else(|| format!("`gear_type` {s:?} is not amp, ir, pedal or null"))?,
        ),
        Some(_) => return Err("`gear_type` must be a string or null".to_string()),
    };
    let search_queries = string_array(obj, "search_queries", true, MAX_QUERIES)?;
    if search_queries.is_empty() {
        return Err("`search_queries` must hold at least one query".to_string());
    }
    Ok(RequestAnalysis {
        description,
        gear,
        search_queries,
        fallback_queries: string_array(obj, "fallback_queries", true, MAX_QUERIES)?,
        explanation_steps: string_array(obj, "explanation_steps", false, MAX_EXPLANATION_STEPS)?,
    })
}

type IdList = (Vec<i64>, Vec<(i64, String)>);

fn validate_id_list(obj: &Map<String, Value>, max: Option<usize>) -> Result<IdList, String> {
    let raw = obj
        .get("selected_ids")
        .ok_or("missing required field `selected_ids`")?
        .as_array()
        .ok_or("`selected_ids` must be an array")?;
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for v in raw {
        let id = as_id(v).ok_or_else(|| format!("`selected_ids` entry {v} is not an integer id"))?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    if let Some(max) = max {
        if ids.len() > max {
            return Err(format!("selected {} ids, at most {max} allowed", ids.len()));
        }
    }

    let mut reasons = Vec::new();
    if let Some(list) = obj.get("reasons").and_then(Value::as_array) {
        for r in list {
            let id = r.get("id").and_then(as_id);
            let text = r.get("reason").and_then(Value::as_str);
            if let (Some(id), Some(text)) = (id, text) {
                reasons.push((id, sanitize_line(text)));
            }
        }
    }
    Ok((ids, reasons))
}

fn resolve_ids<T: Clone>(
    ids: Vec<i64>,
    reasons: Vec<(i64, String)>,
    input: &[T],
    id_of: impl Fn(&T) -> i64,
) -> Picked<T> {
    let mut items = Vec::new();
    let mut unknown_ids = Vec::new();
    for id in ids {
        match input.iter().find(|x| id_of(x) == id) {
            Some(x) => items.push(x.clone()),
            None => unknown_ids.push(id),
        }
    }
    Picked {
        items,
        reasons,
        unknown_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, GeminiError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, GeminiError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JsonModel for Scripted {
        fn model_id(&self) -> &str {
            "scripted"
        }
        async fn generate_json(
            &self,
            prompt: &str,
            _schema: Option<&Value>,
        ) -> Result<String, GeminiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn profile(id: i64) -> Profile {
        Profile {
            id,
            title: format!("Tone {id}"),
            description: "desc".to_string(),
            gear: GearType::Amp,
            platform: "nam".to_string(),
            downloads_count: 10,
            author: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn analysis_accepts_fenced_json() {
        let model = Scripted::new(vec![Ok(
            "```json\n{\"description\":\"Warm crunch\",\"gear_type\":\"amp\",\"search_queries\":[\"plexi\",\"Plexi\"],\"fallback_queries\":[]}\n```".to_string(),
        )]);
        let advisor = Advisor::new(&model, 1);
        let a = advisor.analyze_request("warm vintage crunch").await.unwrap();
        assert_eq!(a.gear, Some(GearType::Amp));
        assert_eq!(a.search_queries, vec!["plexi".to_string()]);
        assert!(a.explanation_steps.is_empty());
    }

    #[tokio::test]
    async fn missing_required_field_reprompts_then_fails() {
        let bad = "{\"description\":\"x\",\"search_queries\":[\"a\"],\"fallback_queries\":[]}";
        let model = Scripted::new(vec![Ok(bad.to_string()), Ok(bad.to_string())]);
        let advisor = Advisor::new(&model, 1);
        let err = advisor.analyze_request("x").await.unwrap_err();
        assert!(matches!(err, AdvisorError::Malformed(ref m) if m.contains("gear_type")));
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("previous response was rejected"));
    }

    #[tokio::test]
    async fn reprompt_recovers() {
        let model = Scripted::new(vec![
            Ok("not json at all".to_string()),
            Ok("{\"selected_ids\":[2],\"reasons\":[{\"id\":2,\"reason\":\"best\"}]}".to_string()),
        ]);
        let advisor = Advisor::new(&model, 1);
        let pool = vec![profile(1), profile(2)];
        let picked = advisor.select_best(&pool, 1, "req", false).await.unwrap();
        assert_eq!(picked.items[0].id, 2);
        assert_eq!(picked.reason_for(2), Some("best"));
    }

    #[tokio::test]
    async fn over_bound_selection_is_malformed() {
        let reply = "{\"selected_ids\":[1,2]}".to_string();
        let model = Scripted::new(vec![Ok(reply.clone()), Ok(reply)]);
        let advisor = Advisor::new(&model, 1);
        let pool = vec![profile(1), profile(2)];
        let err = advisor.select_best(&pool, 1, "req", false).await.unwrap_err();
        assert!(matches!(err, AdvisorError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_selection_is_empty_decision() {
        let model = Scripted::new(vec![Ok("{\"selected_ids\":[]}".to_string())]);
        let advisor = Advisor::new(&model, 1);
        let err = advisor
            .select_best(&[profile(1)], 1, "req", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AdvisorError::EmptyDecision(_)));
    }

    #[tokio::test]
    async fn unknown_ids_are_split_out() {
        let model = Scripted::new(vec![Ok("{\"selected_ids\":[\"99\",1,1]}".to_string())]);
        let advisor = Advisor::new(&model, 0);
        let picked = advisor
            .select_best(&[profile(1)], 2, "req", false)
            .await
            .unwrap();
        assert_eq!(picked.items.len(), 1);
        assert_eq!(picked.unknown_ids, vec![99]);
    }

    #[tokio::test]
    async fn transport_errors_are_not_reprompted() {
        let model = Scripted::new(vec![Err(GeminiError::Auth("bad key".to_string()))]);
        let advisor = Advisor::new(&model, 1);
        let err = advisor.analyze_request("x").await.unwrap_err();
        assert!(matches!(err, AdvisorError::Transport(_)));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cab_pick_allows_null() {
        let model = Scripted::new(vec![Ok(
            "{\"selected_id\":null,\"reason\":\"nothing fits\"}".to_string(),
        )]);
        let advisor = Advisor::new(&model, 0);
        let pick = advisor
            .pick_cabinet("req", &profile(1), &[profile(5)])
            .await
            .unwrap();
        assert!(pick.chosen.is_none());
        assert!(pick.unknown_id.is_none());
        assert_eq!(pick.reason, "nothing fits");
    }

    #[test]
    fn gear_type_must_be_known() {
        let obj = parse_object(
            "{\"description\":\"d\",\"gear_type\":\"synth\",\"search_queries\":[\"a\"],\"fallback_queries\":[]}",
        )
        .unwrap();
        assert!(validate_analysis(&obj).unwrap_err().contains("synth"));
    }

    #[test]
    fn too_many_queries_rejected() {
        let obj = parse_object(
            "{\"description\":\"d\",\"gear_type\":null,\"search_queries\":[\"a\",\"b\",\"c\",\"d\"],\"fallback_queries\":[]}",
        )
        .unwrap();
        assert!(validate_analysis(&obj).is_err());
    }
}
