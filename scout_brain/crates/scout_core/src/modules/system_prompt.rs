use serde_json::{json, Value};

/// Shared preamble for every advisor call.
pub const SYSTEM_PROMPT: &str = r#"You are an expert guitar tone consultant helping a guitarist pick Neural Amp Modeler captures and cabinet impulse responses from the Tone3000 catalog.

OUTPUT RULES:
- Respond with exactly one JSON object and nothing else (no markdown, no prose).
- Every string value must be a single line (no newline characters inside strings).
- Only reference ids that appear in the input you were given. Never invent ids.
- Do not omit required fields. If you are unsure, still answer with your best judgement."#;

pub const TASK_ANALYZE: &str = "analyze_request";
pub const TASK_SELECT_TONES: &str = "select_tones";
pub const TASK_SELECT_AMPS: &str = "select_amps";
pub const TASK_FILTER_MODELS: &str = "filter_models";
pub const TASK_CAB_NEED: &str = "assess_cab_need";
pub const TASK_CAB_PICK: &str = "pick_cab";

fn header(task: &str) -> String {
    format!("TASK: {task}\n\n{SYSTEM_PROMPT}\n")
}

pub fn analyze_prompt(request: &str) -> String {
    format!(
        r#"{head}
USER REQUEST: "{request}"

Turn the request into practical catalog search terms and explain your reasoning for a beginner guitarist.

FIELDS:
- "description": one-line summary of the intended tone.
- "gear_type": "amp", "ir", "pedal", or null when the request does not imply one.
- "search_queries": 1 to 3 short, realistic queries (artist, amp model, genre words people actually tag captures with).
- "fallback_queries": 0 to 3 broader alternates used only if the first queries find too little.
- "explanation_steps": 3 to 5 one-line steps describing how you interpreted the request.

EXAMPLE:
{{"description":"Warm low-gain crunch","gear_type":"amp","search_queries":["plexi crunch","vintage crunch"],"fallback_queries":["classic rock amp"],"explanation_steps":["Crunch implies edge of breakup","Vintage points to British amps"]}}
"#,
        head = header(TASK_ANALYZE),
    )
}

pub fn select_prompt(request: &str, candidates_json: &str, max_count: usize, amps_only: bool) -> String {
    let (task, noun) = if amps_only {
        (TASK_SELECT_AMPS, "amp profiles")
    } else {
        (TASK_SELECT_TONES, "tones")
    };
    format!(
        r#"{head}
USER REQUEST: "{request}"

CANDIDATES (JSON array):
{candidates_json}

Choose up to {max_count} {noun} that best match the request.

SELECTION CRITERIA:
- Relevance to the requested artist, song, or tone character.
- Popularity and reliability (downloads).
- Avoid redundant boost/pedal picks when a chosen amp profile already has a boost or overdrive in its chain (see "contains_boost_in_chain" and "is_preamp_or_boost_pedal").
- Use only the listed "id" values. Select at least one and at most {max_count}.

FIELDS:
- "selected_ids": array of candidate ids, best first.
- "reasons": array of {{"id": <id>, "reason": "<one line>"}}, one per selected id.
"#,
        head = header(task),
    )
}

pub fn filter_prompt(
    request: &str,
    title: &str,
    description: &str,
    gear: &str,
    models_json: &str,
    max_keep: usize,
) -> String {
    format!(
        r#"{head}
USER REQUEST: "{request}"
PROFILE TITLE: "{title}"
PROFILE DESCRIPTION: "{description}"
PROFILE GEAR: "{gear}"

AVAILABLE MODEL FILES (JSON array):
{models_json}

Keep only the files worth downloading for this request.

CONSTRAINTS:
- If the gear is "amp", skip gain channels or variants that do not fit the request.
- If the gear is "ir", prefer 1 or 2 practical cabinet/mic choices.
- Keep at most {max_keep} files. An empty list means "no preference".

FIELDS:
- "selected_ids": array of model file ids to keep.
- "reasons": array of {{"id": <id>, "reason": "<one line>"}}.
"#,
        head = header(TASK_FILTER_MODELS),
    )
}

pub fn cab_need_prompt(request: &str, amp_title: &str, amp_description: &str) -> String {
    format!(
        r#"{head}
USER REQUEST: "{request}"
AMP TITLE: "{amp_title}"
AMP DESCRIPTION: "{amp_description}"

Decide whether this amp capture needs an external cabinet impulse response to sound complete.
Captures described as "full rig", "cab included" or "with cab" already contain the speaker; "head only", "DI" or "preamp" captures usually need one.
Use natural judgement from the text, not strict keyword matching.

FIELDS:
- "needs_cab": true or false.
- "reason": one line.
"#,
        head = header(TASK_CAB_NEED),
    )
}

pub fn cab_pick_prompt(
    request: &str,
    amp_title: &str,
    amp_description: &str,
    candidates_json: &str,
) -> String {
    format!(
        r#"{head}
USER REQUEST: "{request}"
SELECTED AMP: "{amp_title}" / "{amp_description}"

CABINET / IR CANDIDATES (JSON array):
{candidates_json}

Choose the cabinet impulse response that best complements the amp.

FIELDS:
- "selected_id": the chosen candidate id, or null if none is a reasonable match.
- "reason": one line.
"#,
        head = header(TASK_CAB_PICK),
    )
}

/// Suffix for the single re-ask after an unusable answer.
pub fn reprompt_suffix(problem: &str) -> String {
    format!(
        "\n\nIMPORTANT: Your previous response was rejected ({problem}). Return ONLY valid JSON that matches the required fields. Do not include newlines inside string values."
    )
}

fn reasons_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "INTEGER" },
                "reason": { "type": "STRING" }
            },
            "required": ["id", "reason"]
        }
    })
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "description": { "type": "STRING" },
            "gear_type": { "type": "STRING", "nullable": true },
            "search_queries": { "type": "ARRAY", "items": { "type": "STRING" } },
            "fallback_queries": { "type": "ARRAY", "items": { "type": "STRING" } },
            "explanation_steps": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": ["description", "gear_type", "search_queries", "fallback_queries"]
    })
}

pub fn id_list_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "selected_ids": { "type": "ARRAY", "items": { "type": "INTEGER" } },
            "reasons": reasons_schema()
        },
        "required": ["selected_ids"]
    })
}

pub fn cab_need_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "needs_cab": { "type": "BOOLEAN" },
            "reason": { "type": "STRING" }
        },
        "required": ["needs_cab", "reason"]
    })
}

pub fn cab_pick_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "selected_id": { "type": "INTEGER", "nullable": true },
            "reason": { "type": "STRING" }
        },
        "required": ["selected_id", "reason"]
    })
}

/// Reads the task tag back out of a prompt built here.
pub fn task_of(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("TASK: "))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_prompt_is_tagged() {
        assert_eq!(task_of(&analyze_prompt("x")), Some(TASK_ANALYZE));
        assert_eq!(task_of(&select_prompt("x", "[]", 2, false)), Some(TASK_SELECT_TONES));
        assert_eq!(task_of(&select_prompt("x", "[]", 2, true)), Some(TASK_SELECT_AMPS));
        assert_eq!(
            task_of(&filter_prompt("x", "t", "d", "amp", "[]", 5)),
            Some(TASK_FILTER_MODELS)
        );
        assert_eq!(task_of(&cab_need_prompt("x", "a", "d")), Some(TASK_CAB_NEED));
        assert_eq!(task_of(&cab_pick_prompt("x", "a", "d", "[]")), Some(TASK_CAB_PICK));
        assert_eq!(task_of("no tag"), None);
    }

    #[test]
    fn select_prompt_states_bound() {
        let p = select_prompt("djent", "[{\"id\":1}]", 3, false);
        assert!(p.contains("at most 3"));
        assert!(p.contains("{\"id\":1}"));
    }
}
