use scout_protocol::{GearType, Profile};
use std::collections::HashSet;

const AMP_BOOST_MARKERS: &[&str] = &[
    "boost",
    "boosted",
    "overdrive",
    "od ",
    " od",
    "tubescreamer",
    "tube screamer",
    "ts808",
    "ts-808",
    "ts9",
    "ts-9",
    "sd1",
    "sd-1",
    "klon",
    "treble booster",
    "rangemaster",
];

const BOOST_PEDAL_MARKERS: &[&str] = &[
    "preamp",
    "boost",
    "overdrive",
    "tubescreamer",
    "tube screamer",
    "ts808",
    "ts-808",
    "ts9",
    "ts-9",
    "sd-1",
    "sd1",
    "klon",
];

fn haystack(p: &Profile) -> String {
    format!(" {} {} ", p.title, p.description).to_ascii_lowercase()
}

/// An amp capture whose chain already includes a boost or overdrive in front.
pub fn amp_has_boost(p: &Profile) -> bool {
    if p.gear != GearType::Amp {
        return false;
    }
    let text = haystack(p);
    AMP_BOOST_MARKERS.iter().any(|m| text.contains(m))
}

pub fn is_boost_pedal(p: &Profile) -> bool {
    if p.gear != GearType::Pedal {
        return false;
    }
    let text = haystack(p);
    BOOST_PEDAL_MARKERS.iter().any(|m| text.contains(m))
}

/// Drops boost/preamp pedals from a selection that already holds a boosted amp.
/// Returns `(kept, dropped)`, both in selection order.
pub fn drop_redundant_boosts(selected: Vec<Profile>) -> (Vec<Profile>, Vec<Profile>) {
    if !selected.iter().any(amp_has_boost) {
        return (selected, Vec::new());
    }
    selected.into_iter().partition(|p| !is_boost_pedal(p))
}

const CAB_INCLUDED_MARKERS: &[&str] = &[
    "cab included",
    "with cab",
    "miked cab",
    "mic'd cab",
    "cab sim",
    "cabinet sim",
    "merged profile",
    "full rig",
];

const HEAD_ONLY_MARKERS: &[&str] = &[
    "head only",
    "no cab",
    "without cab",
    "preamp only",
    "amp head",
];

/// Keyword guess at whether an amp capture still needs a cabinet.
/// Unclear captures get a cabinet.
pub fn fallback_needs_cabinet(amp: &Profile) -> (bool, &'static str) {
    let text = haystack(amp);
    if CAB_INCLUDED_MARKERS.iter().any(|m| text.contains(m)) {
        return (false, "fallback: capture already includes a cab section");
    }
    if HEAD_ONLY_MARKERS.iter().any(|m| text.contains(m)) {
        return (true, "fallback: capture looks head/preamp only");
    }
    (true, "fallback: cab need unclear, pairing a cab to complete the rig")
}

/// Collapses free text to a single trimmed line.
pub fn sanitize_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ").trim().to_string()
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Case-insensitive dedupe of non-blank queries, first occurrence wins.
pub fn dedupe_queries<I, S>(queries: I, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for q in queries {
        let q = sanitize_line(q.as_ref());
        if q.is_empty() || !seen.insert(q.to_lowercase()) {
            continue;
        }
        out.push(q);
        if out.len() >= max {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: i64, gear: GearType, title: &str) -> Profile {
        Profile {
            id,
            title: title.to_string(),
            description: String::new(),
            gear,
            platform: "nam".to_string(),
            downloads_count: 0,
            author: None,
            url: None,
        }
    }

    #[test]
    fn boosted_amp_drops_boost_pedals_only() {
        let selected = vec![
            p(1, GearType::Amp, "5150 boosted with TS808"),
            p(2, GearType::Pedal, "Klon clone"),
            p(3, GearType::Pedal, "Big Muff fuzz"),
        ];
        let (kept, dropped) = drop_redundant_boosts(selected);
        assert_eq!(kept.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(dropped.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn clean_amp_keeps_pedals() {
        let selected = vec![
            p(1, GearType::Amp, "Twin Reverb clean"),
            p(2, GearType::Pedal, "Tube Screamer"),
        ];
        let (kept, dropped) = drop_redundant_boosts(selected);
        assert_eq!(kept.len(), 2);
        assert!(dropped.is_empty());
    }

    #[test]
    fn od_marker_needs_word_boundary_space() {
        assert!(amp_has_boost(&p(1, GearType::Amp, "JCM800 OD")));
        assert!(!amp_has_boost(&p(2, GearType::Amp, "Modern high gain")));
        assert!(!is_boost_pedal(&p(3, GearType::Amp, "Klon")));
    }

    #[test]
    fn sanitize_and_truncate() {
        assert_eq!(sanitize_line("  warm\r\nvintage\ncrunch "), "warm  vintage crunch");
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn dedupe_is_case_insensitive_and_bounded() {
        let out = dedupe_queries(["Plexi", "plexi ", "", "JCM800", "AC30"], 2);
        assert_eq!(out, vec!["Plexi".to_string(), "JCM800".to_string()]);
    }

    #[test]
    fn cab_need_fallback_reads_capture_text() {
        let (needs, reason) = fallback_needs_cabinet(&p(1, GearType::Amp, "Full Rig Plexi"));
        assert!(!needs);
        assert!(reason.contains("includes"));

        let mut head = p(2, GearType::Amp, "JCM800");
        head.description = "Captured head only, bring your own IR".to_string();
        assert!(fallback_needs_cabinet(&head).0);

        let (needs, reason) = fallback_needs_cabinet(&p(3, GearType::Amp, "Mystery Amp"));
        assert!(needs);
        assert!(reason.contains("unclear"));
    }
}
