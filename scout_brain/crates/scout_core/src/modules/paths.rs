use scout_protocol::{ModelFile, Profile};
use std::collections::HashSet;
use url::Url;

const MAX_SLUG_TITLE_CHARS: usize = 50;
const NAM_EXT: &str = "nam";

/// Directory name for a profile: sanitized title plus the catalog id.
pub fn profile_slug(profile: &Profile) -> String {
    let cleaned: String = profile
        .title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = cleaned
        .trim()
        .chars()
        .take(MAX_SLUG_TITLE_CHARS)
        .collect();
    let title = trimmed.trim();
    let title = if title.is_empty() { "tone" } else { title };
    format!("{title}_{}", profile.id)
}

/// Strips path separators, reserved and control characters.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "model".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extension of `name` if it looks like a real one (1-5 ascii alphanumerics).
pub fn recognizable_extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then_some(ext)
}

fn extension_from_location(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    let last = url.path_segments()?.next_back()?.to_string();
    recognizable_extension(&last).map(|e| e.to_ascii_lowercase())
}

/// Local file name for `model`: `.nam` for nam-family profiles, else the source extension.
pub fn target_file_name(profile: &Profile, model: &ModelFile) -> String {
    let base = safe_filename(&model.name);
    if profile.is_nam_family() {
        let has_nam = recognizable_extension(&base)
            .is_some_and(|e| e.eq_ignore_ascii_case(NAM_EXT));
        return if has_nam {
            base
        } else {
            format!("{base}.{NAM_EXT}")
        };
    }
    if recognizable_extension(&base).is_some() {
        return base;
    }
    match extension_from_location(&model.url) {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

/// Makes `name` unique within `taken` by suffixing ` (2)`, ` (3)`, ...
pub fn disambiguate(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_lowercase()) {
        return name;
    }
    let (stem, ext) = match recognizable_extension(&name) {
        Some(ext) => (&name[..name.len() - ext.len() - 1], Some(ext)),
        None => (name.as_str(), None),
    };
    for n in 2.. {
        let candidate = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_protocol::GearType;

    fn profile(title: &str, platform: &str) -> Profile {
        Profile {
            id: 321,
            title: title.to_string(),
            description: String::new(),
            gear: GearType::Amp,
            platform: platform.to_string(),
            downloads_count: 0,
            author: None,
            url: None,
        }
    }

    fn model(name: &str, url: &str) -> ModelFile {
        ModelFile {
            id: 1,
            name: name.to_string(),
            url: url.to_string(),
            size: String::new(),
            platform: None,
        }
    }

    #[test]
    fn slug_sanitizes_and_bounds_title() {
        assert_eq!(profile_slug(&profile("Marshall JCM800 / Crunch!", "nam")), "Marshall JCM800 _ Crunch__321");
        assert_eq!(profile_slug(&profile("  ***  ", "nam")), "____321");
        assert_eq!(profile_slug(&profile("", "nam")), "tone_321");
        let long = "x".repeat(80);
        assert_eq!(profile_slug(&profile(&long, "nam")).len(), 50 + 4);
    }

    #[test]
    fn filename_strips_reserved_chars() {
        assert_eq!(safe_filename("../evil:name?.nam"), "_evil_name_.nam");
        assert_eq!(safe_filename(" .. "), "model");
    }

    #[test]
    fn nam_profiles_get_nam_extension() {
        let p = profile("Plexi", "nam");
        assert_eq!(target_file_name(&p, &model("Crunch", "https://cdn/x")), "Crunch.nam");
        assert_eq!(target_file_name(&p, &model("Crunch.NAM", "https://cdn/x")), "Crunch.NAM");
        assert_eq!(target_file_name(&p, &model("Gain 2.5", "https://cdn/x")), "Gain 2.5.nam");
    }

    #[test]
    fn other_platforms_keep_source_extension() {
        let p = profile("Greenback", "ir");
        assert_eq!(target_file_name(&p, &model("V30 SM57.wav", "https://cdn/a")), "V30 SM57.wav");
        assert_eq!(
            target_file_name(&p, &model("V30 SM57", "https://cdn.example.com/files/abc.WAV?sig=1")),
            "V30 SM57.wav"
        );
        assert_eq!(target_file_name(&p, &model("V30 SM57", "https://cdn/files/abc")), "V30 SM57");
    }

    #[test]
    fn duplicate_names_are_suffixed() {
        let mut taken = HashSet::new();
        assert_eq!(disambiguate("a.nam".to_string(), &mut taken), "a.nam");
        assert_eq!(disambiguate("A.nam".to_string(), &mut taken), "A (2).nam");
        assert_eq!(disambiguate("a.nam".to_string(), &mut taken), "a (3).nam");
    }
}
