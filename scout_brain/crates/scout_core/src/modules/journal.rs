use scout_protocol::AiStep;
use tracing::info;

/// Per-run accumulation buffers: the human run log and the AiStep audit list.
#[derive(Debug, Default)]
pub struct RunJournal {
    logs: Vec<String>,
    steps: Vec<AiStep>,
}

impl RunJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "scout::run", "{line}");
        self.logs.push(line);
    }

    /// Appends an AiStep numbered after the previous one.
    pub fn step(&mut self, title: impl Into<String>, details: Vec<String>) {
        let step = self.steps.len() as u32 + 1;
        self.steps.push(AiStep {
            step,
            title: title.into(),
            details,
        });
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<AiStep>) {
        (self.logs, self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_numbered_from_one() {
        let mut j = RunJournal::new();
        j.step("Request analysis", vec!["a".to_string()]);
        j.log("searching");
        j.step("Tone selection", Vec::new());
        let (logs, steps) = j.into_parts();
        assert_eq!(logs, vec!["searching".to_string()]);
        assert_eq!(steps.iter().map(|s| s.step).collect::<Vec<_>>(), vec![1, 2]);
    }
}
