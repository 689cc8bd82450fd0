use crate::router::{self, Rule};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    ListJobs,
    JobStatus(String),
    WatchJob(String),
    CancelJob(String),
    Classify(String),
    Condition(String),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::ListJobs => "list_jobs",
            Command::JobStatus(_) => "job_status",
            Command::WatchJob(_) => "watch_job",
            Command::CancelJob(_) => "cancel_job",
            Command::Classify(_) => "classify",
            Command::Condition(_) => "condition",
        }
    }
}

struct CommandRule {
    priority: i32,
    pattern: Regex,
    build: fn(&Captures<'_>) -> Option<Command>,
}

impl Rule for CommandRule {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn matches(&self, input: &str) -> bool {
        self.pattern.is_match(input)
    }
}

fn capture(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn command_rule(
    priority: i32,
    pattern: &str,
    build: fn(&Captures<'_>) -> Option<Command>,
) -> CommandRule {
    CommandRule {
        priority,
        pattern: Regex::new(pattern).expect("command pattern"),
        build,
    }
}

static COMMANDS: Lazy<Vec<CommandRule>> = Lazy::new(|| {
    vec![
        command_rule(10, r"(?i)^(help|commands|\?)$", |_| Some(Command::Help)),
        command_rule(
            20,
            r"(?i)^((list|show)\s+(active\s+)?jobs|active\s+jobs|jobs)$",
            |_| Some(Command::ListJobs),
        ),
        command_rule(
            30,
            r"(?i)^(status|progress)(\s+of)?(\s+job)?\s+(?P<id>[\w-]+)$",
            |caps| capture(caps, "id").map(Command::JobStatus),
        ),
        command_rule(
            30,
            r"(?i)^(watch|track|follow)(\s+job)?\s+(?P<id>[\w-]+)$",
            |caps| capture(caps, "id").map(Command::WatchJob),
        ),
        command_rule(
            40,
            r"(?i)^(cancel|stop)(\s+job)?\s+(?P<id>[\w-]+)$",
            |caps| capture(caps, "id").map(Command::CancelJob),
        ),
        command_rule(
            30,
            r"(?i)^(classify|categorize|category\s+for)\s+(?P<text>.+)$",
            |caps| capture(caps, "text").map(Command::Classify),
        ),
        command_rule(
            35,
            r"(?i)^condition(\s+for)?\s+(?P<text>.+)$",
            |caps| capture(caps, "text").map(Command::Condition),
        ),
    ]
});

/// Matches a chat message against the command table. `None` means the
/// message is free-form and belongs to the assistant.
pub fn parse_command(message: &str) -> Option<Command> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return None;
    }
    let rule = router::select(&COMMANDS, trimmed)?;
    let caps = rule.pattern.captures(trimmed)?;
    (rule.build)(&caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_command_keeps_job_id_case() {
        assert_eq!(
            parse_command("status AbC-123"),
            Some(Command::JobStatus("AbC-123".into()))
        );
        assert_eq!(
            parse_command("Progress of job j_9"),
            Some(Command::JobStatus("j_9".into()))
        );
    }

    #[test]
    fn job_commands() {
        assert_eq!(parse_command("list jobs"), Some(Command::ListJobs));
        assert_eq!(parse_command("Active jobs"), Some(Command::ListJobs));
        assert_eq!(parse_command("watch job 42"), Some(Command::WatchJob("42".into())));
        assert_eq!(parse_command("cancel 42"), Some(Command::CancelJob("42".into())));
    }

    #[test]
    fn classification_commands_capture_text() {
        assert_eq!(
            parse_command("category for Canon EF 50mm lens"),
            Some(Command::Classify("Canon EF 50mm lens".into()))
        );
        assert_eq!(
            parse_command("condition for used, shutter sticks"),
            Some(Command::Condition("used, shutter sticks".into()))
        );
    }

    #[test]
    fn free_form_questions_are_not_commands() {
        assert_eq!(parse_command("how should I price a Leica M3?"), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("status"), None);
    }

    #[test]
    fn help_variants() {
        assert_eq!(parse_command("HELP"), Some(Command::Help));
        assert_eq!(parse_command("?"), Some(Command::Help));
    }
}
