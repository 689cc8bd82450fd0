//! Operator chat: fixed commands first, the assistant for everything else.

pub mod commands;
pub mod history;

pub use commands::{Command, parse_command};
pub use history::{ChatEntry, ChatHistory};

use crate::{
    category::Classifier,
    condition::match_condition,
    llm::{LlmClient, LlmMessage, Role},
    pipeline::{JobMonitor, PipelineJob, progress},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You help a small camera retailer run their Shopify store and eBay \
listings. Answer briefly and concretely. If the operator asks about a pipeline job, remind them \
they can type `status <job id>`.";

const ASSISTANT_UNAVAILABLE: &str =
    "The assistant is unavailable right now. Type `help` to see the commands that still work.";

const HELP_TEXT: &str = "Commands:\n\
- `list jobs`: pipeline jobs currently tracked\n\
- `status <job>`: step-by-step progress of a job\n\
- `watch <job>`: start tracking a job\n\
- `cancel <job>`: ask the backend to stop a job\n\
- `category for <product type>`: eBay category lookup\n\
- `condition <text>`: eBay condition lookup\n\
Anything else goes to the assistant.";

// Turns of history sent to the assistant along with the new message.
const ASSISTANT_CONTEXT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Command,
    Assistant,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'static str>,
    pub source: ReplySource,
}

#[derive(Clone)]
pub struct ChatService {
    history: ChatHistory,
    llm: Arc<LlmClient>,
    monitor: JobMonitor,
    classifier: Arc<Classifier>,
}

impl ChatService {
    pub fn new(
        history: ChatHistory,
        llm: Arc<LlmClient>,
        monitor: JobMonitor,
        classifier: Arc<Classifier>,
    ) -> Self {
        Self {
            history,
            llm,
            monitor,
            classifier,
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub async fn handle(&self, session_id: &str, message: &str) -> ChatReply {
        let command = parse_command(message);
        let (reply, source) = match &command {
            Some(command) => {
                info!(target = "storeops.chat", session_id, command = command.name(), "chat command");
                (self.run_command(command).await, ReplySource::Command)
            }
            None => self.ask_assistant(session_id, message).await,
        };

        let exchange = vec![
            ChatEntry::new(Role::User, message.trim()),
            ChatEntry::new(Role::Assistant, reply.clone()),
        ];
        if let Err(err) = self.history.append(session_id, exchange).await {
            warn!(target = "storeops.chat", session_id, error = %err, "chat history not saved");
        }

        ChatReply {
            session_id: session_id.to_string(),
            reply,
            command: command.as_ref().map(Command::name),
            source,
        }
    }

    async fn run_command(&self, command: &Command) -> String {
        match command {
            Command::Help => HELP_TEXT.to_string(),
            Command::ListJobs => {
                let jobs = self.monitor.jobs().await;
                if jobs.is_empty() {
                    "No pipeline jobs are being tracked.".to_string()
                } else {
                    jobs.iter().map(summary_line).collect::<Vec<_>>().join("\n")
                }
            }
            Command::JobStatus(job_id) => match self.monitor.job(job_id).await {
                Some(job) => describe_job(&job),
                None => format!("I'm not tracking job {job_id}. Type `watch {job_id}` to follow it."),
            },
            Command::WatchJob(job_id) => {
                if self.monitor.watch(job_id).await {
                    format!("Watching job {job_id}.")
                } else {
                    format!("Already watching job {job_id}.")
                }
            }
            Command::CancelJob(job_id) => match self.monitor.cancel(job_id).await {
                Ok(()) => format!("Cancel requested for job {job_id}."),
                Err(err) => format!("Could not cancel job {job_id}: {err}"),
            },
            Command::Classify(text) => {
                let category = self.classifier.classify(Some(text));
                format!("\"{text}\" maps to {} ({}).", category.name, category.id)
            }
            Command::Condition(text) => {
                let condition = match_condition(Some(text));
                format!(
                    "\"{text}\" maps to {} ({}, {}).",
                    condition.label, condition.id, condition.inventory_condition
                )
            }
        }
    }

    async fn ask_assistant(&self, session_id: &str, message: &str) -> (String, ReplySource) {
        let past = match self.history.load(session_id).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target = "storeops.chat", session_id, error = %err, "chat history unavailable");
                Vec::new()
            }
        };
        let skip = past.len().saturating_sub(ASSISTANT_CONTEXT);
        let mut messages: Vec<LlmMessage> = past
            .into_iter()
            .skip(skip)
            .map(|entry| LlmMessage {
                role: entry.role,
                content: entry.content,
            })
            .collect();
        messages.push(LlmMessage {
            role: Role::User,
            content: message.trim().to_string(),
        });

        match self.llm.reply(SYSTEM_PROMPT, &messages).await {
            Ok(text) => (text, ReplySource::Assistant),
            Err(err) => {
                warn!(target = "storeops.chat", session_id, error = %err, "assistant fallback");
                (ASSISTANT_UNAVAILABLE.to_string(), ReplySource::Fallback)
            }
        }
    }
}

fn summary_line(job: &PipelineJob) -> String {
    let title = job.shopify_title.as_deref().unwrap_or(&job.job_id);
    format!(
        "{title} [{}]: {:?}, {}%",
        job.job_id,
        job.status,
        progress::progress_percent(job)
    )
}

fn describe_job(job: &PipelineJob) -> String {
    let mut lines = vec![summary_line(job)];
    for step in &job.steps {
        let mut line = format!("- {}: {:?}", step.name.as_str(), step.status);
        if let Some(p) = step.progress {
            line.push_str(&format!(" ({}/{})", p.current, p.total));
        }
        if let Some(result) = &step.result {
            line.push_str(&format!(", {result}"));
        }
        lines.push(line);
    }
    if let Some(eta) = progress::eta(job) {
        lines.push(eta.label());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::HttpTimeouts,
        llm::LlmConfig,
        pipeline::{EventStream, JobEventSource, PipelineApi, Retention},
        store::MemoryStore,
    };
    use futures::stream;

    struct Silent;

    impl JobEventSource for Silent {
        fn subscribe(&self, _job_id: &str) -> EventStream {
            Box::pin(stream::pending())
        }
    }

    fn service() -> ChatService {
        let (monitor, _) = JobMonitor::spawn(
            Arc::new(Silent),
            PipelineApi::new("http://127.0.0.1:9", HttpTimeouts::default()),
            Retention::default(),
        );
        let llm = LlmClient::new(
            LlmConfig {
                gateway_url: String::new(),
                api_key: None,
                function_name: "operator_assistant".into(),
                model: None,
            },
            HttpTimeouts::default(),
        );
        ChatService::new(
            ChatHistory::new(Arc::new(MemoryStore::new()), 50),
            Arc::new(llm),
            monitor,
            Arc::new(Classifier::builtin().clone()),
        )
    }

    #[tokio::test]
    async fn status_command_is_dispatched_before_assistant() {
        let chat = service();
        chat.monitor
            .ingest_raw(r#"{"jobId":"abc123","step":"fetch_product","status":"done","shopifyTitle":"Canon AE-1"}"#)
            .await;
        let reply = chat.handle("s1", "status abc123").await;
        assert_eq!(reply.source, ReplySource::Command);
        assert_eq!(reply.command, Some("job_status"));
        assert!(reply.reply.starts_with("Canon AE-1 [abc123]"));
        assert!(reply.reply.contains("- fetch_product: Done"));
    }

    #[tokio::test]
    async fn classify_command_uses_rule_table() {
        let chat = service();
        let reply = chat.handle("s1", "classify camera point & shoot cameras").await;
        assert!(reply.reply.contains("Point & Shoot Digital Cameras"));
    }

    #[tokio::test]
    async fn unreachable_assistant_falls_back() {
        let chat = service();
        let reply = chat.handle("s1", "what sells best in winter?").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.reply, ASSISTANT_UNAVAILABLE);
        assert!(reply.command.is_none());
    }

    #[tokio::test]
    async fn every_exchange_is_recorded() {
        let chat = service();
        chat.handle("s1", "help").await;
        chat.handle("s1", "list jobs").await;
        let entries = chat.history().load("s1").await.expect("history");
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].content, "help");
        assert_eq!(entries[3].content, "No pipeline jobs are being tracked.");
    }
}
