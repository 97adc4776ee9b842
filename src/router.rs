// 🧵 Command Router - operator text in, replies out
// Thin dispatch over onboarding, the link queue, cooldown reports and export.
// Gateways (console, HTTP) own the transport.

use crate::config::StewardConfig;
use crate::cooldown::{CooldownController, Outcome};
use crate::db::{self, Store};
use crate::error::{Result, StewardError};
use crate::export::{self, Artifact};
use crate::onboarding::{OnboardingMachine, OperatorId};
use crate::provider::AccountProvider;
use crate::queue::LinkQueue;
use crate::vault::CredentialVault;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

const HELP: &str = "Welcome - I help you manage multiple user accounts.\n\n\
Commands:\n\
/add_account - add a new user account (API_ID, API_HASH, phone, OTP)\n\
/cancel - abandon the account setup in progress\n\
/sessions - list saved user sessions\n\
/seed_links - seed links from links.txt into DB\n\
/links - show pending link counts\n\
/export_assist <session_name> - prepare join-assist file for that account\n\
/report <session_name> <flood_seconds|ok|fail> - report a manual join outcome (updates cooldown)\n\
/history <session_name> - show the recorded events for an account\n";

const COMMANDS: &[&str] = &[
    "/start", "/help", "/add_account", "/cancel", "/sessions", "/seed_links", "/links",
    "/export_assist", "/report", "/history",
];

/// One outbound message to the operator
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            artifact: None,
            artifact_name: None,
        }
    }

    fn document(caption: String, artifact: &Artifact) -> Self {
        Reply {
            text: caption,
            artifact: Some(artifact.render()),
            artifact_name: Some(artifact.file_name()),
        }
    }
}

pub struct Router<P: AccountProvider> {
    config: StewardConfig,
    store: Store,
    queue: LinkQueue,
    cooldown: CooldownController,
    onboarding: OnboardingMachine<P>,
}

impl<P: AccountProvider> Router<P> {
    pub fn new(config: StewardConfig, store: Store, provider: Arc<P>) -> Self {
        let cooldown = CooldownController::with_alpha(config.default_cooldown, config.ema_alpha);
        let onboarding = OnboardingMachine::new(
            provider,
            store.clone(),
            CredentialVault::new(&config.sessions_dir),
            cooldown,
        );

        Router {
            config,
            store,
            queue: LinkQueue::default(),
            cooldown,
            onboarding,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn onboarding(&self) -> &OnboardingMachine<P> {
        &self.onboarding
    }

    /// Dispatch one inbound message. Every failure becomes a reply.
    pub async fn handle(&self, operator: OperatorId, text: &str) -> Vec<Reply> {
        match self.dispatch(operator, text).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(operator, error = %e, "command failed");
                vec![Reply::text(e.to_string())]
            }
        }
    }

    async fn dispatch(&self, operator: OperatorId, text: &str) -> Result<Vec<Reply>> {
        let trimmed = text.trim();
        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        // Strip a "@botname" suffix some clients append to commands
        let command = command.split('@').next().unwrap_or(command);
        // Anything else may be an API hash, phone, login code or password: never log it
        if COMMANDS.contains(&command) {
            debug!(operator, command, "inbound command");
        } else {
            debug!(operator, len = trimmed.len(), "inbound free text");
        }

        match command {
            "/start" | "/help" => Ok(vec![Reply::text(HELP)]),
            "/add_account" => Ok(texts(self.onboarding.start(operator).await?.messages)),
            "/cancel" => match self.onboarding.cancel(operator).await? {
                Some(reply) => Ok(texts(reply.messages)),
                None => Ok(vec![Reply::text("Nothing to cancel.")]),
            },
            "/sessions" => self.sessions(),
            "/seed_links" => self.seed_links(),
            "/links" => self.links(),
            "/export_assist" => self.export_assist(&args),
            "/report" => self.report(&args),
            "/history" => self.history(&args),
            _ => self.free_text(operator, trimmed).await,
        }
    }

    async fn free_text(&self, operator: OperatorId, text: &str) -> Result<Vec<Reply>> {
        // An active onboarding flow owns the operator's plain messages
        if let Some(reply) = self.onboarding.handle(operator, text).await? {
            return Ok(texts(reply.messages));
        }

        if text.starts_with("http") || text.starts_with('@') {
            let ingested = {
                let conn = db::lock(&self.store)?;
                self.queue.ingest(&conn, text)?
            };
            let note = if ingested.inserted { "Saved" } else { "Already saved" };
            return Ok(vec![Reply::text(format!(
                "{} link as kind={}. Use /export_assist <session_name> to get assist file.",
                note, ingested.kind
            ))]);
        }

        Ok(Vec::new())
    }

    fn sessions(&self) -> Result<Vec<Reply>> {
        let accounts = {
            let conn = db::lock(&self.store)?;
            self.cooldown.list_accounts(&conn)?
        };

        if accounts.is_empty() {
            return Ok(vec![Reply::text("No saved sessions found.")]);
        }

        let mut out = String::from("Saved sessions:\n");
        for account in accounts {
            out.push_str(&format!(
                "- {} (owner_id={}) cooldown={:.1}s\n",
                account.session_name, account.owner_id, account.cooldown_estimate
            ));
        }
        Ok(vec![Reply::text(out)])
    }

    fn seed_links(&self) -> Result<Vec<Reply>> {
        let added = {
            let conn = db::lock(&self.store)?;
            self.queue.seed_from_file(&conn, &self.config.links_file)?
        };

        Ok(vec![Reply::text(format!(
            "Seeded {} links from {} (if exists).",
            added,
            self.config.links_file.display()
        ))])
    }

    fn links(&self) -> Result<Vec<Reply>> {
        let counts = {
            let conn = db::lock(&self.store)?;
            self.queue.count_pending_by_kind(&conn)?
        };

        let mut out = String::from("Pending links:\n");
        for (kind, count) in counts {
            out.push_str(&format!("- {}: {}\n", kind, count));
        }
        Ok(vec![Reply::text(out)])
    }

    fn export_assist(&self, args: &[&str]) -> Result<Vec<Reply>> {
        let Some(session_name) = args.first() else {
            return Err(StewardError::Validation("Usage: /export_assist <session_name>".to_string()));
        };

        let artifact = export::generate(&self.store, &self.queue, &self.cooldown, session_name)?
            .ok_or(StewardError::NothingToExport)?;

        if let Err(e) = artifact.write_to(&self.config.data_dir) {
            warn!(session = %session_name, error = %e, "assist file not written to disk");
        }

        let caption = format!(
            "Assist file for {}. Recommended delay {:.0}s",
            session_name, artifact.recommended_delay
        );
        Ok(vec![Reply::document(caption, &artifact)])
    }

    fn report(&self, args: &[&str]) -> Result<Vec<Reply>> {
        if args.len() < 2 {
            return Err(StewardError::Validation(
                "Usage: /report <session_name> <ok|flood <seconds>|fail>".to_string(),
            ));
        }

        let session_name = args[0];
        let outcome = Outcome::from_tokens(&args[1..])?;

        let estimate = {
            let conn = db::lock(&self.store)?;
            self.cooldown.report(&conn, session_name, outcome)?
        };

        let text = match outcome {
            Outcome::Ok => format!(
                "Recorded success. New EMA cooldown for {}: {:.1}s",
                session_name, estimate
            ),
            Outcome::Fail => format!(
                "Recorded failure. New EMA cooldown for {}: {:.1}s",
                session_name, estimate
            ),
            Outcome::Flood(seconds) => format!(
                "Recorded FloodWait {}s. New EMA cooldown for {}: {:.1}s",
                seconds, session_name, estimate
            ),
        };
        Ok(vec![Reply::text(text)])
    }

    fn history(&self, args: &[&str]) -> Result<Vec<Reply>> {
        let Some(session_name) = args.first() else {
            return Err(StewardError::Validation("Usage: /history <session_name>".to_string()));
        };

        let events = {
            let conn = db::lock(&self.store)?;
            db::get_events_for_entity(&conn, "account", session_name)?
        };

        if events.is_empty() {
            return Ok(vec![Reply::text(format!("No history for {}.", session_name))]);
        }

        let mut out = format!("History for {} (newest first):\n", session_name);
        for event in events {
            out.push_str(&format!(
                "- {} {} by {}: {}\n",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.event_type,
                event.actor,
                event.data
            ));
        }
        Ok(vec![Reply::text(out)])
    }
}

fn texts(messages: Vec<String>) -> Vec<Reply> {
    messages.into_iter().map(Reply::text).collect()
}
