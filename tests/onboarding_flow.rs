// End-to-end operator conversations through the router with a scripted provider

use account_steward::{
    db, open_store, AccountProvider, OnboardingState, Reply, Result, Router, SecondFactorResult,
    SignInResult, StewardConfig,
};
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Default)]
struct ScriptedProvider {
    open: AtomicUsize,
}

struct Conn;

#[async_trait]
impl AccountProvider for ScriptedProvider {
    type Connection = Conn;

    async fn connect(&self, _api_id: u64, _api_hash: &str) -> Result<Conn> {
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Conn)
    }

    async fn send_code(&self, _conn: &Conn, _phone: &str) -> Result<String> {
        Ok("code-hash".to_string())
    }

    async fn sign_in(&self, _conn: &Conn, _phone: &str, code: &str) -> SignInResult {
        if code == "11111" {
            SignInResult::Success
        } else {
            SignInResult::SecondFactorRequired
        }
    }

    async fn sign_in_second_factor(&self, _conn: &Conn, password: &str) -> SecondFactorResult {
        if password.is_empty() {
            SecondFactorResult::Failure("PASSWORD_HASH_INVALID".to_string())
        } else {
            SecondFactorResult::Success
        }
    }

    async fn export_session(&self, _conn: &Conn) -> Result<String> {
        Ok("1BQANOTEuMTA4LjU2LjE1MwG7".to_string())
    }

    async fn close(&self, _conn: Conn) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Setup {
    router: Router<ScriptedProvider>,
    provider: Arc<ScriptedProvider>,
    config: StewardConfig,
    _dir: tempfile::TempDir,
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let config = StewardConfig::from_data_dir(dir.path());
    let store = open_store(&config.db_file).unwrap();
    let provider = Arc::new(ScriptedProvider::default());
    let router = Router::new(config.clone(), store, provider.clone());

    Setup {
        router,
        provider,
        config,
        _dir: dir,
    }
}

async fn say(setup: &Setup, operator: i64, text: &str) -> Vec<Reply> {
    setup.router.handle(operator, text).await
}

fn joined(replies: &[Reply]) -> String {
    replies
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_full_onboarding_then_export() {
    let s = setup();

    say(&s, 42, "/add_account").await;
    say(&s, 42, "acc1").await;
    say(&s, 42, "123456").await;
    say(&s, 42, "deadbeef").await;
    let replies = say(&s, 42, "+15550001111").await;
    assert!(joined(&replies).contains("Code sent"));

    let replies = say(&s, 42, "11111").await;
    assert!(joined(&replies).contains("Account saved as `acc1.session`"));
    assert_eq!(s.provider.open.load(Ordering::SeqCst), 0);
    assert_eq!(
        std::fs::read_to_string(s.config.sessions_dir.join("acc1.session")).unwrap(),
        "1BQANOTEuMTA4LjU2LjE1MwG7"
    );

    let sessions = joined(&say(&s, 42, "/sessions").await);
    assert!(sessions.contains("- acc1 (owner_id=42) cooldown=120.0s"));

    // Links are only ingested once the flow is finished
    say(&s, 42, "https://t.me/+AbCd1234").await;
    say(&s, 42, "https://t.me/examplebot").await;
    say(&s, 42, "@somebot").await;

    let replies = say(&s, 42, "/export_assist acc1").await;
    assert_eq!(replies.len(), 1);
    let artifact = replies[0].artifact.as_deref().unwrap();
    let lines: Vec<&str> = artifact.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Recommended delay between joins for acc1: 120 seconds");
    assert_eq!(&lines[1..], &["https://t.me/+AbCd1234", "@somebot"]);
    assert!(s.config.assist_file("acc1").exists());
}

#[tokio::test]
async fn test_flow_input_is_not_ingested_as_link() {
    let s = setup();

    say(&s, 1, "/add_account").await;
    let replies = say(&s, 1, "@not_a_link_but_a_name").await;
    // '@' is not a valid session-name character, so the flow re-prompts
    assert!(joined(&replies).contains("Session name may only use"));

    let conn = db::lock(s.router.store()).unwrap();
    assert_eq!(db::verify_link_count(&conn).unwrap(), 0);
}

#[tokio::test]
async fn test_second_factor_and_cancel() {
    let s = setup();

    say(&s, 7, "/add_account").await;
    for input in ["acc7", "1", "hash", "+1"] {
        say(&s, 7, input).await;
    }
    let replies = say(&s, 7, "99999").await;
    assert!(joined(&replies).contains("two-step verification"));
    assert_eq!(
        s.router.onboarding().snapshot(7).await.unwrap().unwrap().state,
        OnboardingState::AwaitingPassword
    );

    let replies = say(&s, 7, "/cancel").await;
    assert!(joined(&replies).contains("cancelled"));
    assert_eq!(s.provider.open.load(Ordering::SeqCst), 0);
    assert_eq!(joined(&say(&s, 7, "/cancel").await), "Nothing to cancel.");
}

#[tokio::test]
async fn test_report_outcomes() {
    let s = setup();
    {
        let conn = db::lock(s.router.store()).unwrap();
        db::insert_account_ignore(&conn, "acc1", 1, 100.0).unwrap();
    }

    let replies = say(&s, 1, "/report acc1 ok").await;
    assert_eq!(
        joined(&replies),
        "Recorded success. New EMA cooldown for acc1: 102.4s"
    );

    let replies = say(&s, 1, "/report acc1 flood 300").await;
    assert!(joined(&replies).starts_with("Recorded FloodWait 300s"));

    let before = {
        let conn = db::lock(s.router.store()).unwrap();
        db::get_account(&conn, "acc1").unwrap().unwrap().cooldown_estimate
    };
    for bad in ["/report acc1", "/report acc1 flood", "/report acc1 flood x", "/report acc1 maybe"] {
        let text = joined(&say(&s, 1, bad).await);
        assert!(text.contains("Usage") || text.contains("Invalid report format"), "{}", text);
    }
    let after = {
        let conn = db::lock(s.router.store()).unwrap();
        db::get_account(&conn, "acc1").unwrap().unwrap().cooldown_estimate
    };
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_export_without_links_is_explicit() {
    let s = setup();
    let replies = say(&s, 1, "/export_assist acc1").await;
    assert_eq!(joined(&replies), "No pending group links.");
    assert!(replies[0].artifact.is_none());

    let replies = say(&s, 1, "/export_assist").await;
    assert_eq!(joined(&replies), "Usage: /export_assist <session_name>");
}

#[tokio::test]
async fn test_seed_links_and_counts() {
    let s = setup();
    std::fs::write(
        &s.config.links_file,
        "https://t.me/+one\nhttps://t.me/newsbot\n\nhttps://t.me/+one\n",
    )
    .unwrap();

    let replies = say(&s, 1, "/seed_links").await;
    assert!(joined(&replies).starts_with("Seeded 2 links"));

    let counts = joined(&say(&s, 1, "/links").await);
    assert!(counts.contains("- group_invite: 1"));
    assert!(counts.contains("- bot: 1"));
    assert!(counts.contains("- unknown: 0"));
}

#[tokio::test]
async fn test_plain_chatter_is_ignored() {
    let s = setup();
    assert!(say(&s, 1, "hello there").await.is_empty());
}

/// Collects everything the fmt subscriber writes
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = CapturedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_flow_secrets_never_reach_the_log() {
    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .without_time()
        .with_writer(log.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let s = setup();
    for input in ["/add_account", "acc1", "1", "SECRETHASH", "+15550001111", "99999"] {
        say(&s, 5, input).await;
    }
    let replies = say(&s, 5, "/MyS3cretPassw0rd").await;
    assert!(joined(&replies).contains("Account saved as `acc1.session`"));

    let output = log.contents();
    // The subscriber is live: commands and lifecycle events are logged
    assert!(output.contains("/add_account"));
    assert!(output.contains("onboarding completed"));
    // A password that looks like a command is still a password
    for secret in ["SECRETHASH", "+15550001111", "99999", "MyS3cretPassw0rd"] {
        assert!(!output.contains(secret), "{} leaked into the log", secret);
    }
}

#[tokio::test]
async fn test_report_before_onboarding_is_noted() {
    let s = setup();

    let replies = say(&s, 1, "/report ghost ok").await;
    assert!(joined(&replies).contains("New EMA cooldown for ghost: 120.0s"));

    say(&s, 9, "/add_account").await;
    for input in ["ghost", "1", "hash", "+1"] {
        say(&s, 9, input).await;
    }
    let text = joined(&say(&s, 9, "11111").await);
    assert!(text.contains("Account saved as `ghost.session`"));
    assert!(text.contains("already existed and was kept (owner_id=0"));

    // The earlier row wins; the onboarding operator does not take it over
    let sessions = joined(&say(&s, 9, "/sessions").await);
    assert!(sessions.contains("- ghost (owner_id=0)"));
}

#[tokio::test]
async fn test_history_lists_account_events() {
    let s = setup();

    say(&s, 3, "/add_account").await;
    for input in ["acc3", "1", "hash", "+1", "11111"] {
        say(&s, 3, input).await;
    }
    say(&s, 3, "/report acc3 flood 300").await;

    let text = joined(&say(&s, 3, "/history acc3").await);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "History for acc3 (newest first):");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].contains("cooldown_updated by cooldown"));
    assert!(lines[2].contains("account_registered by cooldown"));
    assert!(lines[3].contains("credential_stored by vault"));

    assert_eq!(joined(&say(&s, 3, "/history nobody").await), "No history for nobody.");
    assert_eq!(
        joined(&say(&s, 3, "/history").await),
        "Usage: /history <session_name>"
    );
}

#[tokio::test]
async fn test_chatter_from_many_operators_leaves_no_flow_slots() {
    let s = setup();
    for operator in 0..500 {
        assert!(say(&s, operator, "hello").await.is_empty());
    }
    assert_eq!(s.router.onboarding().active_flows(), 0);
}
