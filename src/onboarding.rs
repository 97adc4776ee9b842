// 🧭 Onboarding State Machine - conversational account creation
//
// AwaitingSessionName → AwaitingApiId → AwaitingApiHash → AwaitingPhone
//   → AwaitingCode → {AwaitingPassword →} Completed
// Aborted is reachable from every state. Local validation failures re-prompt
// in place; every provider failure ends the attempt.

use crate::cooldown::CooldownController;
use crate::db::{self, Store};
use crate::error::{Result, StewardError};
use crate::provider::{AccountProvider, SecondFactorResult, SignInResult};
use crate::vault::{validate_session_name, CredentialVault, StoredAt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub type OperatorId = i64;

// ============================================================================
// STATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnboardingState {
    AwaitingSessionName,
    AwaitingApiId,
    AwaitingApiHash,
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
    Completed,
    Aborted,
}

impl OnboardingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OnboardingState::Completed | OnboardingState::Aborted)
    }
}

/// Everything collected so far, minus the live connection.
/// This is the part of a flow that could outlive the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub state: OnboardingState,
    pub session_name: Option<String>,
    pub api_id: Option<u64>,
    pub api_hash: Option<String>,
    pub phone: Option<String>,
}

impl FlowSnapshot {
    fn fresh() -> Self {
        FlowSnapshot {
            state: OnboardingState::AwaitingSessionName,
            session_name: None,
            api_id: None,
            api_hash: None,
            phone: None,
        }
    }
}

struct Flow<C> {
    data: FlowSnapshot,
    connection: Option<C>,
}

/// Result of feeding one message into a flow
#[derive(Debug, Clone, PartialEq)]
pub struct StepReply {
    /// State after the step (`Completed`/`Aborted` mean the flow is gone)
    pub state: OnboardingState,
    pub messages: Vec<String>,
}

impl StepReply {
    fn stay(state: OnboardingState, message: impl Into<String>) -> Self {
        StepReply {
            state,
            messages: vec![message.into()],
        }
    }
}

// ============================================================================
// FLOW TABLE
// ============================================================================

type Slot<C> = Arc<tokio::sync::Mutex<Option<Flow<C>>>>;

/// Per-operator flow slots. One async lock per operator keeps a single
/// operator's steps strictly sequential while other operators proceed.
pub struct FlowTable<C> {
    slots: Mutex<HashMap<OperatorId, Slot<C>>>,
}

impl<C> FlowTable<C> {
    pub fn new() -> Self {
        FlowTable {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<OperatorId, Slot<C>>>> {
        self.slots
            .lock()
            .map_err(|e| StewardError::LockPoisoned(e.to_string()))
    }

    /// Slot for an operator, created on demand. Only flow creation uses this.
    fn slot(&self, operator: OperatorId) -> Result<Slot<C>> {
        Ok(self.slots()?.entry(operator).or_default().clone())
    }

    /// Slot for an operator, if one exists
    fn existing(&self, operator: OperatorId) -> Result<Option<Slot<C>>> {
        Ok(self.slots()?.get(&operator).cloned())
    }

    /// Drop an emptied slot from the table. Call with the slot's lock held
    /// and its flow gone. A slot someone else has cloned stays; that holder
    /// releases it after its own turn.
    fn release(&self, operator: OperatorId, slot: &Slot<C>) {
        let Ok(mut slots) = self.slots() else {
            return;
        };
        let ours = slots
            .get(&operator)
            .map_or(false, |current| Arc::ptr_eq(current, slot));
        // One reference in the table, one held by the caller
        if ours && Arc::strong_count(slot) == 2 {
            slots.remove(&operator);
        }
    }

    /// Number of operator slots currently held
    pub fn len(&self) -> usize {
        self.slots().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Default for FlowTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MACHINE
// ============================================================================

pub struct OnboardingMachine<P: AccountProvider> {
    provider: Arc<P>,
    store: Store,
    vault: CredentialVault,
    cooldown: CooldownController,
    flows: FlowTable<P::Connection>,
}

impl<P: AccountProvider> OnboardingMachine<P> {
    pub fn new(
        provider: Arc<P>,
        store: Store,
        vault: CredentialVault,
        cooldown: CooldownController,
    ) -> Self {
        OnboardingMachine {
            provider,
            store,
            vault,
            cooldown,
            flows: FlowTable::new(),
        }
    }

    /// Begin a fresh flow. An existing flow for the operator is discarded
    /// and its connection closed (close-on-overwrite).
    pub async fn start(&self, operator: OperatorId) -> Result<StepReply> {
        let slot = self.flows.slot(operator)?;
        let mut guard = slot.lock().await;

        if let Some(old) = guard.take() {
            info!(operator, state = ?old.data.state, "replacing unfinished onboarding flow");
            if let Some(conn) = old.connection {
                self.provider.close(conn).await;
            }
        }

        *guard = Some(Flow {
            data: FlowSnapshot::fresh(),
            connection: None,
        });

        Ok(StepReply::stay(
            OnboardingState::AwaitingSessionName,
            "Choose a short session name (e.g. acc1). This will save sessions/<name>.session",
        ))
    }

    /// Operator cancellation. Returns None when nothing was in progress.
    pub async fn cancel(&self, operator: OperatorId) -> Result<Option<StepReply>> {
        let Some(slot) = self.flows.existing(operator)? else {
            return Ok(None);
        };
        let mut guard = slot.lock().await;
        let taken = guard.take();
        self.flows.release(operator, &slot);

        match taken {
            Some(flow) => {
                if let Some(conn) = flow.connection {
                    self.provider.close(conn).await;
                }
                info!(operator, "onboarding cancelled");
                Ok(Some(StepReply::stay(
                    OnboardingState::Aborted,
                    "Account setup cancelled. Start again with /add_account.",
                )))
            }
            None => Ok(None),
        }
    }

    /// Snapshot of the operator's flow, if any
    pub async fn snapshot(&self, operator: OperatorId) -> Result<Option<FlowSnapshot>> {
        let Some(slot) = self.flows.existing(operator)? else {
            return Ok(None);
        };
        let guard = slot.lock().await;
        let snapshot = guard.as_ref().map(|flow| flow.data.clone());
        if snapshot.is_none() {
            self.flows.release(operator, &slot);
        }
        Ok(snapshot)
    }

    /// Operators with a flow slot in the table
    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    /// Re-create a flow from a snapshot. Live connections never survive,
    /// so a restored flow past `AwaitingPhone` cannot sign in.
    pub async fn restore(&self, operator: OperatorId, data: FlowSnapshot) -> Result<()> {
        let slot = self.flows.slot(operator)?;
        let mut guard = slot.lock().await;

        if let Some(old) = guard.take() {
            if let Some(conn) = old.connection {
                self.provider.close(conn).await;
            }
        }
        if data.state.is_terminal() {
            self.flows.release(operator, &slot);
        } else {
            *guard = Some(Flow {
                data,
                connection: None,
            });
        }
        Ok(())
    }

    /// Feed one operator message into their flow.
    /// Returns None when the operator has no flow in progress.
    pub async fn handle(&self, operator: OperatorId, text: &str) -> Result<Option<StepReply>> {
        let Some(slot) = self.flows.existing(operator)? else {
            return Ok(None);
        };
        let mut guard = slot.lock().await;

        let Some(mut flow) = guard.take() else {
            self.flows.release(operator, &slot);
            return Ok(None);
        };

        let reply = self.step(operator, &mut flow, text.trim()).await;

        if !reply.state.is_terminal() {
            flow.data.state = reply.state;
            *guard = Some(flow);
        } else {
            if let Some(conn) = flow.connection.take() {
                // Terminal steps close their own connection; this only catches leftovers
                self.provider.close(conn).await;
            }
            self.flows.release(operator, &slot);
        }

        Ok(Some(reply))
    }

    async fn step(&self, operator: OperatorId, flow: &mut Flow<P::Connection>, input: &str) -> StepReply {
        use OnboardingState::*;

        match flow.data.state {
            AwaitingSessionName => match validate_session_name(input) {
                Ok(name) => {
                    flow.data.session_name = Some(name);
                    StepReply::stay(
                        AwaitingApiId,
                        "Enter API_ID (numeric) for this user (you get this from https://my.telegram.org).",
                    )
                }
                Err(e) => StepReply::stay(AwaitingSessionName, e.to_string()),
            },

            AwaitingApiId => {
                let parsed = if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
                    input.parse::<u64>().ok()
                } else {
                    None
                };
                match parsed {
                    Some(api_id) => {
                        flow.data.api_id = Some(api_id);
                        StepReply::stay(AwaitingApiHash, "Enter API_HASH (string).")
                    }
                    None => StepReply::stay(AwaitingApiId, "API_ID must be numeric."),
                }
            }

            AwaitingApiHash => {
                if input.is_empty() {
                    return StepReply::stay(AwaitingApiHash, "API_HASH cannot be empty.");
                }
                flow.data.api_hash = Some(input.to_string());
                StepReply::stay(
                    AwaitingPhone,
                    "Enter phone number with country code (e.g. +91XXXXXXXXXX).",
                )
            }

            AwaitingPhone => self.request_code(operator, flow, input).await,

            AwaitingCode => self.submit_code(operator, flow, input).await,

            AwaitingPassword => self.submit_password(operator, flow, input).await,

            // Terminal flows are never stored
            Completed | Aborted => StepReply::stay(Aborted, StewardError::NoPendingFlow.to_string()),
        }
    }

    async fn request_code(&self, operator: OperatorId, flow: &mut Flow<P::Connection>, phone: &str) -> StepReply {
        let mut messages = vec!["Sending code... please wait.".to_string()];

        let (Some(api_id), Some(api_hash)) = (flow.data.api_id, flow.data.api_hash.clone()) else {
            messages.push(StewardError::NoPendingFlow.to_string());
            return StepReply { state: OnboardingState::Aborted, messages };
        };

        let conn = match self.provider.connect(api_id, &api_hash).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(operator, error = %e, "provider connect failed");
                messages.push(format!("Failed to send code: {}", e));
                return StepReply { state: OnboardingState::Aborted, messages };
            }
        };

        if let Err(e) = self.provider.send_code(&conn, phone).await {
            warn!(operator, error = %e, "send code failed");
            self.provider.close(conn).await;
            messages.push(format!("Failed to send code: {}", e));
            return StepReply { state: OnboardingState::Aborted, messages };
        }

        flow.data.phone = Some(phone.to_string());
        flow.connection = Some(conn);
        info!(operator, "verification code requested");

        messages.push("Code sent to your number. Please send me the code you received (just digits).".to_string());
        StepReply { state: OnboardingState::AwaitingCode, messages }
    }

    async fn submit_code(&self, operator: OperatorId, flow: &mut Flow<P::Connection>, code: &str) -> StepReply {
        let Some(conn) = flow.connection.take() else {
            warn!(operator, "code received without a live connection");
            return StepReply::stay(OnboardingState::Aborted, StewardError::NoPendingFlow.to_string());
        };
        let phone = flow.data.phone.clone().unwrap_or_default();

        match self.provider.sign_in(&conn, &phone, code).await {
            SignInResult::SecondFactorRequired => {
                flow.connection = Some(conn);
                StepReply::stay(
                    OnboardingState::AwaitingPassword,
                    "This account has two-step verification (password). Send the password now.",
                )
            }
            SignInResult::Success => self.persist(operator, &flow.data, conn).await,
            SignInResult::Failure(reason) => {
                warn!(operator, %reason, "sign-in failed");
                self.provider.close(conn).await;
                StepReply::stay(OnboardingState::Aborted, format!("Sign-in failed: {}", reason))
            }
        }
    }

    async fn submit_password(&self, operator: OperatorId, flow: &mut Flow<P::Connection>, password: &str) -> StepReply {
        let Some(conn) = flow.connection.take() else {
            warn!(operator, "password received without a live connection");
            return StepReply::stay(OnboardingState::Aborted, StewardError::NoPendingFlow.to_string());
        };

        match self.provider.sign_in_second_factor(&conn, password).await {
            SecondFactorResult::Success => self.persist(operator, &flow.data, conn).await,
            SecondFactorResult::Failure(reason) => {
                warn!(operator, %reason, "password sign-in failed");
                self.provider.close(conn).await;
                StepReply::stay(OnboardingState::Aborted, format!("Password sign-in failed: {}", reason))
            }
        }
    }

    /// Export, write, close, register. The connection is always closed.
    async fn persist(&self, operator: OperatorId, data: &FlowSnapshot, conn: P::Connection) -> StepReply {
        let session_name = data.session_name.clone().unwrap_or_default();

        let exported = self.provider.export_session(&conn).await;
        self.provider.close(conn).await;

        let blob = match exported {
            Ok(blob) => blob,
            Err(e) => {
                let err = StewardError::CredentialNotSaved {
                    session_name: session_name.clone(),
                    reason: e.to_string(),
                };
                warn!(operator, session = %session_name, error = %err, "session export failed");
                return StepReply::stay(OnboardingState::Aborted, err.to_string());
            }
        };

        let stored = match self.vault.store(&self.store, &session_name, &blob) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(operator, session = %session_name, error = %e, "credential not stored");
                return StepReply::stay(OnboardingState::Aborted, e.to_string());
            }
        };

        let registered = db::lock(&self.store)
            .and_then(|conn| self.cooldown.register(&conn, &session_name, operator));

        let mut messages = vec![match &stored {
            StoredAt::File(_) => format!(
                "Account saved as `{}.session`.\nUse /sessions to list accounts.",
                session_name
            ),
            StoredAt::Database => format!(
                "Account `{}` saved (session file unavailable, kept in the database).\nUse /sessions to list accounts.",
                session_name
            ),
        }];

        match registered {
            Ok(true) => {}
            Ok(false) => {
                // e.g. a /report for this name arrived before anyone onboarded it
                let existing = db::lock(&self.store)
                    .and_then(|conn| db::get_account(&conn, &session_name))
                    .ok()
                    .flatten();
                warn!(operator, session = %session_name, "account row already existed, kept as is");
                messages.push(match existing {
                    Some(account) => format!(
                        "Note: a cooldown record for `{}` already existed and was kept (owner_id={}, cooldown={:.1}s).",
                        session_name, account.owner_id, account.cooldown_estimate
                    ),
                    None => format!(
                        "Note: a cooldown record for `{}` already existed and was kept.",
                        session_name
                    ),
                });
            }
            Err(e) => {
                warn!(operator, session = %session_name, error = %e, "account registration failed");
                messages.push(format!(
                    "Warning: credential saved but cooldown tracking was not set up: {}",
                    e
                ));
            }
        }

        info!(operator, session = %session_name, "onboarding completed");
        StepReply {
            state: OnboardingState::Completed,
            messages,
        }
    }
}
