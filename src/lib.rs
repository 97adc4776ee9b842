// Account Steward - Core Library
// Exposes all modules for use in the console CLI, the HTTP gateway, and tests

pub mod config;
pub mod error;
pub mod db;
pub mod classifier;     // Link Classifier - rules as data
pub mod queue;          // Queue Store - deduplicated link ingestion
pub mod cooldown;       // Cooldown Controller - EMA delay learning
pub mod provider;       // Remote Account Provider seam + HTTP auth-bridge
pub mod vault;          // Credential persistence
pub mod onboarding;     // Onboarding State Machine
pub mod export;         // Export Generator
pub mod router;         // Command Router

// Re-export commonly used types
pub use config::{StewardConfig, DEFAULT_COOLDOWN, EMA_ALPHA};
pub use error::{Result, StewardError};
pub use db::{
    Account, LinkEntry, LinkStatus, Event, Store,
    open_store, open_memory_store, setup_database,
    get_all_accounts, get_events_for_entity,
};
pub use classifier::{classify, LinkClassifier, LinkKind, LinkRule};
pub use queue::{Ingested, LinkQueue};
pub use cooldown::{CooldownController, Outcome};
pub use provider::{
    AccountProvider, HttpAccountProvider, SignInResult, SecondFactorResult,
};
pub use vault::{CredentialVault, StoredAt};
pub use onboarding::{FlowSnapshot, OnboardingMachine, OnboardingState, OperatorId, StepReply};
pub use export::{generate as generate_export, Artifact};
pub use router::{Reply, Router};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
