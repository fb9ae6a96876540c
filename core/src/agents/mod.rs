pub mod adapters;
pub mod messages;
pub mod orchestrator;
pub mod providers;
pub mod quota;

pub use messages::{CallOptions, ChatMessage, ImageInput, Role};
pub use orchestrator::{
    Attempt, AttemptOutcome, FallbackOrchestrator, OrderingPolicy, PromptRequest, Resolution,
    ResolveContext, NO_OPTIONS_SENTINEL,
};
pub use providers::{CallSite, ChatProvider, FailureReason, ProviderKind, ProviderOutcome};
pub use quota::{Clock, QuotaTracker, SystemClock};
