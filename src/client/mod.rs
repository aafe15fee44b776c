//! Client-side pieces: the base64url codec, the ceremony round-trip, the
//! HTTP transport, and the UI phase state machine.

pub mod base64url;
pub mod ceremony;
pub mod gateway;
pub mod orchestrator;

pub use ceremony::{CeremonyClient, CeremonyResult, MfaGateway, PlatformAuthenticator};
pub use gateway::HttpMfaGateway;
pub use orchestrator::{AuthEvent, AuthPhase, Effect, Orchestrator};
