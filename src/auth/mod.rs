//! Kinde authentication
//!
//! Handles:
//! - Encrypted cookie sessions
//! - The OAuth authorization code flow against Kinde
//! - Route guarding and permission checks

pub mod access;
pub mod flow;
pub mod guard;
pub mod kinde;
mod middleware;
pub mod provider;
pub mod route_pattern;
pub mod session;

pub use access::{AccessDecision, AccessPolicy, AccessRule};
pub use flow::{CallbackOutcome, CallbackQuery, FlowCoordinator, LoginParams, TokenSnapshot};
pub use guard::{GuardDecision, RouteGuard};
pub use kinde::KindeClient;
pub use middleware::{CurrentUser, MaybeUser, route_guard};
pub use provider::{IdentityProvider, LoginIntent, ProviderError, TokenClaims, TokenSet};
pub use route_pattern::RoutePattern;
pub use session::{Session, SessionManager};
