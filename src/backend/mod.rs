//! Boundary to the backend-as-a-service: identity operations and table access.
//!
//! Rows cross this boundary only as the canonical types from
//! [`crate::models`]; each implementation converts its wire/storage shape once.

pub mod local;
pub mod remote;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, Config};
use crate::error::AppResult;
use crate::models::{
    Application, ApplicationStatus, NewApplication, NewProblem, Problem, ProblemStatus, Profile,
    ProfilePatch, Role,
};

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Credentials attached to a table request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth<'a> {
    Anonymous,
    Bearer(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

/// Result of creating an identity. `session` is absent when the provider
/// holds the account until the email address is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

// --- Identity ---

pub trait IdentityProvider {
    fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUp>;
    fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthSession>;
    /// URL the user opens in a browser to sign in with `provider`.
    fn oauth_authorize_url(&self, provider: &str) -> AppResult<String>;
    fn sign_out(&self, access_token: &str) -> AppResult<()>;
    /// Resolves the user behind a stored access token.
    fn get_user(&self, access_token: &str) -> AppResult<AuthUser>;
}

// --- Tables ---

#[derive(Debug, Clone, Copy, Default)]
pub struct ProblemQuery<'a> {
    pub startup_id: Option<&'a str>,
    pub with_startup: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplicationQuery<'a> {
    pub user_id: Option<&'a str>,
    pub problem_id: Option<&'a str>,
    pub problem_ids: Option<&'a [String]>,
    pub with_problem: bool,
    pub with_user: bool,
}

pub trait Store {
    fn insert_profile(&self, auth: Auth, profile: &Profile) -> AppResult<Profile>;
    fn select_profile(&self, auth: Auth, id: &str) -> AppResult<Option<Profile>>;
    fn select_profiles(&self, auth: Auth, role: Option<Role>) -> AppResult<Vec<Profile>>;
    fn update_profile(&self, auth: Auth, id: &str, patch: &ProfilePatch)
    -> AppResult<Option<Profile>>;

    fn insert_problem(&self, auth: Auth, problem: &NewProblem) -> AppResult<Problem>;
    fn select_problem(&self, auth: Auth, id: &str) -> AppResult<Option<Problem>>;
    /// Newest first.
    fn select_problems(&self, auth: Auth, query: &ProblemQuery) -> AppResult<Vec<Problem>>;
    fn update_problem_status(
        &self,
        auth: Auth,
        id: &str,
        status: ProblemStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Problem>>;

    fn insert_application(&self, auth: Auth, application: &NewApplication)
    -> AppResult<Application>;
    fn select_application(&self, auth: Auth, id: &str) -> AppResult<Option<Application>>;
    fn select_applications(
        &self,
        auth: Auth,
        query: &ApplicationQuery,
    ) -> AppResult<Vec<Application>>;
    fn update_application_status(
        &self,
        auth: Auth,
        id: &str,
        status: ApplicationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Application>>;
}

pub trait Backend: IdentityProvider + Store {
    fn name(&self) -> &str;

    /// Creates whatever the backend needs before first use.
    fn init(&self) -> AppResult<()> {
        Ok(())
    }

    /// Fails with a helpful message when `init` has not been run.
    fn ensure_initialized(&self) -> AppResult<()> {
        Ok(())
    }
}

pub fn open_backend(config: &Config) -> AppResult<Box<dyn Backend>> {
    config.validate()?;
    match config.backend {
        BackendKind::Local => {
            let backend = LocalBackend::open(&config.database_path())?;
            Ok(Box::new(backend))
        }
        BackendKind::Remote => {
            let backend = RemoteBackend::from_settings(&config.remote)?;
            Ok(Box::new(backend))
        }
    }
}
