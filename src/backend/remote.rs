use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    ApplicationQuery, Auth, AuthSession, AuthUser, Backend, IdentityProvider, ProblemQuery,
    SignUp, Store,
};
use crate::config::RemoteSettings;
use crate::error::{AppError, AppResult, IdentityError};
use crate::models::{
    Application, ApplicationStatus, NewApplication, NewProblem, Problem, ProblemStatus, Profile,
    ProfilePatch, Role,
};

const PROBLEM_SELECT: &str = "*,startup:profiles(*),applications(count)";
const PROBLEM_JOIN: &str = "problem:problems(*,startup:profiles(*))";
const USER_JOIN: &str = "user:profiles(*)";

/// Hosted backend: GoTrue-style identity under `/auth/v1` and
/// PostgREST-style tables under `/rest/v1`.
pub struct RemoteBackend {
    base_url: String,
    anon_key: String,
    client: Client,
}

impl RemoteBackend {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client,
        })
    }

    pub fn from_settings(settings: &RemoteSettings) -> AppResult<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| AppError::Config("SOLVERHUB_URL is not set".into()))?;
        let key = settings
            .anon_key
            .as_deref()
            .ok_or_else(|| AppError::Config("SOLVERHUB_ANON_KEY is not set".into()))?;
        Self::new(url, key, Duration::from_secs(settings.timeout_secs))
    }

    fn request(&self, method: Method, url: String, auth: Auth) -> RequestBuilder {
        let bearer = match auth {
            Auth::Bearer(token) => token,
            Auth::Anonymous => self.anon_key.as_str(),
        };
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    fn auth(&self, method: Method, path: &str, auth: Auth) -> RequestBuilder {
        self.request(method, format!("{}/auth/v1/{}", self.base_url, path), auth)
    }

    fn table(&self, method: Method, table: &str, auth: Auth) -> RequestBuilder {
        self.request(method, format!("{}/rest/v1/{}", self.base_url, table), auth)
    }

    fn execute(&self, request: RequestBuilder) -> AppResult<(u16, String)> {
        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        debug!(status, "Remote response");
        Ok((status, body))
    }

    fn identity_call<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<T> {
        let (status, body) = self.execute(request)?;
        if !is_success(status) {
            return Err(identity_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<Vec<T>> {
        let (status, body) = self.execute(request)?;
        if !is_success(status) {
            let message = error_message(&body);
            warn!(status, %message, "Table request failed");
            return Err(AppError::Remote { status, message });
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn problems(&self, auth: Auth, filters: &[(&str, String)]) -> AppResult<Vec<Problem>> {
        let mut query = vec![
            ("select", PROBLEM_SELECT.to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        query.extend(filters.iter().cloned());
        let rows: Vec<ProblemRow> = self.rows(self.table(Method::GET, "problems", auth).query(&query))?;
        Ok(rows.into_iter().map(ProblemRow::into_problem).collect())
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

/// Pulls the human-readable part out of a GoTrue or PostgREST error body.
fn error_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string())
}

fn identity_error(status: u16, body: &str) -> AppError {
    let message = error_message(body);
    let lower = message.to_lowercase();
    let err = if lower.contains("invalid login credentials") {
        IdentityError::InvalidCredentials
    } else if lower.contains("already registered") {
        IdentityError::AlreadyRegistered
    } else if lower.contains("email not confirmed") {
        IdentityError::EmailNotConfirmed
    } else if status == 401 || status == 403 {
        IdentityError::InvalidSession
    } else if status >= 500 {
        return AppError::Remote { status, message };
    } else {
        IdentityError::Other(message)
    };
    err.into()
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

/// Problem row with the embedded `applications(count)` aggregate.
#[derive(Debug, Deserialize)]
struct ProblemRow {
    #[serde(flatten)]
    problem: Problem,
    #[serde(default)]
    applications: Vec<CountRow>,
}

impl ProblemRow {
    fn into_problem(self) -> Problem {
        let mut problem = self.problem;
        problem.applications_count = Some(self.applications.first().map_or(0, |c| c.count));
        problem
    }
}

impl Backend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }
}

impl IdentityProvider for RemoteBackend {
    fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUp> {
        let body: Value = self.identity_call(
            self.auth(Method::POST, "signup", Auth::Anonymous)
                .json(&json!({ "email": email, "password": password })),
        )?;

        // With email confirmation on, the provider answers with the bare user.
        if body.get("access_token").is_some() {
            let session: AuthSession = serde_json::from_value(body)?;
            Ok(SignUp {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let user_value = body.get("user").cloned().unwrap_or(body);
            let user: AuthUser = serde_json::from_value(user_value)?;
            Ok(SignUp {
                user,
                session: None,
            })
        }
    }

    fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        self.identity_call(
            self.auth(Method::POST, "token", Auth::Anonymous)
                .query(&[("grant_type", "password")])
                .json(&json!({ "email": email, "password": password })),
        )
    }

    fn oauth_authorize_url(&self, provider: &str) -> AppResult<String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/auth/v1/authorize", self.base_url),
            &[("provider", provider)],
        )
        .map_err(|e| AppError::Config(format!("invalid backend url: {e}")))?;
        Ok(url.to_string())
    }

    fn sign_out(&self, access_token: &str) -> AppResult<()> {
        let (status, body) =
            self.execute(self.auth(Method::POST, "logout", Auth::Bearer(access_token)))?;
        if !is_success(status) {
            return Err(identity_error(status, &body));
        }
        Ok(())
    }

    fn get_user(&self, access_token: &str) -> AppResult<AuthUser> {
        self.identity_call(self.auth(Method::GET, "user", Auth::Bearer(access_token)))
    }
}

impl Store for RemoteBackend {
    fn insert_profile(&self, auth: Auth, profile: &Profile) -> AppResult<Profile> {
        let rows: Vec<Profile> = self.rows(
            self.table(Method::POST, "profiles", auth)
                .header("Prefer", "return=representation")
                .json(profile),
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Profile".into()))
    }

    fn select_profile(&self, auth: Auth, id: &str) -> AppResult<Option<Profile>> {
        let rows: Vec<Profile> = self.rows(
            self.table(Method::GET, "profiles", auth)
                .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]),
        )?;
        Ok(rows.into_iter().next())
    }

    fn select_profiles(&self, auth: Auth, role: Option<Role>) -> AppResult<Vec<Profile>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.asc".to_string()),
        ];
        if let Some(role) = role {
            query.push(("role", format!("eq.{role}")));
        }
        self.rows(self.table(Method::GET, "profiles", auth).query(&query))
    }

    fn update_profile(
        &self,
        auth: Auth,
        id: &str,
        patch: &ProfilePatch,
    ) -> AppResult<Option<Profile>> {
        let rows: Vec<Profile> = self.rows(
            self.table(Method::PATCH, "profiles", auth)
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(patch),
        )?;
        Ok(rows.into_iter().next())
    }

    fn insert_problem(&self, auth: Auth, problem: &NewProblem) -> AppResult<Problem> {
        let rows: Vec<Problem> = self.rows(
            self.table(Method::POST, "problems", auth)
                .header("Prefer", "return=representation")
                .json(problem),
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Problem".into()))
    }

    fn select_problem(&self, auth: Auth, id: &str) -> AppResult<Option<Problem>> {
        Ok(self.problems(auth, &[("id", format!("eq.{id}"))])?.into_iter().next())
    }

    fn select_problems(&self, auth: Auth, query: &ProblemQuery) -> AppResult<Vec<Problem>> {
        let mut filters = vec![];
        if let Some(startup_id) = query.startup_id {
            filters.push(("startup_id", format!("eq.{startup_id}")));
        }
        let mut problems = self.problems(auth, &filters)?;
        if !query.with_startup {
            for problem in &mut problems {
                problem.startup = None;
            }
        }
        Ok(problems)
    }

    fn update_problem_status(
        &self,
        auth: Auth,
        id: &str,
        status: ProblemStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Problem>> {
        let rows: Vec<Problem> = self.rows(
            self.table(Method::PATCH, "problems", auth)
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(&json!({ "status": status, "updated_at": at })),
        )?;
        Ok(rows.into_iter().next())
    }

    fn insert_application(&self, auth: Auth, application: &NewApplication) -> AppResult<Application> {
        let rows: Vec<Application> = self.rows(
            self.table(Method::POST, "applications", auth)
                .header("Prefer", "return=representation")
                .json(application),
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Application".into()))
    }

    fn select_application(&self, auth: Auth, id: &str) -> AppResult<Option<Application>> {
        let rows: Vec<Application> = self.rows(
            self.table(Method::GET, "applications", auth)
                .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]),
        )?;
        Ok(rows.into_iter().next())
    }

    fn select_applications(
        &self,
        auth: Auth,
        query: &ApplicationQuery,
    ) -> AppResult<Vec<Application>> {
        let mut select = String::from("*");
        if query.with_problem {
            select.push(',');
            select.push_str(PROBLEM_JOIN);
        }
        if query.with_user {
            select.push(',');
            select.push_str(USER_JOIN);
        }

        let mut params = vec![
            ("select", select),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(user_id) = query.user_id {
            params.push(("user_id", format!("eq.{user_id}")));
        }
        if let Some(problem_id) = query.problem_id {
            params.push(("problem_id", format!("eq.{problem_id}")));
        }
        if let Some(ids) = query.problem_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            params.push(("problem_id", format!("in.({})", ids.join(","))));
        }
        self.rows(self.table(Method::GET, "applications", auth).query(&params))
    }

    fn update_application_status(
        &self,
        auth: Auth,
        id: &str,
        status: ApplicationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Application>> {
        let rows: Vec<Application> = self.rows(
            self.table(Method::PATCH, "applications", auth)
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(&json!({ "status": status, "updated_at": at })),
        )?;
        Ok(rows.into_iter().next())
    }
}
