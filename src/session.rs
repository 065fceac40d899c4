//! Session and authentication state.
//!
//! The manager owns the signed-in [`Session`] and hands it out by reference;
//! data access calls take it as an explicit argument.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::backend::{Auth, Backend};
use crate::data::DataAccess;
use crate::error::{AppError, AppResult, IdentityError};
use crate::models::{Profile, ProfileDraft, ProfilePatch, Role};

pub const DEMO_STUDENT_EMAIL: &str = "student@example.com";
pub const DEMO_STARTUP_EMAIL: &str = "startup@example.com";
pub const DEMO_STUDENT_ID: &str = "demo-student";
pub const DEMO_STARTUP_ID: &str = "demo-startup";

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
const MIN_PASSWORD_LEN: usize = 6;

/// A signed-in user. Demo sessions carry no access token.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub user: Profile,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_demo(&self) -> bool {
        self.access_token.is_none()
    }

    pub fn auth(&self) -> Auth<'_> {
        match &self.access_token {
            Some(token) => Auth::Bearer(token),
            None => Auth::Anonymous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(String),
    SignedOut,
    UserUpdated(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredSession {
    access_token: Option<String>,
    user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    demo_profile: Option<Profile>,
}

/// JSON file holding the session between CLI invocations.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn load(&self) -> AppResult<Option<StoredSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, stored: &StoredSession) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(stored)?)?;
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Synthesizes the profile behind a demo account address.
pub fn demo_profile(email: &str) -> Option<Profile> {
    let now = Utc::now();
    match email.trim().to_lowercase().as_str() {
        DEMO_STUDENT_EMAIL => {
            let draft = ProfileDraft::new("Demo Student", Role::Student);
            Some(Profile::from_draft(DEMO_STUDENT_ID, DEMO_STUDENT_EMAIL, &draft, now))
        }
        DEMO_STARTUP_EMAIL => {
            let mut draft = ProfileDraft::new("Demo User", Role::Startup);
            draft.details.company_name = Some("Demo Company".into());
            Some(Profile::from_draft(DEMO_STARTUP_ID, DEMO_STARTUP_EMAIL, &draft, now))
        }
        _ => None,
    }
}

fn validate_credentials(email: &str, password: &str) -> AppResult<()> {
    let re = regex::Regex::new(EMAIL_PATTERN)
        .map_err(|e| AppError::Validation(format!("bad email pattern: {e}")))?;
    if !re.is_match(email) {
        return Err(AppError::Validation("Please enter a valid email address.".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    Ok(())
}

pub struct SessionManager<'a> {
    backend: &'a dyn Backend,
    demo_mode: bool,
    file: Option<SessionFile>,
    current: Option<Session>,
    listeners: Vec<Sender<AuthEvent>>,
}

impl<'a> SessionManager<'a> {
    pub fn new(backend: &'a dyn Backend, demo_mode: bool) -> Self {
        Self {
            backend,
            demo_mode,
            file: None,
            current: None,
            listeners: Vec::new(),
        }
    }

    /// Persists sign-in state to `path` across runs.
    pub fn with_session_file(mut self, path: &Path) -> Self {
        self.file = Some(SessionFile::new(path));
        self
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    pub fn subscribe(&mut self) -> Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    fn emit(&mut self, event: AuthEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn persist(&self, session: &Session) {
        let Some(file) = &self.file else { return };
        let stored = StoredSession {
            access_token: session.access_token.clone(),
            user_id: session.user.id.clone(),
            demo_profile: session.is_demo().then(|| session.user.clone()),
        };
        if let Err(e) = file.save(&stored) {
            warn!("Failed to save session file: {e}");
        }
    }

    fn establish(&mut self, session: Session) -> Profile {
        self.persist(&session);
        let profile = session.user.clone();
        self.current = Some(session);
        self.emit(AuthEvent::SignedIn(profile.id.clone()));
        profile
    }

    pub fn login(&mut self, email: &str, password: &str) -> AppResult<Profile> {
        let email = email.trim();

        if self.demo_mode {
            if let Some(profile) = demo_profile(email) {
                info!(user_id = %profile.id, "Signed in with demo account");
                return Ok(self.establish(Session {
                    access_token: None,
                    user: profile,
                }));
            }
        }

        let auth = self.backend.sign_in_with_password(email, password)?;
        let profile = match self
            .backend
            .select_profile(Auth::Bearer(&auth.access_token), &auth.user.id)?
        {
            Some(profile) => profile,
            None => {
                error!(user_id = %auth.user.id, "Identity has no profile row");
                if let Err(e) = self.backend.sign_out(&auth.access_token) {
                    debug!("Sign-out after missing profile failed: {e}");
                }
                return Err(IdentityError::ProfileMissing.into());
            }
        };

        info!(user_id = %profile.id, role = %profile.role, "Signed in");
        Ok(self.establish(Session {
            access_token: Some(auth.access_token),
            user: profile,
        }))
    }

    /// Creates the identity and then the profile row, and signs the new user
    /// in when the backend hands back a session. Without one (email
    /// confirmation pending) the manager stays anonymous. The two writes are
    /// not atomic: a failed profile insert leaves the identity in place.
    pub fn signup(&mut self, email: &str, password: &str, draft: &ProfileDraft) -> AppResult<String> {
        let email = email.trim();
        validate_credentials(email, password)?;
        draft.validate()?;

        let signup = self.backend.sign_up(email, password)?;
        let pending = Session {
            access_token: signup.session.map(|s| s.access_token),
            user: Profile::from_draft(&signup.user.id, email, draft, Utc::now()),
        };
        let viewer = pending.access_token.is_some().then_some(&pending);
        let profile = DataAccess::new(self.backend, viewer)
            .create_user(&pending.user)
            .inspect_err(|_| error!(user_id = %signup.user.id, "Identity created without a profile"))?;
        info!(user_id = %profile.id, role = %profile.role, "Registered new user");

        match pending.access_token {
            Some(token) => {
                self.establish(Session {
                    access_token: Some(token),
                    user: profile,
                });
            }
            None => info!(user_id = %profile.id, "Awaiting email confirmation"),
        }
        Ok(signup.user.id)
    }

    /// Always ends anonymous; the remote sign-out is best effort.
    pub fn logout(&mut self) {
        if let Some(session) = self.current.take() {
            if let Some(token) = &session.access_token {
                if let Err(e) = self.backend.sign_out(token) {
                    warn!("Remote sign-out failed: {e}");
                }
            }
        }
        if let Some(file) = &self.file {
            if let Err(e) = file.clear() {
                warn!("Failed to remove session file: {e}");
            }
        }
        self.emit(AuthEvent::SignedOut);
    }

    pub fn update_user_profile(&mut self, patch: &ProfilePatch) -> AppResult<Profile> {
        let session = self
            .current
            .as_ref()
            .ok_or(AppError::NotAuthenticated("update your profile"))?;
        patch.validate_for(session.role())?;

        let mut merged = session.user.clone();
        merged.apply(patch);
        if merged == session.user {
            debug!("Profile update changes nothing");
            return Ok(merged);
        }

        let updated = if session.is_demo() {
            merged.updated_at = Utc::now();
            merged
        } else {
            DataAccess::new(self.backend, Some(session)).update_user(
                session,
                session.user_id(),
                patch,
            )?
        };

        let session = Session {
            access_token: session.access_token.clone(),
            user: updated.clone(),
        };
        if session.is_demo() {
            self.persist(&session);
        }
        self.current = Some(session);
        self.emit(AuthEvent::UserUpdated(updated.id.clone()));
        Ok(updated)
    }

    /// Picks up the session saved by an earlier run. Any failure leaves the
    /// manager anonymous.
    pub fn restore(&mut self) -> bool {
        let Some(file) = &self.file else {
            return false;
        };
        let stored = match file.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return false,
            Err(e) => {
                warn!("Ignoring unreadable session file: {e}");
                return false;
            }
        };

        match self.resume(stored) {
            Ok(session) => {
                debug!(user_id = %session.user.id, "Restored session");
                let id = session.user.id.clone();
                self.current = Some(session);
                self.emit(AuthEvent::SignedIn(id));
                true
            }
            Err(e) => {
                warn!("Could not restore session: {e}");
                false
            }
        }
    }

    fn resume(&self, stored: StoredSession) -> AppResult<Session> {
        if let Some(profile) = stored.demo_profile {
            if !self.demo_mode {
                return Err(AppError::Validation("demo sessions require demo mode".into()));
            }
            return Ok(Session {
                access_token: None,
                user: profile,
            });
        }

        let token = stored.access_token.ok_or(IdentityError::InvalidSession)?;
        let user = self.backend.get_user(&token)?;
        if user.id != stored.user_id {
            return Err(IdentityError::InvalidSession.into());
        }
        let profile = self
            .backend
            .select_profile(Auth::Bearer(&token), &user.id)?
            .ok_or(IdentityError::ProfileMissing)?;
        Ok(Session {
            access_token: Some(token),
            user: profile,
        })
    }

    pub fn oauth_url(&self, provider: &str) -> AppResult<String> {
        self.backend.oauth_authorize_url(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{IdentityProvider, LocalBackend, RemoteBackend, Store};
    use crate::models::ExperienceLevel;

    fn student_draft() -> ProfileDraft {
        let mut draft = ProfileDraft::new("Ada", Role::Student);
        draft.details.university = Some("State University".into());
        draft.details.experience_level = Some(ExperienceLevel::Beginner);
        draft
    }

    #[test]
    fn test_signup_signs_in_and_login_keeps_role() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, false);
        let events = sessions.subscribe();
        let mut draft = ProfileDraft::new("Acme", Role::Startup);
        draft.details.company_name = Some("Acme Labs".into());

        let id = sessions.signup("founder@acme.io", "secret1", &draft).unwrap();
        let current = sessions.current().unwrap();
        assert_eq!(current.user_id(), id);
        assert_eq!(current.role(), Role::Startup);
        assert_eq!(current.user.display_name(), "Acme Labs");
        let token = current.access_token.clone().unwrap();
        assert_eq!(db.get_user(&token).unwrap().id, id);
        assert_eq!(events.try_recv().unwrap(), AuthEvent::SignedIn(id.clone()));
        assert!(db.select_profile(Auth::Anonymous, &id).unwrap().is_some());

        sessions.logout();
        let profile = sessions.login("founder@acme.io", "secret1").unwrap();
        assert_eq!(profile.id, id);
        assert_eq!(profile.role, Role::Startup);
        assert_eq!(sessions.current().unwrap().role(), Role::Startup);
    }

    #[test]
    fn test_signup_pending_confirmation_stays_anonymous() {
        let mut server = mockito::Server::new();
        let draft = student_draft();
        let row = Profile::from_draft("u9", "new@example.edu", &draft, Utc::now());
        server
            .mock("POST", "/auth/v1/signup")
            .with_status(200)
            .with_body(r#"{"id":"u9","email":"new@example.edu"}"#)
            .create();
        let insert = server
            .mock("POST", "/rest/v1/profiles")
            .match_header("authorization", "Bearer anon-key")
            .with_status(201)
            .with_body(serde_json::to_string(&vec![row]).unwrap())
            .create();

        let remote =
            RemoteBackend::new(&server.url(), "anon-key", std::time::Duration::from_secs(5)).unwrap();
        let mut sessions = SessionManager::new(&remote, false);
        let events = sessions.subscribe();
        let id = sessions.signup("new@example.edu", "secret1", &draft).unwrap();

        insert.assert();
        assert_eq!(id, "u9");
        assert!(!sessions.is_authenticated());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_signup_validation() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, false);
        let err = sessions.signup("not-an-email", "secret1", &student_draft()).unwrap_err();
        assert!(err.to_string().contains("valid email"));
        let err = sessions.signup("ada@example.edu", "12345", &student_draft()).unwrap_err();
        assert!(err.to_string().contains("at least 6"));

        let mut bad = student_draft();
        bad.details.company_name = Some("Nope".into());
        assert!(matches!(
            sessions.signup("ada@example.edu", "secret1", &bad),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_failed_login_leaves_state_unchanged() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, false);
        sessions.signup("ada@example.edu", "secret1", &student_draft()).unwrap();
        let before = sessions.current().cloned();

        let err = sessions.login("ada@example.edu", "wrong-password").unwrap_err();
        assert!(matches!(err, AppError::Identity(IdentityError::InvalidCredentials)));
        assert_eq!(sessions.current().cloned(), before);
    }

    #[test]
    fn test_login_without_profile() {
        let db = LocalBackend::in_memory().unwrap();
        db.sign_up("ghost@example.com", "secret1").unwrap();
        let mut sessions = SessionManager::new(&db, false);
        let err = sessions.login("ghost@example.com", "secret1").unwrap_err();
        assert_eq!(err.user_message(), "User profile not found. Please contact support.");
        assert!(!sessions.is_authenticated());
    }

    #[test]
    fn test_demo_accounts_need_demo_mode() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, false);
        assert!(sessions.login(DEMO_STARTUP_EMAIL, "anything").is_err());

        let mut demo = SessionManager::new(&db, true);
        let profile = demo.login(DEMO_STARTUP_EMAIL, "anything").unwrap();
        assert_eq!(profile.id, DEMO_STARTUP_ID);
        assert_eq!(profile.display_name(), "Demo Company");
        assert!(demo.current().unwrap().is_demo());
        assert!(db.select_profile(Auth::Anonymous, DEMO_STARTUP_ID).unwrap().is_none());
    }

    #[test]
    fn test_update_profile_is_idempotent() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, false);
        sessions.signup("ada@example.edu", "secret1", &student_draft()).unwrap();

        let patch = ProfilePatch {
            bio: Some("Compilers and coffee".into()),
            skills: Some(vec!["Rust".into()]),
            ..Default::default()
        };
        let once = sessions.update_user_profile(&patch).unwrap();
        let twice = sessions.update_user_profile(&patch).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.bio.as_deref(), Some("Compilers and coffee"));

        let stored = db.select_profile(Auth::Anonymous, &once.id).unwrap().unwrap();
        assert_eq!(stored, twice);
    }

    #[test]
    fn test_update_requires_session_and_matching_role() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, true);
        let patch = ProfilePatch {
            company_name: Some("Acme".into()),
            ..Default::default()
        };
        assert!(matches!(
            sessions.update_user_profile(&patch),
            Err(AppError::NotAuthenticated(_))
        ));

        sessions.login(DEMO_STUDENT_EMAIL, "").unwrap();
        assert!(matches!(
            sessions.update_user_profile(&patch),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_restore_and_logout_with_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let db = LocalBackend::in_memory().unwrap();

        let mut first = SessionManager::new(&db, false).with_session_file(&path);
        first.signup("ada@example.edu", "secret1", &student_draft()).unwrap();
        let profile = first.current().unwrap().user.clone();
        assert!(path.exists());

        let mut second = SessionManager::new(&db, false).with_session_file(&path);
        let events = second.subscribe();
        assert!(second.restore());
        assert_eq!(second.current().unwrap().user, profile);
        assert_eq!(events.try_recv().unwrap(), AuthEvent::SignedIn(profile.id.clone()));

        second.logout();
        assert!(!second.is_authenticated());
        assert!(!path.exists());
        assert_eq!(events.try_recv().unwrap(), AuthEvent::SignedOut);

        let mut third = SessionManager::new(&db, false).with_session_file(&path);
        assert!(!third.restore());
    }

    #[test]
    fn test_restore_with_revoked_token_stays_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let db = LocalBackend::in_memory().unwrap();

        let mut first = SessionManager::new(&db, false).with_session_file(&path);
        first.signup("ada@example.edu", "secret1", &student_draft()).unwrap();
        let token = first.current().unwrap().access_token.clone().unwrap();
        db.sign_out(&token).unwrap();

        let mut second = SessionManager::new(&db, false).with_session_file(&path);
        assert!(!second.restore());
        assert!(!second.is_authenticated());
    }

    #[test]
    fn test_demo_update_emits_event() {
        let db = LocalBackend::in_memory().unwrap();
        let mut sessions = SessionManager::new(&db, true);
        let events = sessions.subscribe();
        sessions.login(DEMO_STUDENT_EMAIL, "").unwrap();
        let patch = ProfilePatch {
            major: Some("Physics".into()),
            ..Default::default()
        };
        let updated = sessions.update_user_profile(&patch).unwrap();
        assert_eq!(updated.major.as_deref(), Some("Physics"));

        let received: Vec<AuthEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                AuthEvent::SignedIn(DEMO_STUDENT_ID.into()),
                AuthEvent::UserUpdated(DEMO_STUDENT_ID.into()),
            ]
        );
    }

    #[test]
    fn test_oauth_unsupported_locally() {
        let db = LocalBackend::in_memory().unwrap();
        let sessions = SessionManager::new(&db, false);
        assert!(matches!(sessions.oauth_url("github"), Err(AppError::Unsupported(_))));
    }
}
