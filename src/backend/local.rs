use argon2::Argon2;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use super::{
    ApplicationQuery, Auth, AuthSession, AuthUser, Backend, IdentityProvider, ProblemQuery,
    SignUp, Store,
};
use crate::error::{AppError, AppResult, IdentityError};
use crate::models::{
    Application, ApplicationStatus, NewApplication, NewProblem, Problem, ProblemStatus, Profile,
    ProfilePatch, Role,
};

/// Embedded SQLite stand-in for the hosted backend. Row-level security is
/// not emulated; the data access layer enforces ownership.
pub struct LocalBackend {
    conn: Connection,
}

impl LocalBackend {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Fresh, initialized database that lives as long as the value.
    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let backend = Self { conn };
        backend.create_schema()?;
        Ok(backend)
    }

    fn create_schema(&self) -> AppResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS auth_users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_salt TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auth_sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES auth_users(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('student', 'startup', 'admin')),
                avatar_url TEXT,
                bio TEXT,
                location TEXT,
                website_url TEXT,
                linkedin_url TEXT,
                skills TEXT NOT NULL DEFAULT '[]',
                featured INTEGER NOT NULL DEFAULT 0,
                university TEXT,
                major TEXT,
                graduation_year TEXT,
                experience_level TEXT CHECK (experience_level IN ('beginner', 'intermediate', 'advanced')),
                areas_of_interest TEXT NOT NULL DEFAULT '[]',
                company_name TEXT,
                company_description TEXT,
                sectors TEXT NOT NULL DEFAULT '[]',
                stage TEXT,
                hiring_status TEXT CHECK (hiring_status IN ('hiring', 'not_hiring', 'future_hiring')),
                founder_names TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS problems (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                startup_id TEXT NOT NULL REFERENCES profiles(id),
                required_skills TEXT NOT NULL DEFAULT '[]',
                experience_level TEXT NOT NULL CHECK (experience_level IN ('beginner', 'intermediate', 'advanced')),
                compensation TEXT,
                additional_info TEXT,
                deadline TEXT,
                status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('draft', 'open', 'in_progress', 'completed', 'cancelled')),
                featured INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                problem_id TEXT NOT NULL REFERENCES problems(id),
                user_id TEXT NOT NULL REFERENCES profiles(id),
                cover_letter TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'accepted', 'rejected')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_profiles_role ON profiles(role);
            CREATE INDEX IF NOT EXISTS idx_problems_startup ON problems(startup_id);
            CREATE INDEX IF NOT EXISTS idx_applications_problem ON applications(problem_id);
            CREATE INDEX IF NOT EXISTS idx_applications_user ON applications(user_id);
            "#,
        )?;
        Ok(())
    }

    // --- Identity helpers ---

    fn issue_session(&self, user: AuthUser) -> AppResult<AuthSession> {
        let token = Uuid::new_v4().simple().to_string();
        self.conn.execute(
            "INSERT INTO auth_sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user.id, Utc::now()],
        )?;
        Ok(AuthSession {
            access_token: token,
            refresh_token: None,
            user,
        })
    }

    // --- Row lookups ---

    fn query_problems(&self, filter: &str, values: &[String]) -> AppResult<Vec<Problem>> {
        let sql = format!("{} {} ORDER BY p.created_at DESC", problem_select(), filter);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row_to_problem(row, 0))?;
        let mut problems = Vec::new();
        for row in rows {
            if let Some(problem) = row? {
                problems.push(problem);
            }
        }
        Ok(problems)
    }

    fn query_applications(&self, filter: &str, values: &[String]) -> AppResult<Vec<Application>> {
        let sql = format!("{} {} ORDER BY a.created_at DESC", application_select(), filter);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_application)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn init(&self) -> AppResult<()> {
        self.create_schema()
    }

    fn ensure_initialized(&self) -> AppResult<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='profiles'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(AppError::Config(
                "Database not initialized. Run 'solverhub init' first.".into(),
            ));
        }
        Ok(())
    }
}

impl IdentityProvider for LocalBackend {
    fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUp> {
        let email = email.trim().to_lowercase();
        let existing: Option<String> = self
            .conn
            .query_row("SELECT id FROM auth_users WHERE email = ?1", [&email], |row| {
                row.get(0)
            })
            .optional()?;
        if existing.is_some() {
            return Err(IdentityError::AlreadyRegistered.into());
        }

        let id = Uuid::new_v4().to_string();
        let salt = hex::encode(rand::random::<[u8; 16]>());
        self.conn.execute(
            "INSERT INTO auth_users (id, email, password_salt, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, email, salt, hash_password(&salt, password)?, Utc::now()],
        )?;
        debug!(user_id = %id, "Created local identity");

        let user = AuthUser {
            id,
            email: Some(email),
        };
        let session = self.issue_session(user.clone())?;
        Ok(SignUp {
            user,
            session: Some(session),
        })
    }

    fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let email = email.trim().to_lowercase();
        let record: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, password_salt, password_hash FROM auth_users WHERE email = ?1",
                [&email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match record {
            Some((id, salt, hash)) if hash_password(&salt, password)? == hash => {
                self.issue_session(AuthUser {
                    id,
                    email: Some(email),
                })
            }
            _ => Err(IdentityError::InvalidCredentials.into()),
        }
    }

    fn oauth_authorize_url(&self, _provider: &str) -> AppResult<String> {
        Err(AppError::Unsupported("OAuth sign-in"))
    }

    fn sign_out(&self, access_token: &str) -> AppResult<()> {
        self.conn
            .execute("DELETE FROM auth_sessions WHERE token = ?1", [access_token])?;
        Ok(())
    }

    fn get_user(&self, access_token: &str) -> AppResult<AuthUser> {
        self.conn
            .query_row(
                "SELECT u.id, u.email FROM auth_sessions s
                 JOIN auth_users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                [access_token],
                |row| {
                    Ok(AuthUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| IdentityError::InvalidSession.into())
    }
}

impl Store for LocalBackend {
    fn insert_profile(&self, _auth: Auth, p: &Profile) -> AppResult<Profile> {
        self.conn.execute(
            &format!(
                "INSERT INTO profiles ({}) VALUES ({})",
                PROFILE_FIELDS.join(", "),
                placeholders(PROFILE_FIELDS.len())
            ),
            params![
                p.id,
                p.email,
                p.name,
                p.role.as_str(),
                p.avatar_url,
                p.bio,
                p.location,
                p.website_url,
                p.linkedin_url,
                to_json(&p.skills)?,
                p.featured,
                p.university,
                p.major,
                p.graduation_year,
                p.experience_level.map(|l| l.as_str()),
                to_json(&p.areas_of_interest)?,
                p.company_name,
                p.company_description,
                to_json(&p.sectors)?,
                p.stage,
                p.hiring_status.map(|h| h.as_str()),
                to_json(&p.founder_names)?,
                p.created_at,
                p.updated_at,
            ],
        )?;
        self.select_profile(Auth::Anonymous, &p.id)?
            .ok_or_else(|| AppError::NotFound("Profile".into()))
    }

    fn select_profile(&self, _auth: Auth, id: &str) -> AppResult<Option<Profile>> {
        let sql = format!(
            "SELECT {} FROM profiles s WHERE s.id = ?1",
            columns("s", &PROFILE_FIELDS)
        );
        let profile = self
            .conn
            .query_row(&sql, [id], |row| row_to_profile(row, 0))
            .optional()?;
        Ok(profile.flatten())
    }

    fn select_profiles(&self, _auth: Auth, role: Option<Role>) -> AppResult<Vec<Profile>> {
        let mut sql = format!("SELECT {} FROM profiles s", columns("s", &PROFILE_FIELDS));
        let mut values: Vec<&str> = vec![];
        if let Some(r) = role {
            sql.push_str(" WHERE s.role = ?1");
            values.push(r.as_str());
        }
        sql.push_str(" ORDER BY s.created_at");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row_to_profile(row, 0))?;
        let mut profiles = Vec::new();
        for row in rows {
            if let Some(profile) = row? {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }

    fn update_profile(
        &self,
        auth: Auth,
        id: &str,
        patch: &ProfilePatch,
    ) -> AppResult<Option<Profile>> {
        let Some(mut profile) = self.select_profile(auth, id)? else {
            return Ok(None);
        };
        profile.apply(patch);
        if patch.updated_at.is_none() {
            profile.updated_at = Utc::now();
        }

        self.conn.execute(
            "UPDATE profiles SET name = ?1, avatar_url = ?2, bio = ?3, location = ?4,
                website_url = ?5, linkedin_url = ?6, skills = ?7, university = ?8, major = ?9,
                graduation_year = ?10, experience_level = ?11, areas_of_interest = ?12,
                company_name = ?13, company_description = ?14, sectors = ?15, stage = ?16,
                hiring_status = ?17, founder_names = ?18, updated_at = ?19
             WHERE id = ?20",
            params![
                profile.name,
                profile.avatar_url,
                profile.bio,
                profile.location,
                profile.website_url,
                profile.linkedin_url,
                to_json(&profile.skills)?,
                profile.university,
                profile.major,
                profile.graduation_year,
                profile.experience_level.map(|l| l.as_str()),
                to_json(&profile.areas_of_interest)?,
                profile.company_name,
                profile.company_description,
                to_json(&profile.sectors)?,
                profile.stage,
                profile.hiring_status.map(|h| h.as_str()),
                to_json(&profile.founder_names)?,
                profile.updated_at,
                id,
            ],
        )?;
        self.select_profile(auth, id)
    }

    fn insert_problem(&self, auth: Auth, p: &NewProblem) -> AppResult<Problem> {
        self.conn.execute(
            &format!(
                "INSERT INTO problems ({}) VALUES ({})",
                PROBLEM_FIELDS.join(", "),
                placeholders(PROBLEM_FIELDS.len())
            ),
            params![
                p.id,
                p.title,
                p.description,
                p.startup_id,
                to_json(&p.required_skills)?,
                p.experience_level.as_str(),
                p.compensation,
                p.additional_info,
                p.deadline,
                p.status.as_str(),
                p.featured,
                p.created_at,
                p.updated_at,
            ],
        )?;
        self.select_problem(auth, &p.id)?
            .ok_or_else(|| AppError::NotFound("Problem".into()))
    }

    fn select_problem(&self, _auth: Auth, id: &str) -> AppResult<Option<Problem>> {
        let mut found = self.query_problems("WHERE p.id = ?1", &[id.to_string()])?;
        Ok(found.pop())
    }

    fn select_problems(&self, _auth: Auth, query: &ProblemQuery) -> AppResult<Vec<Problem>> {
        let mut problems = match query.startup_id {
            Some(startup_id) => {
                self.query_problems("WHERE p.startup_id = ?1", &[startup_id.to_string()])?
            }
            None => self.query_problems("", &[])?,
        };
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
        let changed = self.conn.execute(
            "UPDATE problems SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), at, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.select_problem(auth, id)
    }

    fn insert_application(&self, auth: Auth, a: &NewApplication) -> AppResult<Application> {
        self.conn.execute(
            &format!(
                "INSERT INTO applications ({}) VALUES ({})",
                APPLICATION_FIELDS.join(", "),
                placeholders(APPLICATION_FIELDS.len())
            ),
            params![
                a.id,
                a.problem_id,
                a.user_id,
                a.cover_letter,
                a.status.as_str(),
                a.created_at,
                a.updated_at,
            ],
        )?;
        let mut application = self
            .select_application(auth, &a.id)?
            .ok_or_else(|| AppError::NotFound("Application".into()))?;
        application.problem = None;
        application.user = None;
        Ok(application)
    }

    fn select_application(&self, _auth: Auth, id: &str) -> AppResult<Option<Application>> {
        let mut found = self.query_applications("WHERE a.id = ?1", &[id.to_string()])?;
        Ok(found.pop())
    }

    fn select_applications(
        &self,
        _auth: Auth,
        query: &ApplicationQuery,
    ) -> AppResult<Vec<Application>> {
        let mut filter = String::from("WHERE 1=1");
        let mut values: Vec<String> = vec![];

        if let Some(user_id) = query.user_id {
            values.push(user_id.to_string());
            filter.push_str(&format!(" AND a.user_id = ?{}", values.len()));
        }
        if let Some(problem_id) = query.problem_id {
            values.push(problem_id.to_string());
            filter.push_str(&format!(" AND a.problem_id = ?{}", values.len()));
        }
        if let Some(ids) = query.problem_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let start = values.len();
            values.extend(ids.iter().cloned());
            let slots: Vec<String> = (start + 1..=values.len()).map(|i| format!("?{i}")).collect();
            filter.push_str(&format!(" AND a.problem_id IN ({})", slots.join(", ")));
        }

        let mut applications = self.query_applications(&filter, &values)?;
        for application in &mut applications {
            if !query.with_problem {
                application.problem = None;
            }
            if !query.with_user {
                application.user = None;
            }
        }
        Ok(applications)
    }

    fn update_application_status(
        &self,
        auth: Auth,
        id: &str,
        status: ApplicationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Application>> {
        let changed = self.conn.execute(
            "UPDATE applications SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), at, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let mut application = self.select_application(auth, id)?;
        if let Some(a) = application.as_mut() {
            a.problem = None;
            a.user = None;
        }
        Ok(application)
    }
}

// --- Row conversion ---

const PROFILE_FIELDS: [&str; 24] = [
    "id",
    "email",
    "name",
    "role",
    "avatar_url",
    "bio",
    "location",
    "website_url",
    "linkedin_url",
    "skills",
    "featured",
    "university",
    "major",
    "graduation_year",
    "experience_level",
    "areas_of_interest",
    "company_name",
    "company_description",
    "sectors",
    "stage",
    "hiring_status",
    "founder_names",
    "created_at",
    "updated_at",
];

const PROBLEM_FIELDS: [&str; 13] = [
    "id",
    "title",
    "description",
    "startup_id",
    "required_skills",
    "experience_level",
    "compensation",
    "additional_info",
    "deadline",
    "status",
    "featured",
    "created_at",
    "updated_at",
];

const APPLICATION_FIELDS: [&str; 7] = [
    "id",
    "problem_id",
    "user_id",
    "cover_letter",
    "status",
    "created_at",
    "updated_at",
];

/// Problem columns, the application count, then the startup's profile columns.
const PROBLEM_WIDTH: usize = PROBLEM_FIELDS.len() + 1 + PROFILE_FIELDS.len();

fn columns(alias: &str, fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| format!("{alias}.{f}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

fn problem_select() -> String {
    format!(
        "SELECT {}, (SELECT COUNT(*) FROM applications x WHERE x.problem_id = p.id), {}
         FROM problems p
         LEFT JOIN profiles s ON s.id = p.startup_id",
        columns("p", &PROBLEM_FIELDS),
        columns("s", &PROFILE_FIELDS)
    )
}

fn application_select() -> String {
    format!(
        "SELECT {}, {}, (SELECT COUNT(*) FROM applications x WHERE x.problem_id = p.id), {}, {}
         FROM applications a
         LEFT JOIN problems p ON p.id = a.problem_id
         LEFT JOIN profiles s ON s.id = p.startup_id
         LEFT JOIN profiles u ON u.id = a.user_id",
        columns("a", &APPLICATION_FIELDS),
        columns("p", &PROBLEM_FIELDS),
        columns("s", &PROFILE_FIELDS),
        columns("u", &PROFILE_FIELDS)
    )
}

/// Argon2id digest of `password` under the per-user `salt`, hex encoded.
fn hash_password(salt: &str, password: &str) -> AppResult<String> {
    let mut digest = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut digest)
        .map_err(|e| IdentityError::Other(format!("password hashing failed: {e}")))?;
    Ok(hex::encode(digest))
}

fn to_json(values: &[String]) -> AppResult<String> {
    Ok(serde_json::to_string(values)?)
}

fn json_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let text: Option<String> = row.get(idx)?;
    match text {
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(Vec::new()),
    }
}

fn parse_text<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_opt_text<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        t.parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
    })
    .transpose()
}

fn row_to_profile(row: &Row, o: usize) -> rusqlite::Result<Option<Profile>> {
    let Some(id) = row.get::<_, Option<String>>(o)? else {
        return Ok(None);
    };
    Ok(Some(Profile {
        id,
        email: row.get(o + 1)?,
        name: row.get(o + 2)?,
        role: parse_text(row, o + 3)?,
        avatar_url: row.get(o + 4)?,
        bio: row.get(o + 5)?,
        location: row.get(o + 6)?,
        website_url: row.get(o + 7)?,
        linkedin_url: row.get(o + 8)?,
        skills: json_list(row, o + 9)?,
        featured: row.get(o + 10)?,
        university: row.get(o + 11)?,
        major: row.get(o + 12)?,
        graduation_year: row.get(o + 13)?,
        experience_level: parse_opt_text(row, o + 14)?,
        areas_of_interest: json_list(row, o + 15)?,
        company_name: row.get(o + 16)?,
        company_description: row.get(o + 17)?,
        sectors: json_list(row, o + 18)?,
        stage: row.get(o + 19)?,
        hiring_status: parse_opt_text(row, o + 20)?,
        founder_names: json_list(row, o + 21)?,
        created_at: row.get(o + 22)?,
        updated_at: row.get(o + 23)?,
    }))
}

fn row_to_problem(row: &Row, o: usize) -> rusqlite::Result<Option<Problem>> {
    let Some(id) = row.get::<_, Option<String>>(o)? else {
        return Ok(None);
    };
    Ok(Some(Problem {
        id,
        title: row.get(o + 1)?,
        description: row.get(o + 2)?,
        startup_id: row.get(o + 3)?,
        required_skills: json_list(row, o + 4)?,
        experience_level: parse_text(row, o + 5)?,
        compensation: row.get(o + 6)?,
        additional_info: row.get(o + 7)?,
        deadline: row.get(o + 8)?,
        status: parse_text(row, o + 9)?,
        featured: row.get(o + 10)?,
        created_at: row.get(o + 11)?,
        updated_at: row.get(o + 12)?,
        applications_count: row.get(o + 13)?,
        startup: row_to_profile(row, o + 14)?,
    }))
}

fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
    let width = APPLICATION_FIELDS.len();
    Ok(Application {
        id: row.get(0)?,
        problem_id: row.get(1)?,
        user_id: row.get(2)?,
        cover_letter: row.get(3)?,
        status: parse_text(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        problem: row_to_problem(row, width)?,
        user: row_to_profile(row, width + PROBLEM_WIDTH)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use crate::models::ExperienceLevel;

    fn new_problem(id: &str, startup_id: &str, featured: bool) -> NewProblem {
        let now = Utc::now();
        NewProblem {
            id: id.into(),
            title: format!("Problem {id}"),
            description: "Do the thing".into(),
            startup_id: startup_id.into(),
            required_skills: vec!["Rust".into()],
            experience_level: ExperienceLevel::Beginner,
            compensation: Some("$500".into()),
            additional_info: None,
            deadline: chrono::NaiveDate::from_ymd_opt(2030, 1, 31),
            status: ProblemStatus::Open,
            featured,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_application(id: &str, problem_id: &str, user_id: &str) -> NewApplication {
        let now = Utc::now();
        NewApplication {
            id: id.into(),
            problem_id: problem_id.into(),
            user_id: user_id.into(),
            cover_letter: "I can help".into(),
            status: ApplicationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sign_up_and_sign_in() {
        let db = LocalBackend::in_memory().unwrap();
        let signup = db.sign_up("Ada@Example.com", "secret1").unwrap();
        assert_eq!(signup.user.email.as_deref(), Some("ada@example.com"));
        let session = signup.session.unwrap();

        let again = db.sign_in_with_password("ada@example.com", "secret1").unwrap();
        assert_eq!(again.user.id, session.user.id);
        assert_ne!(again.access_token, session.access_token);

        let wrong = db.sign_in_with_password("ada@example.com", "nope").unwrap_err();
        assert!(matches!(wrong, AppError::Identity(IdentityError::InvalidCredentials)));

        let unknown = db.sign_in_with_password("bob@example.com", "secret1").unwrap_err();
        assert!(matches!(unknown, AppError::Identity(IdentityError::InvalidCredentials)));
    }

    #[test]
    fn test_duplicate_registration() {
        let db = LocalBackend::in_memory().unwrap();
        db.sign_up("ada@example.com", "secret1").unwrap();
        let err = db.sign_up("ADA@example.com", "other12").unwrap_err();
        assert!(matches!(err, AppError::Identity(IdentityError::AlreadyRegistered)));
    }

    #[test]
    fn test_session_tokens_resolve_until_sign_out() {
        let db = LocalBackend::in_memory().unwrap();
        let session = db.sign_up("ada@example.com", "secret1").unwrap().session.unwrap();
        let user = db.get_user(&session.access_token).unwrap();
        assert_eq!(user.id, session.user.id);

        db.sign_out(&session.access_token).unwrap();
        let err = db.get_user(&session.access_token).unwrap_err();
        assert!(matches!(err, AppError::Identity(IdentityError::InvalidSession)));
    }

    #[test]
    fn test_oauth_is_unsupported() {
        let db = LocalBackend::in_memory().unwrap();
        assert!(matches!(
            db.oauth_authorize_url("github"),
            Err(AppError::Unsupported(_))
        ));
    }

    #[test]
    fn test_profile_round_trip_and_role_filter() {
        let db = LocalBackend::in_memory().unwrap();
        let student = fixtures::student("u1", "Ada");
        let startup = fixtures::startup("s1", "Acme");
        let stored = db.insert_profile(Auth::Anonymous, &student).unwrap();
        assert_eq!(stored.skills, student.skills);
        assert_eq!(stored.experience_level, Some(ExperienceLevel::Intermediate));
        db.insert_profile(Auth::Anonymous, &startup).unwrap();

        let students = db.select_profiles(Auth::Anonymous, Some(Role::Student)).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].id, "u1");
        assert_eq!(db.select_profiles(Auth::Anonymous, None).unwrap().len(), 2);
        assert!(db.select_profile(Auth::Anonymous, "missing").unwrap().is_none());
    }

    #[test]
    fn test_update_profile_merges_patch() {
        let db = LocalBackend::in_memory().unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::student("u1", "Ada")).unwrap();
        let patch = ProfilePatch {
            bio: Some("Loves compilers".into()),
            ..Default::default()
        };
        let updated = db.update_profile(Auth::Anonymous, "u1", &patch).unwrap().unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Loves compilers"));
        assert_eq!(updated.university.as_deref(), Some("State University"));
        assert!(db.update_profile(Auth::Anonymous, "nobody", &patch).unwrap().is_none());
    }

    #[test]
    fn test_problems_join_startup_and_count() {
        let db = LocalBackend::in_memory().unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::startup("s1", "Acme")).unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::student("u1", "Ada")).unwrap();
        db.insert_problem(Auth::Anonymous, &new_problem("p1", "s1", true)).unwrap();
        db.insert_application(Auth::Anonymous, &new_application("a1", "p1", "u1")).unwrap();

        let problem = db.select_problem(Auth::Anonymous, "p1").unwrap().unwrap();
        assert_eq!(problem.applications_count, Some(1));
        assert_eq!(problem.startup.as_ref().map(|s| s.display_name()), Some("Acme"));
        assert_eq!(problem.deadline, chrono::NaiveDate::from_ymd_opt(2030, 1, 31));

        let listed = db
            .select_problems(Auth::Anonymous, &ProblemQuery { startup_id: Some("s1"), with_startup: false })
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].startup.is_none());
        let other = db
            .select_problems(Auth::Anonymous, &ProblemQuery { startup_id: Some("s2"), with_startup: true })
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_problem_requires_existing_startup() {
        let db = LocalBackend::in_memory().unwrap();
        let err = db.insert_problem(Auth::Anonymous, &new_problem("p1", "ghost", false)).unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[test]
    fn test_application_queries() {
        let db = LocalBackend::in_memory().unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::startup("s1", "Acme")).unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::student("u1", "Ada")).unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::student("u2", "Grace")).unwrap();
        db.insert_problem(Auth::Anonymous, &new_problem("p1", "s1", false)).unwrap();
        db.insert_problem(Auth::Anonymous, &new_problem("p2", "s1", false)).unwrap();
        db.insert_application(Auth::Anonymous, &new_application("a1", "p1", "u1")).unwrap();
        db.insert_application(Auth::Anonymous, &new_application("a2", "p2", "u2")).unwrap();

        let by_user = db
            .select_applications(
                Auth::Anonymous,
                &ApplicationQuery { user_id: Some("u1"), with_problem: true, ..Default::default() },
            )
            .unwrap();
        assert_eq!(by_user.len(), 1);
        assert_eq!(by_user[0].problem.as_ref().unwrap().id, "p1");
        assert!(by_user[0].user.is_none());

        let ids = vec!["p1".to_string(), "p2".to_string()];
        let by_ids = db
            .select_applications(
                Auth::Anonymous,
                &ApplicationQuery { problem_ids: Some(&ids), with_user: true, ..Default::default() },
            )
            .unwrap();
        assert_eq!(by_ids.len(), 2);
        assert!(by_ids.iter().all(|a| a.user.is_some()));

        let none: Vec<String> = vec![];
        let empty = db
            .select_applications(
                Auth::Anonymous,
                &ApplicationQuery { problem_ids: Some(&none), ..Default::default() },
            )
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_status_updates() {
        let db = LocalBackend::in_memory().unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::startup("s1", "Acme")).unwrap();
        db.insert_profile(Auth::Anonymous, &fixtures::student("u1", "Ada")).unwrap();
        db.insert_problem(Auth::Anonymous, &new_problem("p1", "s1", false)).unwrap();
        db.insert_application(Auth::Anonymous, &new_application("a1", "p1", "u1")).unwrap();

        let app = db
            .update_application_status(Auth::Anonymous, "a1", ApplicationStatus::Accepted, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(app.status, ApplicationStatus::Accepted);
        let problem = db
            .update_problem_status(Auth::Anonymous, "p1", ProblemStatus::InProgress, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(problem.status, ProblemStatus::InProgress);
        assert!(db
            .update_problem_status(Auth::Anonymous, "nope", ProblemStatus::Open, Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_passwords_are_stored_as_salted_argon2_digests() {
        let db = LocalBackend::in_memory().unwrap();
        db.sign_up("a@example.com", "secret1").unwrap();
        db.sign_up("b@example.com", "secret1").unwrap();
        let rows: Vec<(String, String)> = db
            .conn
            .prepare("SELECT password_salt, password_hash FROM auth_users ORDER BY email")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].0, rows[1].0);
        assert_ne!(rows[0].1, rows[1].1);
        assert_eq!(rows[0].1.len(), 64);
        assert_eq!(hash_password(&rows[0].0, "secret1").unwrap(), rows[0].1);
        assert_ne!(hash_password(&rows[0].0, "secret2").unwrap(), rows[0].1);
    }

    #[test]
    fn test_ensure_initialized_on_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocalBackend::open(&dir.path().join("nested/solverhub.db")).unwrap();
        let err = db.ensure_initialized().unwrap_err();
        assert!(err.to_string().contains("solverhub init"));
        db.init().unwrap();
        db.ensure_initialized().unwrap();
        assert!(dir.path().join("nested/solverhub.db").exists());
    }
}
