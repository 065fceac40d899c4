use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Declares a closed set of lowercase string values shared by the CLI,
/// SQLite CHECK constraints and the remote JSON rows.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().replace('-', "_").as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {} '{}' (expected one of: {})",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

string_enum!(Role {
    Student => "student",
    Startup => "startup",
    Admin => "admin",
});

string_enum!(ExperienceLevel {
    Beginner => "beginner",
    Intermediate => "intermediate",
    Advanced => "advanced",
});

string_enum!(HiringStatus {
    Hiring => "hiring",
    NotHiring => "not_hiring",
    FutureHiring => "future_hiring",
});

string_enum!(ProblemStatus {
    Draft => "draft",
    Open => "open",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

string_enum!(ApplicationStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

impl ApplicationStatus {
    /// Review is one-way: a pending application is accepted or rejected once.
    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        matches!(
            (self, next),
            (ApplicationStatus::Pending, ApplicationStatus::Accepted)
                | (ApplicationStatus::Pending, ApplicationStatus::Rejected)
        )
    }
}

impl ExperienceLevel {
    pub const ALL: &'static [ExperienceLevel] = &[
        ExperienceLevel::Beginner,
        ExperienceLevel::Intermediate,
        ExperienceLevel::Advanced,
    ];
}

impl HiringStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HiringStatus::Hiring => "Actively Hiring",
            HiringStatus::FutureHiring => "Hiring Soon",
            HiringStatus::NotHiring => "Not Hiring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub featured: bool,

    // Student
    #[serde(default)]
    pub university: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub graduation_year: Option<String>,
    #[serde(default)]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    pub areas_of_interest: Vec<String>,

    // Startup
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_description: Option<String>,
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub hiring_status: Option<HiringStatus>,
    #[serde(default)]
    pub founder_names: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Builds the profile row written right after identity creation.
    pub fn from_draft(id: &str, email: &str, draft: &ProfileDraft, now: DateTime<Utc>) -> Self {
        let mut profile = Self {
            id: id.to_string(),
            email: email.to_string(),
            name: draft.name.trim().to_string(),
            role: draft.role,
            avatar_url: None,
            bio: None,
            location: None,
            website_url: None,
            linkedin_url: None,
            skills: Vec::new(),
            featured: false,
            university: None,
            major: None,
            graduation_year: None,
            experience_level: None,
            areas_of_interest: Vec::new(),
            company_name: None,
            company_description: None,
            sectors: Vec::new(),
            stage: None,
            hiring_status: None,
            founder_names: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        profile.apply(&draft.details);
        profile
    }

    /// Company name for startups, display name otherwise.
    pub fn display_name(&self) -> &str {
        match (&self.role, &self.company_name) {
            (Role::Startup, Some(company)) if !company.is_empty() => company,
            _ => &self.name,
        }
    }

    /// Merges the set fields of `patch`. Applying the same patch twice is a no-op.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut self.name, &patch.name);
        set_opt(&mut self.avatar_url, &patch.avatar_url);
        set_opt(&mut self.bio, &patch.bio);
        set_opt(&mut self.location, &patch.location);
        set_opt(&mut self.website_url, &patch.website_url);
        set_opt(&mut self.linkedin_url, &patch.linkedin_url);
        set(&mut self.skills, &patch.skills);
        set_opt(&mut self.university, &patch.university);
        set_opt(&mut self.major, &patch.major);
        set_opt(&mut self.graduation_year, &patch.graduation_year);
        set_opt(&mut self.experience_level, &patch.experience_level);
        set(&mut self.areas_of_interest, &patch.areas_of_interest);
        set_opt(&mut self.company_name, &patch.company_name);
        set_opt(&mut self.company_description, &patch.company_description);
        set(&mut self.sectors, &patch.sectors);
        set_opt(&mut self.stage, &patch.stage);
        set_opt(&mut self.hiring_status, &patch.hiring_status);
        set(&mut self.founder_names, &patch.founder_names);
        if let Some(ts) = patch.updated_at {
            self.updated_at = ts;
        }
    }
}

/// Partial profile update. Role, email and id are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graduation_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub areas_of_interest: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sectors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hiring_status: Option<HiringStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founder_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        let stamp_only = ProfilePatch {
            updated_at: self.updated_at,
            ..Default::default()
        };
        *self == stamp_only
    }

    fn student_fields(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.university.is_some() {
            set.push("university");
        }
        if self.major.is_some() {
            set.push("major");
        }
        if self.graduation_year.is_some() {
            set.push("graduation_year");
        }
        if self.experience_level.is_some() {
            set.push("experience_level");
        }
        if self.areas_of_interest.is_some() {
            set.push("areas_of_interest");
        }
        set
    }

    fn startup_fields(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.company_name.is_some() {
            set.push("company_name");
        }
        if self.company_description.is_some() {
            set.push("company_description");
        }
        if self.sectors.is_some() {
            set.push("sectors");
        }
        if self.stage.is_some() {
            set.push("stage");
        }
        if self.hiring_status.is_some() {
            set.push("hiring_status");
        }
        if self.founder_names.is_some() {
            set.push("founder_names");
        }
        set
    }

    /// Rejects fields that belong to a different role than `role`.
    pub fn validate_for(&self, role: Role) -> Result<(), AppError> {
        let foreign = match role {
            Role::Student => self.startup_fields(),
            Role::Startup => self.student_fields(),
            Role::Admin => {
                let mut all = self.student_fields();
                all.extend(self.startup_fields());
                all
            }
        };
        if !foreign.is_empty() {
            return Err(AppError::Validation(format!(
                "{} not allowed for a {} profile",
                foreign.join(", "),
                role
            )));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("name cannot be empty".into()));
            }
        }
        Ok(())
    }
}

/// Profile data supplied at signup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDraft {
    pub name: String,
    pub role: Role,
    pub details: ProfilePatch,
}

impl ProfileDraft {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            details: ProfilePatch::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        self.details.validate_for(self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub startup_id: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub experience_level: ExperienceLevel,
    #[serde(default)]
    pub compensation: Option<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    pub status: ProblemStatus,
    #[serde(default)]
    pub featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applications_count: Option<i64>,
}

/// Fields a startup fills in when posting a problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemDraft {
    pub title: String,
    pub description: String,
    pub required_skills: Vec<String>,
    pub experience_level: ExperienceLevel,
    pub compensation: Option<String>,
    pub additional_info: Option<String>,
    pub deadline: Option<NaiveDate>,
}

impl ProblemDraft {
    /// Trims text, drops blank and duplicate skills, and checks required fields.
    pub fn normalized(&self) -> Result<ProblemDraft, AppError> {
        let title = self.title.trim().to_string();
        let description = self.description.trim().to_string();
        let mut skills: Vec<String> = Vec::new();
        for skill in &self.required_skills {
            let skill = skill.trim();
            if !skill.is_empty() && !skills.iter().any(|s| s == skill) {
                skills.push(skill.to_string());
            }
        }
        if title.is_empty() || description.is_empty() || skills.is_empty() {
            return Err(AppError::Validation(
                "Please fill in all required fields and add at least one required skill.".into(),
            ));
        }
        Ok(ProblemDraft {
            title,
            description,
            required_skills: skills,
            experience_level: self.experience_level,
            compensation: self.compensation.clone().filter(|c| !c.trim().is_empty()),
            additional_info: self.additional_info.clone().filter(|c| !c.trim().is_empty()),
            deadline: self.deadline,
        })
    }
}

/// Row inserted into the problems table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProblem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub startup_id: String,
    pub required_skills: Vec<String>,
    pub experience_level: ExperienceLevel,
    pub compensation: Option<String>,
    pub additional_info: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub status: ProblemStatus,
    pub featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewProblem {
    pub fn from_draft(id: String, startup_id: &str, draft: ProblemDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title,
            description: draft.description,
            startup_id: startup_id.to_string(),
            required_skills: draft.required_skills,
            experience_level: draft.experience_level,
            compensation: draft.compensation,
            additional_info: draft.additional_info,
            deadline: draft.deadline,
            status: ProblemStatus::Open,
            featured: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub problem_id: String,
    pub user_id: String,
    #[serde(default)]
    pub cover_letter: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<Problem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Profile>,
}

/// Row inserted into the applications table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewApplication {
    pub id: String,
    pub problem_id: String,
    pub user_id: String,
    pub cover_letter: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
