//! Typed create/get/update operations over the backend tables.
//!
//! Writes take the acting [`Session`] explicitly and check role and
//! ownership before they reach the store. Reads go out with the viewer's
//! credentials when there is a viewer.

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::backend::{ApplicationQuery, Auth, Backend, ProblemQuery};
use crate::error::{AppError, AppResult};
use crate::models::{
    Application, ApplicationStatus, NewApplication, NewProblem, Problem, ProblemDraft,
    ProblemStatus, Profile, ProfilePatch, Role,
};
use crate::session::Session;

pub struct DataAccess<'a> {
    backend: &'a dyn Backend,
    viewer: Option<&'a Session>,
}

fn require_role(session: &Session, role: Role, action: &str) -> AppResult<()> {
    if session.role() != role {
        return Err(AppError::Forbidden(format!("only {role} accounts can {action}")));
    }
    Ok(())
}

/// Collapses a failed list load into an empty list, logging the cause.
pub fn load_or_empty<T>(result: AppResult<Vec<T>>, what: &str) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(e) => {
            error!("Failed to load {what}: {e}");
            Vec::new()
        }
    }
}

impl<'a> DataAccess<'a> {
    pub fn new(backend: &'a dyn Backend, viewer: Option<&'a Session>) -> Self {
        Self { backend, viewer }
    }

    fn read_auth(&self) -> Auth<'a> {
        self.viewer.map_or(Auth::Anonymous, |s| s.auth())
    }

    // --- Users ---

    pub fn create_user(&self, profile: &Profile) -> AppResult<Profile> {
        self.backend
            .insert_profile(self.read_auth(), profile)
            .inspect_err(|e| error!(user_id = %profile.id, "Failed to create profile: {e}"))
    }

    pub fn get_user_by_id(&self, id: &str) -> AppResult<Option<Profile>> {
        self.backend.select_profile(self.read_auth(), id)
    }

    /// Users may only edit their own profile.
    pub fn update_user(&self, session: &Session, id: &str, patch: &ProfilePatch) -> AppResult<Profile> {
        if session.user_id() != id {
            return Err(AppError::Forbidden("you can only edit your own profile".into()));
        }
        patch.validate_for(session.role())?;
        let stamped = ProfilePatch {
            updated_at: Some(Utc::now()),
            ..patch.clone()
        };
        self.backend
            .update_profile(session.auth(), id, &stamped)?
            .ok_or_else(|| AppError::NotFound("User profile".into()))
    }

    pub fn get_students(&self) -> AppResult<Vec<Profile>> {
        self.backend.select_profiles(self.read_auth(), Some(Role::Student))
    }

    pub fn get_startups(&self) -> AppResult<Vec<Profile>> {
        self.backend.select_profiles(self.read_auth(), Some(Role::Startup))
    }

    // --- Problems ---

    pub fn create_problem(&self, session: &Session, draft: &ProblemDraft) -> AppResult<Problem> {
        require_role(session, Role::Startup, "post problems")?;
        let draft = draft.normalized()?;
        let new = NewProblem::from_draft(Uuid::new_v4().to_string(), session.user_id(), draft, Utc::now());

        let problem = self
            .backend
            .insert_problem(session.auth(), &new)
            .inspect_err(|e| error!(startup_id = %session.user_id(), "Failed to create problem: {e}"))?;
        info!(problem_id = %problem.id, startup_id = %problem.startup_id, "Problem posted");
        Ok(problem)
    }

    /// All problems, newest first, with the posting startup and the number of applications.
    pub fn get_problems(&self) -> AppResult<Vec<Problem>> {
        self.backend.select_problems(
            self.read_auth(),
            &ProblemQuery {
                startup_id: None,
                with_startup: true,
            },
        )
    }

    pub fn get_problems_by_startup_id(&self, startup_id: &str) -> AppResult<Vec<Problem>> {
        self.backend.select_problems(
            self.read_auth(),
            &ProblemQuery {
                startup_id: Some(startup_id),
                with_startup: false,
            },
        )
    }

    pub fn get_problem(&self, id: &str) -> AppResult<Option<Problem>> {
        self.backend.select_problem(self.read_auth(), id)
    }

    pub fn update_problem_status(
        &self,
        session: &Session,
        id: &str,
        status: ProblemStatus,
    ) -> AppResult<Problem> {
        let problem = self
            .backend
            .select_problem(session.auth(), id)?
            .ok_or_else(|| AppError::NotFound("Problem".into()))?;
        if problem.startup_id != session.user_id() {
            return Err(AppError::Forbidden(
                "only the startup that posted this problem can change its status".into(),
            ));
        }

        let updated = self
            .backend
            .update_problem_status(session.auth(), id, status, Utc::now())?
            .ok_or_else(|| AppError::NotFound("Problem".into()))?;
        info!(problem_id = %id, from = %problem.status, to = %status, "Problem status changed");
        Ok(updated)
    }

    // --- Applications ---

    pub fn create_application(
        &self,
        session: &Session,
        problem_id: &str,
        cover_letter: &str,
    ) -> AppResult<Application> {
        require_role(session, Role::Student, "apply to problems")?;
        let cover_letter = cover_letter.trim();
        if cover_letter.is_empty() {
            return Err(AppError::Validation("Please write a cover letter.".into()));
        }

        let problem = self
            .backend
            .select_problem(session.auth(), problem_id)?
            .ok_or_else(|| AppError::NotFound("Problem".into()))?;
        if problem.status != ProblemStatus::Open {
            return Err(AppError::Validation(format!(
                "This problem is {} and not accepting applications.",
                problem.status
            )));
        }

        let existing = self.backend.select_applications(
            session.auth(),
            &ApplicationQuery {
                user_id: Some(session.user_id()),
                problem_id: Some(problem_id),
                ..Default::default()
            },
        )?;
        if !existing.is_empty() {
            return Err(AppError::Validation("You have already applied to this problem.".into()));
        }

        let now = Utc::now();
        let new = NewApplication {
            id: Uuid::new_v4().to_string(),
            problem_id: problem_id.to_string(),
            user_id: session.user_id().to_string(),
            cover_letter: cover_letter.to_string(),
            status: ApplicationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let application = self
            .backend
            .insert_application(session.auth(), &new)
            .inspect_err(|e| error!(problem_id, "Failed to submit application: {e}"))?;
        info!(application_id = %application.id, problem_id, "Application submitted");
        Ok(application)
    }

    pub fn get_applications_for_user(&self, user_id: &str) -> AppResult<Vec<Application>> {
        self.backend.select_applications(
            self.read_auth(),
            &ApplicationQuery {
                user_id: Some(user_id),
                with_problem: true,
                ..Default::default()
            },
        )
    }

    pub fn get_applications_for_problem(&self, problem_id: &str) -> AppResult<Vec<Application>> {
        self.backend.select_applications(
            self.read_auth(),
            &ApplicationQuery {
                problem_id: Some(problem_id),
                with_user: true,
                ..Default::default()
            },
        )
    }

    /// Applications across every problem the startup posted.
    pub fn get_applications_for_startup(&self, startup_id: &str) -> AppResult<Vec<Application>> {
        let ids: Vec<String> = self
            .get_problems_by_startup_id(startup_id)?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.backend.select_applications(
            self.read_auth(),
            &ApplicationQuery {
                problem_ids: Some(&ids),
                with_problem: true,
                with_user: true,
                ..Default::default()
            },
        )
    }

    pub fn update_application_status(
        &self,
        session: &Session,
        id: &str,
        status: ApplicationStatus,
    ) -> AppResult<Application> {
        let application = self
            .backend
            .select_application(session.auth(), id)?
            .ok_or_else(|| AppError::NotFound("Application".into()))?;
        let problem = self
            .backend
            .select_problem(session.auth(), &application.problem_id)?
            .ok_or_else(|| AppError::NotFound("Problem".into()))?;
        if problem.startup_id != session.user_id() {
            return Err(AppError::Forbidden(
                "only the startup that posted this problem can review its applications".into(),
            ));
        }
        if !application.status.can_transition_to(status) {
            return Err(AppError::InvalidTransition {
                from: application.status.to_string(),
                to: status.to_string(),
            });
        }

        let updated = self
            .backend
            .update_application_status(session.auth(), id, status, Utc::now())?
            .ok_or_else(|| AppError::NotFound("Application".into()))?;
        info!(application_id = %id, to = %status, "Application reviewed");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, Store};
    use crate::models::{ExperienceLevel, fixtures};

    struct World {
        db: LocalBackend,
        startup: Session,
        student: Session,
    }

    fn world() -> World {
        let db = LocalBackend::in_memory().unwrap();
        let startup = db.insert_profile(Auth::Anonymous, &fixtures::startup("s1", "Acme")).unwrap();
        let student = db.insert_profile(Auth::Anonymous, &fixtures::student("u1", "Ada")).unwrap();
        World {
            db,
            startup: Session { access_token: None, user: startup },
            student: Session { access_token: None, user: student },
        }
    }

    fn draft() -> ProblemDraft {
        ProblemDraft {
            title: "Build an ingestion pipeline".into(),
            description: "Stream events into the warehouse".into(),
            required_skills: vec!["Rust".into(), "Kafka".into()],
            experience_level: ExperienceLevel::Intermediate,
            compensation: Some("$2,000".into()),
            additional_info: None,
            deadline: None,
        }
    }

    #[test]
    fn test_end_to_end_review_flow() {
        let w = world();
        let data = DataAccess::new(&w.db, None);

        let problem = data.create_problem(&w.startup, &draft()).unwrap();
        assert_eq!(problem.status, ProblemStatus::Open);
        assert!(!problem.featured);
        assert_eq!(problem.startup_id, "s1");

        let application = data
            .create_application(&w.student, &problem.id, "I have built three of these")
            .unwrap();
        assert_eq!(application.status, ApplicationStatus::Pending);

        let reviewed = data
            .update_application_status(&w.startup, &application.id, ApplicationStatus::Accepted)
            .unwrap();
        assert_eq!(reviewed.status, ApplicationStatus::Accepted);

        let mine = data.get_applications_for_user("u1").unwrap();
        assert_eq!(mine[0].status, ApplicationStatus::Accepted);
        assert_eq!(mine[0].problem.as_ref().unwrap().title, problem.title);

        let refreshed = data.get_problem(&problem.id).unwrap().unwrap();
        assert_eq!(refreshed.applications_count, Some(1));
    }

    #[test]
    fn test_transitions_are_one_way() {
        let w = world();
        let data = DataAccess::new(&w.db, None);
        let problem = data.create_problem(&w.startup, &draft()).unwrap();
        let app = data.create_application(&w.student, &problem.id, "Hi").unwrap();

        data.update_application_status(&w.startup, &app.id, ApplicationStatus::Rejected)
            .unwrap();
        let err = data
            .update_application_status(&w.startup, &app.id, ApplicationStatus::Accepted)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        let err = data
            .update_application_status(&w.startup, &app.id, ApplicationStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_role_and_ownership_guards() {
        let w = world();
        let data = DataAccess::new(&w.db, None);

        assert!(matches!(
            data.create_problem(&w.student, &draft()),
            Err(AppError::Forbidden(_))
        ));
        let problem = data.create_problem(&w.startup, &draft()).unwrap();
        assert!(matches!(
            data.create_application(&w.startup, &problem.id, "Hi"),
            Err(AppError::Forbidden(_))
        ));

        let other = w
            .db
            .insert_profile(Auth::Anonymous, &fixtures::startup("s2", "Rival"))
            .unwrap();
        let rival = Session { access_token: None, user: other };
        assert!(matches!(
            data.update_problem_status(&rival, &problem.id, ProblemStatus::Cancelled),
            Err(AppError::Forbidden(_))
        ));

        let app = data.create_application(&w.student, &problem.id, "Hi").unwrap();
        assert!(matches!(
            data.update_application_status(&rival, &app.id, ApplicationStatus::Accepted),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            data.update_user(&w.student, "s1", &ProfilePatch::default()),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_applications_need_open_problem_and_letter() {
        let w = world();
        let data = DataAccess::new(&w.db, None);
        let problem = data.create_problem(&w.startup, &draft()).unwrap();

        assert!(matches!(
            data.create_application(&w.student, &problem.id, "   "),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            data.create_application(&w.student, "missing", "Hi"),
            Err(AppError::NotFound(_))
        ));

        data.create_application(&w.student, &problem.id, "Hi").unwrap();
        assert!(matches!(
            data.create_application(&w.student, &problem.id, "Again"),
            Err(AppError::Validation(_))
        ));

        data.update_problem_status(&w.startup, &problem.id, ProblemStatus::Completed)
            .unwrap();
        let other = w
            .db
            .insert_profile(Auth::Anonymous, &fixtures::student("u2", "Grace"))
            .unwrap();
        let grace = Session { access_token: None, user: other };
        let err = data.create_application(&grace, &problem.id, "Late").unwrap_err();
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_applications_for_startup() {
        let w = world();
        let data = DataAccess::new(&w.db, None);
        assert!(data.get_applications_for_startup("s1").unwrap().is_empty());

        let first = data.create_problem(&w.startup, &draft()).unwrap();
        let second = data.create_problem(&w.startup, &draft()).unwrap();
        data.create_application(&w.student, &first.id, "One").unwrap();
        data.create_application(&w.student, &second.id, "Two").unwrap();

        let apps = data.get_applications_for_startup("s1").unwrap();
        assert_eq!(apps.len(), 2);
        assert!(apps.iter().all(|a| a.user.as_ref().map(|u| u.name.as_str()) == Some("Ada")));
        assert!(apps.iter().all(|a| a.problem.is_some()));

        let for_problem = data.get_applications_for_problem(&first.id).unwrap();
        assert_eq!(for_problem.len(), 1);
        assert_eq!(for_problem[0].cover_letter, "One");
    }

    #[test]
    fn test_profile_listings_and_update() {
        let w = world();
        let data = DataAccess::new(&w.db, Some(&w.student));
        assert_eq!(data.get_students().unwrap().len(), 1);
        assert_eq!(data.get_startups().unwrap()[0].display_name(), "Acme");

        let patch = ProfilePatch {
            location: Some("Berlin".into()),
            ..Default::default()
        };
        let updated = data.update_user(&w.student, "u1", &patch).unwrap();
        assert_eq!(updated.location.as_deref(), Some("Berlin"));
        assert_eq!(
            data.get_user_by_id("u1").unwrap().unwrap().location.as_deref(),
            Some("Berlin")
        );
    }

    #[test]
    fn test_create_user_rejects_duplicate_id() {
        let w = world();
        let data = DataAccess::new(&w.db, None);
        let created = data.create_user(&fixtures::student("u2", "Grace")).unwrap();
        assert_eq!(created.role, Role::Student);
        assert_eq!(data.get_students().unwrap().len(), 2);

        let err = data.create_user(&fixtures::student("u2", "Grace again")).unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(data.get_user_by_id("u2").unwrap().unwrap().name, "Grace");
    }

    #[test]
    fn test_load_or_empty() {
        let failed: AppResult<Vec<i32>> = Err(AppError::NotFound("Problem".into()));
        assert!(load_or_empty(failed, "problems").is_empty());
        assert_eq!(load_or_empty(Ok(vec![1, 2]), "problems"), vec![1, 2]);
    }
}
