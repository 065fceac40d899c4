//! Demo data for `solverhub init --demo` and demo-mode startup.

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::backend::{Auth, Backend};
use crate::error::AppResult;
use crate::models::{
    ExperienceLevel, HiringStatus, NewProblem, ProblemStatus, Profile, ProfileDraft, ProfilePatch,
    Role,
};
use crate::session::{DEMO_STARTUP_EMAIL, DEMO_STUDENT_EMAIL, demo_profile};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub profiles: usize,
    pub problems: usize,
}

impl SeedReport {
    pub fn skipped(&self) -> bool {
        self.profiles == 0 && self.problems == 0
    }
}

struct SolverSeed {
    name: &'static str,
    university: &'static str,
    major: &'static str,
    level: ExperienceLevel,
    skills: &'static [&'static str],
    featured: bool,
}

const SOLVERS: &[SolverSeed] = &[
    SolverSeed {
        name: "Priya Natarajan",
        university: "Stanford University",
        major: "Computer Science",
        level: ExperienceLevel::Advanced,
        skills: &["Python", "Machine Learning", "Data Science"],
        featured: true,
    },
    SolverSeed {
        name: "Jordan Lee",
        university: "University of Michigan",
        major: "Human-Computer Interaction",
        level: ExperienceLevel::Intermediate,
        skills: &["UI/UX Design", "Figma", "Web Design"],
        featured: true,
    },
    SolverSeed {
        name: "Samuel Okafor",
        university: "Georgia Tech",
        major: "Software Engineering",
        level: ExperienceLevel::Beginner,
        skills: &["JavaScript", "React Native", "Mobile Development"],
        featured: false,
    },
];

struct StartupSeed {
    email: &'static str,
    name: &'static str,
    description: &'static str,
    sectors: &'static [&'static str],
    stage: &'static str,
    hiring: HiringStatus,
    location: &'static str,
    founders: &'static [&'static str],
    website: &'static str,
}

const STARTUPS: &[StartupSeed] = &[
    StartupSeed {
        email: "info@techwave.com",
        name: "TechWave Solutions",
        description: "Building innovative AI solutions for enterprise customers.",
        sectors: &["AI", "Enterprise Software", "SaaS"],
        stage: "seed",
        hiring: HiringStatus::Hiring,
        location: "San Francisco, CA",
        founders: &["Alex Johnson", "Maria Garcia"],
        website: "https://techwave.example.com",
    },
    StartupSeed {
        email: "contact@greengrow.com",
        name: "GreenGrow",
        description: "Sustainable agriculture technology solutions.",
        sectors: &["AgTech", "Sustainability", "IoT"],
        stage: "series-a",
        hiring: HiringStatus::FutureHiring,
        location: "Boulder, CO",
        founders: &["Sarah Chen", "Michael Rodriguez"],
        website: "https://greengrow.example.com",
    },
];

struct ProblemSeed {
    startup: usize,
    title: &'static str,
    description: &'static str,
    skills: &'static [&'static str],
    level: ExperienceLevel,
    compensation: &'static str,
    info: &'static str,
    featured: bool,
}

const PROBLEMS: &[ProblemSeed] = &[
    ProblemSeed {
        startup: 0,
        title: "Build a React Native Mobile App",
        description: "We need a skilled developer to build a cross-platform mobile application for our startup.",
        skills: &["React Native", "JavaScript", "Mobile Development"],
        level: ExperienceLevel::Intermediate,
        compensation: "$2000-$3000",
        info: "This is a 4-6 week project with potential for ongoing work.",
        featured: true,
    },
    ProblemSeed {
        startup: 0,
        title: "Design a New Product Landing Page",
        description: "Looking for a UI/UX designer to create a compelling landing page for our new SaaS product.",
        skills: &["UI/UX Design", "Figma", "Web Design"],
        level: ExperienceLevel::Beginner,
        compensation: "$500-$1000",
        info: "Should be completed within 2 weeks.",
        featured: false,
    },
    ProblemSeed {
        startup: 1,
        title: "Implement Machine Learning Model",
        description: "We need help implementing a recommendation algorithm for our e-commerce platform.",
        skills: &["Python", "Machine Learning", "Data Science"],
        level: ExperienceLevel::Advanced,
        compensation: "$3000-$4000",
        info: "This is a challenging project requiring strong ML skills.",
        featured: true,
    },
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn solver_profile(seed: &SolverSeed) -> Profile {
    let mut draft = ProfileDraft::new(seed.name, Role::Student);
    draft.details = ProfilePatch {
        university: Some(seed.university.into()),
        major: Some(seed.major.into()),
        experience_level: Some(seed.level),
        skills: Some(strings(seed.skills)),
        ..Default::default()
    };
    let slug = seed.name.to_lowercase().replace(' ', ".");
    let mut profile = Profile::from_draft(
        &Uuid::new_v4().to_string(),
        &format!("{slug}@students.example.edu"),
        &draft,
        Utc::now(),
    );
    profile.featured = seed.featured;
    profile
}

fn startup_profile(seed: &StartupSeed) -> Profile {
    let mut draft = ProfileDraft::new(seed.name, Role::Startup);
    draft.details = ProfilePatch {
        company_name: Some(seed.name.into()),
        company_description: Some(seed.description.into()),
        sectors: Some(strings(seed.sectors)),
        stage: Some(seed.stage.into()),
        hiring_status: Some(seed.hiring),
        founder_names: Some(strings(seed.founders)),
        location: Some(seed.location.into()),
        website_url: Some(seed.website.into()),
        ..Default::default()
    };
    let mut profile = Profile::from_draft(&Uuid::new_v4().to_string(), seed.email, &draft, Utc::now());
    profile.featured = true;
    profile
}

/// Fills an empty store with demo solvers, startups, the two demo
/// accounts and a few problems. A store that already has profiles is left
/// untouched.
pub fn populate_database(backend: &dyn Backend) -> AppResult<SeedReport> {
    if !backend.select_profiles(Auth::Anonymous, None)?.is_empty() {
        info!("Database already contains data, skipping demo seed");
        return Ok(SeedReport::default());
    }

    let mut report = SeedReport::default();
    for seed in SOLVERS {
        backend.insert_profile(Auth::Anonymous, &solver_profile(seed))?;
        report.profiles += 1;
    }

    let mut startup_ids = Vec::new();
    for seed in STARTUPS {
        let profile = backend.insert_profile(Auth::Anonymous, &startup_profile(seed))?;
        startup_ids.push(profile.id);
        report.profiles += 1;
    }

    for email in [DEMO_STUDENT_EMAIL, DEMO_STARTUP_EMAIL] {
        if let Some(profile) = demo_profile(email) {
            backend.insert_profile(Auth::Anonymous, &profile)?;
            report.profiles += 1;
        }
    }

    // Oldest first so the listing order matches the table above.
    let base = Utc::now() - Duration::minutes(PROBLEMS.len() as i64);
    for (i, seed) in PROBLEMS.iter().enumerate() {
        let at = base + Duration::minutes(i as i64);
        let problem = NewProblem {
            id: Uuid::new_v4().to_string(),
            title: seed.title.into(),
            description: seed.description.into(),
            startup_id: startup_ids[seed.startup].clone(),
            required_skills: strings(seed.skills),
            experience_level: seed.level,
            compensation: Some(seed.compensation.into()),
            additional_info: Some(seed.info.into()),
            deadline: None,
            status: ProblemStatus::Open,
            featured: seed.featured,
            created_at: at,
            updated_at: at,
        };
        backend.insert_problem(Auth::Anonymous, &problem)?;
        report.problems += 1;
    }

    info!(profiles = report.profiles, problems = report.problems, "Seeded demo data");
    Ok(report)
}
