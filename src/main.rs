mod backend;
mod config;
mod data;
mod error;
mod filter;
mod models;
mod seed;
mod session;
mod tui;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use backend::{Backend, open_backend};
use config::Config;
use data::{DataAccess, load_or_empty};
use error::AppError;
use filter::{
    Facet, ListFilter, featured_profiles, filter_applications, filter_problems, filter_solvers,
    filter_startups, problems_for_startup, visible_problems,
};
use models::{
    Application, ApplicationStatus, ExperienceLevel, HiringStatus, ProblemDraft, ProblemStatus,
    Profile, ProfileDraft, ProfilePatch, Role,
};
use session::{Session, SessionManager};

#[derive(Parser)]
#[command(name = "solverhub")]
#[command(about = "Marketplace matching student solvers with startup problems")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init {
        /// Also load demo solvers, startups and problems
        #[arg(long)]
        demo: bool,
    },

    /// Create an account
    Signup {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Account type (student, startup)
        #[arg(short, long, default_value = "student")]
        role: Role,

        #[command(flatten)]
        details: ProfileArgs,
    },

    /// Sign in
    Login {
        #[arg(short, long, required_unless_present = "oauth")]
        email: Option<String>,

        #[arg(short, long, required_unless_present = "oauth")]
        password: Option<String>,

        /// Print the sign-in URL for an OAuth provider instead
        #[arg(long)]
        oauth: Option<String>,
    },

    /// Sign out and forget the saved session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// View or edit profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Browse and manage problems
    Problem {
        #[command(subcommand)]
        command: ProblemCommands,
    },

    /// Apply to a problem
    Apply {
        /// Problem ID
        problem_id: String,

        /// Why you are a good fit
        #[arg(short, long)]
        letter: String,
    },

    /// Track and review applications
    Application {
        #[command(subcommand)]
        command: ApplicationCommands,
    },

    /// List student solvers
    Solvers {
        #[arg(short, long)]
        search: Option<String>,

        /// Experience level (all, beginner, intermediate, advanced)
        #[arg(short, long, default_value = "all")]
        level: Facet<ExperienceLevel>,

        /// Only solvers with at least one of these skills
        #[arg(long = "skill")]
        skills: Vec<String>,

        /// Featured solvers only
        #[arg(long)]
        featured: bool,
    },

    /// List startups
    Startups {
        #[arg(short, long)]
        search: Option<String>,

        /// Featured startups only
        #[arg(long)]
        featured: bool,
    },

    /// Interactive problem browser
    Browse {
        /// Only problems posted by this startup
        #[arg(long)]
        startup: Option<String>,
    },
}

/// Optional profile fields shared by `signup` and `profile update`.
#[derive(clap::Args, Default)]
struct ProfileArgs {
    #[arg(long)]
    bio: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    website: Option<String>,
    #[arg(long)]
    linkedin: Option<String>,
    /// Comma-separated skills
    #[arg(long, value_delimiter = ',')]
    skills: Option<Vec<String>>,

    #[arg(long)]
    university: Option<String>,
    #[arg(long)]
    major: Option<String>,
    #[arg(long)]
    graduation_year: Option<String>,
    #[arg(long)]
    experience: Option<ExperienceLevel>,
    #[arg(long, value_delimiter = ',')]
    interests: Option<Vec<String>>,

    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    company_description: Option<String>,
    #[arg(long, value_delimiter = ',')]
    sectors: Option<Vec<String>>,
    #[arg(long)]
    stage: Option<String>,
    #[arg(long)]
    hiring: Option<HiringStatus>,
    #[arg(long, value_delimiter = ',')]
    founders: Option<Vec<String>>,
}

impl ProfileArgs {
    fn into_patch(self, name: Option<String>) -> ProfilePatch {
        ProfilePatch {
            name,
            bio: self.bio,
            location: self.location,
            website_url: self.website,
            linkedin_url: self.linkedin,
            skills: self.skills,
            university: self.university,
            major: self.major,
            graduation_year: self.graduation_year,
            experience_level: self.experience,
            areas_of_interest: self.interests,
            company_name: self.company,
            company_description: self.company_description,
            sectors: self.sectors,
            stage: self.stage,
            hiring_status: self.hiring,
            founder_names: self.founders,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show a profile (defaults to your own)
    Show {
        /// User ID
        id: Option<String>,
    },

    /// Update your profile
    Update {
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        details: ProfileArgs,
    },
}

#[derive(Subcommand)]
enum ProblemCommands {
    /// List problems (guests see featured problems only)
    List {
        #[arg(short, long)]
        search: Option<String>,

        /// Experience level (all, beginner, intermediate, advanced)
        #[arg(short, long, default_value = "all")]
        level: Facet<ExperienceLevel>,

        /// Only problems requiring at least one of these skills
        #[arg(long = "skill")]
        skills: Vec<String>,

        /// Only problems posted by this startup
        #[arg(long)]
        startup: Option<String>,
    },

    /// Show problem details
    Show {
        /// Problem ID
        id: String,
    },

    /// Post a new problem
    New {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        description: String,

        /// Comma-separated required skills
        #[arg(short, long, value_delimiter = ',', required = true)]
        skills: Vec<String>,

        /// Experience level (beginner, intermediate, advanced)
        #[arg(short, long, default_value = "intermediate")]
        level: ExperienceLevel,

        #[arg(short, long)]
        compensation: Option<String>,

        /// Additional information for applicants
        #[arg(long)]
        info: Option<String>,

        /// Deadline (YYYY-MM-DD)
        #[arg(long)]
        deadline: Option<NaiveDate>,
    },

    /// Change the status of a problem you posted
    Status {
        /// Problem ID
        id: String,

        /// New status (draft, open, in_progress, completed, cancelled)
        status: ProblemStatus,
    },
}

#[derive(Subcommand)]
enum ApplicationCommands {
    /// Your applications (students) or applications to your problems (startups)
    List {
        /// Filter by status (all, pending, accepted, rejected)
        #[arg(short, long, default_value = "all")]
        status: Facet<ApplicationStatus>,
    },

    /// Applications to one of your problems
    ForProblem {
        /// Problem ID
        problem_id: String,
    },

    /// Accept or reject a pending application
    Review {
        /// Application ID
        id: String,

        /// New status (accepted, rejected)
        status: ApplicationStatus,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Replaces internal failures with their user-facing message.
fn friendly(err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<AppError>() {
        Ok(app) => {
            debug!("Command failed: {app:?}");
            anyhow!(app.user_message())
        }
        Err(other) => other,
    }
}

fn require_session<'a>(sessions: &'a SessionManager, action: &'static str) -> Result<&'a Session> {
    sessions
        .current()
        .ok_or_else(|| anyhow!(AppError::NotAuthenticated(action)))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load().map_err(|e| friendly(e.into()))?;
    let backend = open_backend(&config).map_err(|e| friendly(e.into()))?;
    run(cli, &config, backend.as_ref()).map_err(friendly)
}

fn run(cli: Cli, config: &Config, backend: &dyn Backend) -> Result<()> {
    if let Commands::Init { demo } = cli.command {
        backend.init()?;
        println!("Initialized {} backend", backend.name());
        if demo || config.demo_mode {
            let report = seed::populate_database(backend)?;
            if report.skipped() {
                println!("Database already has data; demo seed skipped.");
            } else {
                println!(
                    "Loaded {} demo profiles and {} problems.",
                    report.profiles, report.problems
                );
            }
        }
        return Ok(());
    }

    backend.ensure_initialized()?;
    let mut sessions =
        SessionManager::new(backend, config.demo_mode).with_session_file(&config.session_path());
    sessions.restore();

    match cli.command {
        Commands::Init { .. } => {}

        Commands::Signup {
            email,
            password,
            name,
            role,
            details,
        } => {
            if role == Role::Admin {
                bail!("Admin accounts cannot be created from the command line.");
            }
            let draft = ProfileDraft {
                name,
                role,
                details: details.into_patch(None),
            };
            sessions.signup(&email, &password, &draft)?;
            match sessions.current() {
                Some(session) => println!(
                    "Account created. Signed in as {} ({})",
                    session.user.display_name(),
                    session.role()
                ),
                None => println!(
                    "Account created for {}. Check your email to confirm it, then log in.",
                    email.trim()
                ),
            }
        }

        Commands::Login {
            email,
            password,
            oauth,
        } => {
            if let Some(provider) = oauth {
                let url = sessions.oauth_url(&provider)?;
                println!("Open this URL to sign in with {provider}:\n{url}");
                return Ok(());
            }
            let email = email.context("--email is required")?;
            let password = password.context("--password is required")?;
            let profile = sessions.login(&email, &password)?;
            println!("Signed in as {} ({})", profile.display_name(), profile.role);
        }

        Commands::Logout => {
            sessions.logout();
            println!("Signed out.");
        }

        Commands::Whoami => match sessions.current() {
            Some(session) => {
                let user = &session.user;
                println!("{} <{}>", user.display_name(), user.email);
                println!("Role: {}", user.role);
                println!("ID: {}", user.id);
                if session.is_demo() {
                    println!("(demo account)");
                }
            }
            None => println!("Not signed in. Guests only see featured problems."),
        },

        Commands::Profile { command } => match command {
            ProfileCommands::Show { id } => {
                let data = DataAccess::new(backend, sessions.current());
                let profile = match id {
                    Some(id) => data.get_user_by_id(&id)?,
                    None => Some(require_session(&sessions, "view your profile")?.user.clone()),
                };
                match profile {
                    Some(profile) => print_profile(&profile),
                    None => println!("Profile not found."),
                }
            }

            ProfileCommands::Update { name, details } => {
                let patch = details.into_patch(name);
                if patch.is_empty() {
                    bail!("Nothing to update. Pass at least one field, e.g. --bio.");
                }
                let profile = sessions.update_user_profile(&patch)?;
                println!("Profile updated.");
                print_profile(&profile);
            }
        },

        Commands::Problem { command } => {
            let data = DataAccess::new(backend, sessions.current());
            match command {
                ProblemCommands::List {
                    search,
                    level,
                    skills,
                    startup,
                } => {
                    let signed_in = sessions.is_authenticated();
                    let loaded = load_or_empty(data.get_problems(), "problems");
                    let mut problems = visible_problems(&loaded, signed_in);
                    if let Some(startup_id) = &startup {
                        problems = problems_for_startup(&problems, startup_id);
                    }
                    let filter = ListFilter {
                        search: search.unwrap_or_default(),
                        facet: level,
                        tags: skills,
                    };
                    let problems = filter_problems(&problems, &filter);

                    if !signed_in {
                        println!("Showing featured problems. Log in to see everything.\n");
                    }
                    if problems.is_empty() {
                        println!("No problems found.");
                    } else {
                        println!(
                            "{:<36}  {:<11} {:<12} {:<30} {:<20} {:>4}",
                            "ID", "STATUS", "LEVEL", "TITLE", "STARTUP", "APPS"
                        );
                        println!("{}", "-".repeat(120));
                        for p in problems {
                            let startup = p
                                .startup
                                .as_ref()
                                .map(|s| s.display_name().to_string())
                                .unwrap_or_default();
                            println!(
                                "{:<36}  {:<11} {:<12} {:<30} {:<20} {:>4}",
                                p.id,
                                p.status.as_str(),
                                p.experience_level.as_str(),
                                truncate(&p.title, 28),
                                truncate(&startup, 18),
                                p.applications_count.unwrap_or(0)
                            );
                        }
                    }
                }

                ProblemCommands::Show { id } => match data.get_problem(&id)? {
                    Some(problem) => {
                        println!("{}", problem.title);
                        if let Some(startup) = &problem.startup {
                            println!("Posted by: {}", startup.display_name());
                        }
                        println!("Status: {}", problem.status);
                        println!("Level: {}", problem.experience_level);
                        println!("Skills: {}", problem.required_skills.join(", "));
                        if let Some(pay) = &problem.compensation {
                            println!("Compensation: {pay}");
                        }
                        if let Some(deadline) = problem.deadline {
                            println!("Deadline: {deadline}");
                        }
                        println!("Applications: {}", problem.applications_count.unwrap_or(0));
                        println!("Posted: {}", problem.created_at.format("%Y-%m-%d"));
                        println!("\n{}", textwrap::fill(&problem.description, 80));
                        if let Some(info) = &problem.additional_info {
                            println!("\n--- Additional Information ---\n{}", textwrap::fill(info, 80));
                        }
                    }
                    None => println!("Problem {id} not found."),
                },

                ProblemCommands::New {
                    title,
                    description,
                    skills,
                    level,
                    compensation,
                    info,
                    deadline,
                } => {
                    let session = require_session(&sessions, "post a problem")?;
                    let draft = ProblemDraft {
                        title,
                        description,
                        required_skills: skills,
                        experience_level: level,
                        compensation,
                        additional_info: info,
                        deadline,
                    };
                    let problem = data.create_problem(session, &draft)?;
                    println!("Posted problem {}", problem.id);
                }

                ProblemCommands::Status { id, status } => {
                    let session = require_session(&sessions, "change a problem's status")?;
                    let problem = data.update_problem_status(session, &id, status)?;
                    println!("'{}' is now {}.", problem.title, problem.status);
                }
            }
        }

        Commands::Apply { problem_id, letter } => {
            let session = require_session(&sessions, "apply to a problem")?;
            let data = DataAccess::new(backend, Some(session));
            let application = data.create_application(session, &problem_id, &letter)?;
            println!("Application {} submitted.", application.id);
        }

        Commands::Application { command } => {
            let session = require_session(&sessions, "view applications")?;
            let data = DataAccess::new(backend, Some(session));
            match command {
                ApplicationCommands::List { status } => {
                    let applications = match session.role() {
                        Role::Startup => data.get_applications_for_startup(session.user_id()),
                        _ => data.get_applications_for_user(session.user_id()),
                    };
                    let applications = load_or_empty(applications, "applications");
                    print_applications(&filter_applications(&applications, status));
                }

                ApplicationCommands::ForProblem { problem_id } => {
                    let problem = data
                        .get_problem(&problem_id)?
                        .ok_or_else(|| anyhow!("Problem {problem_id} not found."))?;
                    if problem.startup_id != session.user_id() {
                        bail!("Only the startup that posted this problem can see its applications.");
                    }
                    let applications = load_or_empty(
                        data.get_applications_for_problem(&problem_id),
                        "applications",
                    );
                    println!("Applications for '{}':\n", problem.title);
                    print_applications(&applications);
                }

                ApplicationCommands::Review { id, status } => {
                    let application = data.update_application_status(session, &id, status)?;
                    println!("Application {} is now {}.", application.id, application.status);
                }
            }
        }

        Commands::Solvers {
            search,
            level,
            skills,
            featured,
        } => {
            let data = DataAccess::new(backend, sessions.current());
            let mut solvers = load_or_empty(data.get_students(), "solvers");
            if featured {
                solvers = featured_profiles(&solvers);
            }
            let filter = ListFilter {
                search: search.unwrap_or_default(),
                facet: level,
                tags: skills,
            };
            let solvers = filter_solvers(&solvers, &filter);
            if solvers.is_empty() {
                println!("No solvers found.");
            } else {
                println!(
                    "{:<24} {:<26} {:<13} {:<40}",
                    "NAME", "UNIVERSITY", "LEVEL", "SKILLS"
                );
                println!("{}", "-".repeat(104));
                for s in solvers {
                    println!(
                        "{:<24} {:<26} {:<13} {:<40}",
                        truncate(&s.name, 22),
                        truncate(s.university.as_deref().unwrap_or("-"), 24),
                        s.experience_level.map_or("-", |l| l.as_str()),
                        truncate(&s.skills.join(", "), 38)
                    );
                }
            }
        }

        Commands::Startups { search, featured } => {
            let data = DataAccess::new(backend, sessions.current());
            let mut startups = load_or_empty(data.get_startups(), "startups");
            if featured {
                startups = featured_profiles(&startups);
            }
            let startups = filter_startups(&startups, search.as_deref().unwrap_or(""));
            if startups.is_empty() {
                println!("No startups found.");
            } else {
                println!(
                    "{:<26} {:<16} {:<36} {:<20}",
                    "COMPANY", "HIRING", "SECTORS", "LOCATION"
                );
                println!("{}", "-".repeat(100));
                for s in startups {
                    println!(
                        "{:<26} {:<16} {:<36} {:<20}",
                        truncate(s.display_name(), 24),
                        s.hiring_status.map_or("-", |h| h.label()),
                        truncate(&s.sectors.join(", "), 34),
                        truncate(s.location.as_deref().unwrap_or("-"), 18)
                    );
                }
            }
        }

        Commands::Browse { startup } => {
            tui::run_browse(backend, sessions.current(), startup.as_deref())?;
        }
    }

    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("{}", profile.display_name());
    println!("Role: {}", profile.role);
    println!("Email: {}", profile.email);
    if let Some(bio) = &profile.bio {
        println!("Bio: {bio}");
    }
    if let Some(location) = &profile.location {
        println!("Location: {location}");
    }
    if !profile.skills.is_empty() {
        println!("Skills: {}", profile.skills.join(", "));
    }
    match profile.role {
        Role::Student => {
            if let Some(university) = &profile.university {
                println!("University: {university}");
            }
            if let Some(major) = &profile.major {
                println!("Major: {major}");
            }
            if let Some(year) = &profile.graduation_year {
                println!("Graduation: {year}");
            }
            if let Some(level) = profile.experience_level {
                println!("Experience: {level}");
            }
            if !profile.areas_of_interest.is_empty() {
                println!("Interests: {}", profile.areas_of_interest.join(", "));
            }
        }
        Role::Startup => {
            if let Some(description) = &profile.company_description {
                println!("About: {description}");
            }
            if !profile.sectors.is_empty() {
                println!("Sectors: {}", profile.sectors.join(", "));
            }
            if let Some(stage) = &profile.stage {
                println!("Stage: {stage}");
            }
            if let Some(hiring) = profile.hiring_status {
                println!("Hiring: {}", hiring.label());
            }
            if !profile.founder_names.is_empty() {
                println!("Founders: {}", profile.founder_names.join(", "));
            }
        }
        Role::Admin => {}
    }
    if let Some(website) = &profile.website_url {
        println!("Website: {website}");
    }
    if let Some(linkedin) = &profile.linkedin_url {
        println!("LinkedIn: {linkedin}");
    }
}

fn print_applications(applications: &[Application]) {
    if applications.is_empty() {
        println!("No applications found.");
        return;
    }
    println!(
        "{:<36}  {:<9} {:<28} {:<20} {:<10}",
        "ID", "STATUS", "PROBLEM", "APPLICANT", "APPLIED"
    );
    println!("{}", "-".repeat(108));
    for a in applications {
        let problem = a.problem.as_ref().map_or(a.problem_id.as_str(), |p| p.title.as_str());
        let applicant = a.user.as_ref().map_or("-", |u| u.name.as_str());
        println!(
            "{:<36}  {:<9} {:<28} {:<20} {:<10}",
            a.id,
            a.status.as_str(),
            truncate(problem, 26),
            truncate(applicant, 18),
            a.created_at.format("%Y-%m-%d")
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_parse_problem_filters() {
        let cli = Cli::try_parse_from([
            "solverhub", "problem", "list", "--level", "advanced", "--skill", "Rust", "--skill", "Go",
        ])
        .unwrap();
        match cli.command {
            Commands::Problem {
                command: ProblemCommands::List { level, skills, .. },
            } => {
                assert_eq!(level, Facet::Only(ExperienceLevel::Advanced));
                assert_eq!(skills, vec!["Rust".to_string(), "Go".to_string()]);
            }
            _ => panic!("expected problem list"),
        }
    }

    #[test]
    fn test_profile_args_build_patch() {
        let cli = Cli::try_parse_from([
            "solverhub", "profile", "update", "--bio", "Hi", "--skills", "Rust,SQL",
        ])
        .unwrap();
        match cli.command {
            Commands::Profile {
                command: ProfileCommands::Update { name, details },
            } => {
                let patch = details.into_patch(name);
                assert_eq!(patch.bio.as_deref(), Some("Hi"));
                assert_eq!(patch.skills, Some(vec!["Rust".to_string(), "SQL".to_string()]));
                assert!(patch.name.is_none());
            }
            _ => panic!("expected profile update"),
        }
    }

    #[test]
    fn test_review_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["solverhub", "application", "review", "a1", "maybe"]).is_err());
        assert!(Cli::try_parse_from(["solverhub", "login"]).is_err());
        assert!(Cli::try_parse_from(["solverhub", "login", "--oauth", "github"]).is_ok());
    }
}
