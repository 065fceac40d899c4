//! In-memory list filtering for the browse views.
//!
//! Every function here is pure: same collection and filter in, same rows out,
//! in input order.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::models::{Application, ApplicationStatus, ExperienceLevel, Problem, Profile};

/// An enum-valued facet: everything, or one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet<T> {
    All,
    Only(T),
}

impl<T> Default for Facet<T> {
    fn default() -> Self {
        Facet::All
    }
}

impl<T: Copy + PartialEq> Facet<T> {
    pub fn admits(&self, value: Option<T>) -> bool {
        match self {
            Facet::All => true,
            Facet::Only(wanted) => value == Some(*wanted),
        }
    }

    /// Steps through `all -> values[0] -> .. -> values[n-1] -> all`.
    pub fn next(self, values: &[T]) -> Self {
        match self {
            Facet::All => values.first().map_or(Facet::All, |v| Facet::Only(*v)),
            Facet::Only(current) => {
                let pos = values.iter().position(|v| *v == current);
                match pos.and_then(|i| values.get(i + 1)) {
                    Some(v) => Facet::Only(*v),
                    None => Facet::All,
                }
            }
        }
    }
}

impl<T: fmt::Display> fmt::Display for Facet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facet::All => f.write_str("all"),
            Facet::Only(v) => v.fmt(f),
        }
    }
}

impl<T: FromStr<Err = String>> FromStr for Facet<T> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Facet::All)
        } else {
            s.parse().map(Facet::Only)
        }
    }
}

/// Search term, facet and selected tags for one list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListFilter<F> {
    pub search: String,
    pub facet: Facet<F>,
    pub tags: Vec<String>,
}

impl<F> Default for ListFilter<F> {
    fn default() -> Self {
        Self {
            search: String::new(),
            facet: Facet::All,
            tags: Vec::new(),
        }
    }
}

impl<F: Copy + PartialEq> ListFilter<F> {
    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty() && self.facet == Facet::All && self.tags.is_empty()
    }

    pub fn toggle_tag(&mut self, tag: &str) {
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
        } else {
            self.tags.push(tag.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.search.clear();
        self.facet = Facet::All;
        self.tags.clear();
    }
}

pub type ProblemFilter = ListFilter<ExperienceLevel>;
pub type SolverFilter = ListFilter<ExperienceLevel>;

fn matches<T, F: Copy + PartialEq>(
    item: &T,
    filter: &ListFilter<F>,
    fields: impl Fn(&T) -> Vec<&str>,
    facet: impl Fn(&T) -> Option<F>,
    tags: impl Fn(&T) -> &[String],
) -> bool {
    let term = filter.search.trim().to_lowercase();
    if !term.is_empty()
        && !fields(item)
            .iter()
            .any(|field| field.to_lowercase().contains(&term))
    {
        return false;
    }
    if !filter.facet.admits(facet(item)) {
        return false;
    }
    if !filter.tags.is_empty() {
        let have = tags(item);
        if !filter.tags.iter().any(|t| have.contains(t)) {
            return false;
        }
    }
    true
}

fn problem_fields(p: &Problem) -> Vec<&str> {
    let mut fields = vec![p.title.as_str(), p.description.as_str()];
    if let Some(startup) = &p.startup {
        fields.push(&startup.name);
        if let Some(company) = &startup.company_name {
            fields.push(company);
        }
    }
    fields.extend(p.required_skills.iter().map(String::as_str));
    fields
}

fn solver_fields(s: &Profile) -> Vec<&str> {
    let mut fields = vec![s.name.as_str()];
    fields.extend(s.university.as_deref());
    fields.extend(s.major.as_deref());
    fields.extend(s.skills.iter().map(String::as_str));
    fields
}

fn startup_fields(s: &Profile) -> Vec<&str> {
    let mut fields = vec![s.name.as_str()];
    fields.extend(s.company_name.as_deref());
    fields.extend(s.company_description.as_deref());
    fields.extend(s.sectors.iter().map(String::as_str));
    fields
}

pub fn problem_matches(problem: &Problem, filter: &ProblemFilter) -> bool {
    matches(
        problem,
        filter,
        problem_fields,
        |p| Some(p.experience_level),
        |p| p.required_skills.as_slice(),
    )
}

pub fn filter_problems(problems: &[Problem], filter: &ProblemFilter) -> Vec<Problem> {
    problems
        .iter()
        .filter(|p| problem_matches(p, filter))
        .cloned()
        .collect()
}

pub fn filter_solvers(solvers: &[Profile], filter: &SolverFilter) -> Vec<Profile> {
    solvers
        .iter()
        .filter(|s| {
            matches(
                *s,
                filter,
                solver_fields,
                |s| s.experience_level,
                |s| s.skills.as_slice(),
            )
        })
        .cloned()
        .collect()
}

/// Startups have no facet or tag picker; only the search term applies.
pub fn filter_startups(startups: &[Profile], search: &str) -> Vec<Profile> {
    let filter: ListFilter<ExperienceLevel> = ListFilter {
        search: search.to_string(),
        ..Default::default()
    };
    startups
        .iter()
        .filter(|s| matches(*s, &filter, startup_fields, |_| None, |s| s.sectors.as_slice()))
        .cloned()
        .collect()
}

pub fn filter_applications(
    applications: &[Application],
    status: Facet<ApplicationStatus>,
) -> Vec<Application> {
    applications
        .iter()
        .filter(|a| status.admits(Some(a.status)))
        .cloned()
        .collect()
}

/// What an unauthenticated visitor is shown: featured problems only.
/// Presentation only; the store does not enforce it.
pub fn visible_problems(problems: &[Problem], authenticated: bool) -> Vec<Problem> {
    if authenticated {
        problems.to_vec()
    } else {
        problems.iter().filter(|p| p.featured).cloned().collect()
    }
}

pub fn featured_profiles(profiles: &[Profile]) -> Vec<Profile> {
    profiles.iter().filter(|p| p.featured).cloned().collect()
}

pub fn problems_for_startup(problems: &[Problem], startup_id: &str) -> Vec<Problem> {
    problems
        .iter()
        .filter(|p| p.startup_id == startup_id)
        .cloned()
        .collect()
}

/// Sorted distinct tags across a collection, for the tag picker.
pub fn collect_tags<'a>(lists: impl IntoIterator<Item = &'a Vec<String>>) -> Vec<String> {
    lists
        .into_iter()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
