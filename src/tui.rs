use anyhow::Result;
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::backend::Backend;
use crate::data::{DataAccess, load_or_empty};
use crate::filter::{
    ProblemFilter, collect_tags, problem_matches, problems_for_startup, visible_problems,
};
use crate::models::{ExperienceLevel, Problem, ProblemStatus};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Search,
}

struct AppState {
    problems: Vec<Problem>,
    /// Indices into `problems` that pass the filter.
    shown: Vec<usize>,
    filter: ProblemFilter,
    tags: Vec<String>,
    tag_cursor: usize,
    selected: usize,
    scroll_offset: u16,
    mode: InputMode,
    viewer_id: Option<String>,
    message: Option<String>,
}

impl AppState {
    fn new(problems: Vec<Problem>, viewer_id: Option<String>) -> Self {
        let tags = collect_tags(problems.iter().map(|p| &p.required_skills));
        let mut state = Self {
            problems,
            shown: Vec::new(),
            filter: ProblemFilter::default(),
            tags,
            tag_cursor: 0,
            selected: 0,
            scroll_offset: 0,
            mode: InputMode::Normal,
            viewer_id,
            message: None,
        };
        state.refilter();
        state
    }

    fn refilter(&mut self) {
        self.shown = self
            .problems
            .iter()
            .enumerate()
            .filter(|(_, p)| problem_matches(p, &self.filter))
            .map(|(i, _)| i)
            .collect();
        if self.selected >= self.shown.len() {
            self.selected = self.shown.len().saturating_sub(1);
        }
        self.scroll_offset = 0;
    }

    fn current_problem(&self) -> Option<&Problem> {
        self.shown.get(self.selected).and_then(|&i| self.problems.get(i))
    }

    /// Only the startup that posted a problem may change its status.
    fn can_manage(&self) -> bool {
        match (self.current_problem(), &self.viewer_id) {
            (Some(p), Some(viewer)) => &p.startup_id == viewer,
            _ => false,
        }
    }

    fn replace_current(&mut self, updated: Problem) {
        let Some(&i) = self.shown.get(self.selected) else { return };
        if let Some(slot) = self.problems.get_mut(i) {
            let startup = slot.startup.take();
            let count = slot.applications_count;
            *slot = Problem {
                startup: updated.startup.clone().or(startup),
                applications_count: updated.applications_count.or(count),
                ..updated
            };
        }
    }

    fn next(&mut self) {
        if !self.shown.is_empty() && self.selected < self.shown.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    fn push_search(&mut self, c: char) {
        self.filter.search.push(c);
        self.refilter();
    }

    fn pop_search(&mut self) {
        self.filter.search.pop();
        self.refilter();
    }

    fn cycle_facet(&mut self) {
        self.filter.facet = self.filter.facet.next(ExperienceLevel::ALL);
        self.refilter();
    }

    fn move_tag_cursor(&mut self, forward: bool) {
        if self.tags.is_empty() {
            return;
        }
        self.tag_cursor = if forward {
            (self.tag_cursor + 1) % self.tags.len()
        } else {
            (self.tag_cursor + self.tags.len() - 1) % self.tags.len()
        };
    }

    fn toggle_tag(&mut self) {
        if let Some(tag) = self.tags.get(self.tag_cursor).cloned() {
            self.filter.toggle_tag(&tag);
            self.refilter();
        }
    }

    fn clear_filters(&mut self) {
        self.filter.clear();
        self.refilter();
    }
}

pub fn run_browse(
    backend: &dyn Backend,
    session: Option<&Session>,
    startup_id: Option<&str>,
) -> Result<()> {
    let data = DataAccess::new(backend, session);
    let loaded = load_or_empty(data.get_problems(), "problems");
    let mut problems = visible_problems(&loaded, session.is_some());
    if let Some(startup_id) = startup_id {
        problems = problems_for_startup(&problems, startup_id);
    }
    if problems.is_empty() {
        println!("No problems found.");
        return Ok(());
    }

    let mut state = AppState::new(problems, session.map(|s| s.user_id().to_string()));

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, &data, session);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn set_status(state: &mut AppState, data: &DataAccess, session: Option<&Session>, status: ProblemStatus) {
    let Some(session) = session else { return };
    let Some(id) = state.current_problem().map(|p| p.id.clone()) else {
        return;
    };
    if !state.can_manage() {
        state.message = Some("Only the startup that posted this problem can change it".into());
        return;
    }
    match data.update_problem_status(session, &id, status) {
        Ok(updated) => {
            state.replace_current(updated);
            state.message = Some(format!("Marked as {status}"));
        }
        Err(e) => state.message = Some(e.user_message()),
    }
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    data: &DataAccess,
    session: Option<&Session>,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }

            if state.mode == InputMode::Search {
                match key.code {
                    KeyCode::Enter | KeyCode::Esc => state.mode = InputMode::Normal,
                    KeyCode::Backspace => state.pop_search(),
                    KeyCode::Char(c) => state.push_search(c),
                    _ => {}
                }
                list_state.select(Some(state.selected));
                continue;
            }

            state.message = None;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('/') => state.mode = InputMode::Search,
                KeyCode::Char('e') => state.cycle_facet(),
                KeyCode::Char('[') => state.move_tag_cursor(false),
                KeyCode::Char(']') => state.move_tag_cursor(true),
                KeyCode::Char('t') => state.toggle_tag(),
                KeyCode::Char('c') => state.clear_filters(),
                KeyCode::Char('o') => set_status(state, data, session, ProblemStatus::Open),
                KeyCode::Char('p') => set_status(state, data, session, ProblemStatus::InProgress),
                KeyCode::Char('d') => set_status(state, data, session, ProblemStatus::Completed),
                KeyCode::Char('x') => set_status(state, data, session, ProblemStatus::Cancelled),
                _ => {}
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    // Filter bar
    let cursor_tag = state.tags.get(state.tag_cursor).map(String::as_str).unwrap_or("-");
    let search_style = if state.mode == InputMode::Search {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let bar = Line::from(vec![
        Span::styled(format!("Search: {}", state.filter.search), search_style),
        Span::raw(format!("  Level: {}", state.filter.facet)),
        Span::raw(format!("  Tag: [{}]", cursor_tag)),
        Span::styled(
            format!("  Selected: {}", state.filter.tags.join(", ")),
            Style::default().fg(Color::Cyan),
        ),
    ]);
    frame.render_widget(
        Paragraph::new(bar).block(Block::default().borders(Borders::ALL).title(" Filters ")),
        rows[0],
    );

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[1]);

    // Left panel: problem list
    let items: Vec<ListItem> = state
        .shown
        .iter()
        .filter_map(|&i| state.problems.get(i))
        .map(|problem| {
            let status_icon = match problem.status {
                ProblemStatus::Draft => "~",
                ProblemStatus::Open => " ",
                ProblemStatus::InProgress => "*",
                ProblemStatus::Completed => "+",
                ProblemStatus::Cancelled => "x",
            };
            let featured = if problem.featured { "★" } else { " " };
            let title = if problem.title.chars().count() > 35 {
                format!("{}...", problem.title.chars().take(32).collect::<String>())
            } else {
                problem.title.clone()
            };
            ListItem::new(format!("{status_icon}{featured} {title}"))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Problems ({}/{}) ",
            state.shown.len(),
            state.problems.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: problem detail
    let detail = build_detail(state);
    let detail_widget = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    // Footer help
    let help_text = match (&state.message, state.mode) {
        (Some(message), _) => format!(" {message}"),
        (None, InputMode::Search) => " type to search  enter/esc:done".to_string(),
        (None, InputMode::Normal) if state.can_manage() => {
            " j/k:navigate  /:search e:level [/]:tag t:toggle c:clear  o:open p:progress d:done x:cancel  q:quit".to_string()
        }
        (None, InputMode::Normal) => {
            " j/k:navigate  J/K:scroll  /:search e:level [/]:tag t:toggle c:clear  q:quit".to_string()
        }
    };
    let help = Paragraph::new(help_text).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn build_detail<'a>(state: &'a AppState) -> Text<'a> {
    let Some(problem) = state.current_problem() else {
        return Text::raw("No problems match the current filters");
    };

    let mut lines: Vec<Line> = Vec::new();

    // Header
    lines.push(Line::from(Span::styled(
        &problem.title,
        Style::default().add_modifier(Modifier::BOLD),
    )));

    if let Some(startup) = &problem.startup {
        lines.push(Line::from(format!("by {}", startup.display_name())));
    }

    let status_style = match problem.status {
        ProblemStatus::Open => Style::default().fg(Color::Green),
        ProblemStatus::InProgress => Style::default().fg(Color::Yellow),
        ProblemStatus::Completed => Style::default().fg(Color::Cyan),
        ProblemStatus::Cancelled => Style::default().fg(Color::Red),
        ProblemStatus::Draft => Style::default().fg(Color::DarkGray),
    };
    lines.push(Line::from(Span::styled(
        format!("Status: {}", problem.status),
        status_style,
    )));
    lines.push(Line::from(format!("Level: {}", problem.experience_level)));

    if let Some(pay) = &problem.compensation {
        lines.push(Line::from(format!("Compensation: {pay}")));
    }
    if let Some(deadline) = problem.deadline {
        lines.push(Line::from(format!("Deadline: {}", deadline.format("%b %-d, %Y"))));
    }
    if let Some(count) = problem.applications_count {
        lines.push(Line::from(format!("Applications: {count}")));
    }
    lines.push(Line::from(Span::styled(
        format!("Skills: {}", problem.required_skills.join(", ")),
        Style::default().fg(Color::Cyan),
    )));

    lines.push(Line::from(""));
    for line in textwrap::fill(&problem.description, 70).lines() {
        lines.push(Line::from(line.to_string()));
    }

    if let Some(info) = &problem.additional_info {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Additional Information",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(info, 70).lines() {
            lines.push(Line::from(format!("  {line}")));
        }
    }

    Text::from(lines)
}
