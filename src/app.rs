use clipboard::{ClipboardContext, ClipboardProvider};
use crossterm::event::KeyCode;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use ratatui::widgets::ListState;
use throbber_widgets_tui::ThrobberState;
use tracing::debug;

use crate::model::{AppEvent, Command, Loadable, Project};
use crate::session::{Session, SessionState};

/// Event-loop owner: the session plus view-only state (selection, filter, spinner).
pub struct App {
    pub session: Session,
    pub projects: Vec<Project>,
    pub displayed_projects: Vec<Project>,
    pub selected: usize,
    pub list_state: ListState,
    pub search_mode: bool,
    pub search_query: String,
    pub throbber_state: ThrobberState,
    pub message: Option<String>,
    pub should_quit: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        Self {
            session: Session::new(),
            projects: Vec::new(),
            displayed_projects: Vec::new(),
            selected: 0,
            list_state,
            search_mode: false,
            search_query: String::new(),
            throbber_state: ThrobberState::default(),
            message: None,
            should_quit: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    /// Feeds one event through the session and returns the commands to run.
    pub fn dispatch(&mut self, event: AppEvent) -> Vec<Command> {
        let session = std::mem::take(&mut self.session);
        let (session, commands) = session.update(event);
        self.session = session;
        self.sync_projects();
        commands
    }

    /// Whether a spinner should be shown for the current screen.
    pub fn is_busy(&self) -> bool {
        match self.state() {
            SessionState::RefreshingCredential { .. }
            | SessionState::RequestingDeviceCode { .. }
            | SessionState::AwaitingAuthorization { .. } => true,
            SessionState::ListingProjects { projects, .. } => projects.is_loading(),
            SessionState::ViewingProject(view) => {
                view.agents.is_loading() || view.pipelines.is_loading() || view.metrics.is_loading()
            }
            SessionState::Idle | SessionState::Error { .. } => false,
        }
    }

    pub fn selected_project(&self) -> Option<Project> {
        self.displayed_projects.get(self.selected).cloned()
    }

    /// Translates a key press into a session event. Quit and purely visual keys return `None`.
    pub fn handle_key(&mut self, code: KeyCode) -> Option<AppEvent> {
        if self.search_mode {
            match code {
                KeyCode::Esc => {
                    self.search_mode = false;
                    self.search_query.clear();
                    apply_project_search(self);
                }
                KeyCode::Enter => self.search_mode = false,
                KeyCode::Backspace => {
                    self.search_query.pop();
                    apply_project_search(self);
                }
                KeyCode::Char(c) => {
                    self.search_query.push(c);
                    apply_project_search(self);
                }
                _ => {}
            }
            return None;
        }

        if code == KeyCode::Char('q') {
            self.should_quit = true;
            return None;
        }
        if code == KeyCode::Char('L') && !matches!(self.state(), SessionState::Idle) {
            self.message = Some("Logged out".into());
            return Some(AppEvent::UserLoggedOut);
        }

        match self.state() {
            SessionState::Idle => match code {
                KeyCode::Char('l') | KeyCode::Enter => Some(AppEvent::LoginRequested),
                _ => None,
            },
            SessionState::RequestingDeviceCode { .. } => match code {
                KeyCode::Esc => Some(AppEvent::UserCancelled),
                _ => None,
            },
            SessionState::AwaitingAuthorization { authorization, .. } => match code {
                KeyCode::Esc => Some(AppEvent::UserCancelled),
                KeyCode::Char('c') => {
                    let user_code = authorization.user_code.clone();
                    self.message = Some(copy_to_clipboard(&user_code, "Login code"));
                    None
                }
                _ => None,
            },
            SessionState::ListingProjects { projects, .. } => {
                if projects.ready().is_none() {
                    return None;
                }
                match code {
                    KeyCode::Down | KeyCode::Char('j') => {
                        if !self.displayed_projects.is_empty() {
                            self.selected = (self.selected + 1).min(self.displayed_projects.len() - 1);
                            self.list_state.select(Some(self.selected));
                        }
                        None
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        if self.selected > 0 {
                            self.selected -= 1;
                            self.list_state.select(Some(self.selected));
                        }
                        None
                    }
                    KeyCode::Char('/') => {
                        self.search_mode = true;
                        self.search_query.clear();
                        None
                    }
                    KeyCode::Char('r') => Some(AppEvent::UserReloadedProjects),
                    KeyCode::Enter => self.selected_project().map(AppEvent::UserSelectedProject),
                    _ => None,
                }
            }
            SessionState::ViewingProject(_) => match code {
                KeyCode::Esc | KeyCode::Backspace | KeyCode::Char('b') => Some(AppEvent::UserWentBack),
                _ => None,
            },
            SessionState::Error { .. } => match code {
                KeyCode::Char('r') | KeyCode::Enter => Some(AppEvent::UserRetried),
                _ => None,
            },
            SessionState::RefreshingCredential { .. } => None,
        }
    }

    /// Re-filters the project list when the session delivered a new one.
    fn sync_projects(&mut self) {
        let latest = match self.session.state() {
            SessionState::ListingProjects { projects: Loadable::Ready(list), .. } => list,
            _ => return,
        };
        if *latest != self.projects {
            debug!("Project list changed ({} projects)", latest.len());
            self.projects = latest.clone();
            apply_project_search(self);
        }
    }
}

/// Apply fuzzy search over project names to produce `displayed_projects`.
pub fn apply_project_search(app: &mut App) {
    if app.search_query.is_empty() {
        app.displayed_projects = app.projects.clone();
    } else {
        let matcher = SkimMatcherV2::default();
        let mut results: Vec<(i64, &Project)> = app
            .projects
            .iter()
            .filter_map(|p| matcher.fuzzy_match(&p.name, &app.search_query).map(|score| (score, p)))
            .collect();
        results.sort_by(|a, b| b.0.cmp(&a.0));
        app.displayed_projects = results.into_iter().map(|(_, p)| p.clone()).collect();
    }
    app.selected = 0;
    if app.displayed_projects.is_empty() {
        app.list_state.select(None);
    } else {
        app.list_state.select(Some(0));
    }
}

fn copy_to_clipboard(value: &str, what: &str) -> String {
    let ctx: Result<ClipboardContext, _> = ClipboardProvider::new();
    match ctx {
        Ok(mut ctx) => {
            if ctx.set_contents(value.to_string()).is_ok() {
                format!("{what} copied to clipboard")
            } else {
                "Clipboard error".into()
            }
        }
        Err(e) => format!("Clipboard init error: {}", e),
    }
}
