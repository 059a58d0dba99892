use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use throbber_widgets_tui::{BRAILLE_SIX, Throbber, ThrobberState, WhichUse};

use crate::app::App;
use crate::model::{DeviceAuthorization, Loadable, Project};
use crate::session::{ProjectView, SessionState};

const TITLE: &str = "Cloud TUI";

/// Draw router
pub fn draw_ui(f: &mut Frame<'_>, app: &mut App) {
    let area = f.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(area);

    let busy = app.is_busy();
    // session is read-only here; only the widget states are mutated
    let App { session, displayed_projects, list_state, search_mode, search_query, throbber_state, message, .. } = app;
    match session.state() {
        SessionState::Idle => draw_idle_screen(f, chunks[0]),
        SessionState::RefreshingCredential { .. } => {
            draw_busy_screen(f, throbber_state, chunks[0], " Refreshing session...")
        }
        SessionState::RequestingDeviceCode { .. } => {
            draw_busy_screen(f, throbber_state, chunks[0], " Requesting login code...")
        }
        SessionState::AwaitingAuthorization { authorization, deadline, .. } => {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            draw_authorization_screen(f, throbber_state, chunks[0], authorization, remaining.as_secs());
        }
        SessionState::ListingProjects { projects, .. } => {
            let list = ProjectList {
                displayed: displayed_projects,
                search_mode: *search_mode,
                search_query,
                list_state,
            };
            draw_projects_screen(f, throbber_state, chunks[0], projects, list)
        }
        SessionState::ViewingProject(view) => draw_project_screen(f, throbber_state, busy, chunks[0], view),
        SessionState::Error { reason, .. } => {
            draw_idle_screen(f, chunks[0]);
            draw_error_popup(f, &reason.to_string());
        }
    }

    let footer = Paragraph::new(message.clone().unwrap_or_default())
        .block(Block::default().borders(Borders::ALL).title("Message"))
        .style(Style::default().fg(Color::Cyan));
    f.render_widget(footer, chunks[1]);
}

fn titled_block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            title,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .title_alignment(Alignment::Center)
}

fn draw_idle_screen(f: &mut Frame<'_>, area: Rect) {
    let text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "Cloud project dashboard",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Press 'l' to log in with your browser, 'q' to quit."),
    ];
    let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(titled_block(TITLE));
    f.render_widget(paragraph, area);
}

/// Filter and selection state of the project list screen.
struct ProjectList<'a> {
    displayed: &'a [Project],
    search_mode: bool,
    search_query: &'a str,
    list_state: &'a mut ListState,
}

fn draw_busy_screen(f: &mut Frame<'_>, throbber_state: &mut ThrobberState, area: Rect, label: &'static str) {
    let block = titled_block(TITLE);
    let inner = block.inner(area);
    f.render_widget(block, area);
    let spinner_area = centered_rect(50, 20, inner);
    render_throbber(f, throbber_state, spinner_area, label);
}

fn draw_authorization_screen(
    f: &mut Frame<'_>,
    throbber_state: &mut ThrobberState,
    area: Rect,
    authorization: &DeviceAuthorization,
    remaining_secs: u64,
) {
    let block = titled_block("Log in");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(6), Constraint::Length(1)])
        .split(inner);

    let url = authorization
        .verification_uri_complete
        .as_deref()
        .unwrap_or(&authorization.verification_uri);
    let text = vec![
        Line::from("Open this address in a browser:"),
        Line::from(Span::styled(url.to_string(), Style::default().fg(Color::Yellow))),
        Line::from(""),
        Line::from(vec![
            Span::raw("and confirm the code "),
            Span::styled(
                authorization.user_code.clone(),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(format!("Code expires in {}s. [c: copy code] [Esc: cancel]", remaining_secs)),
    ];
    let paragraph = Paragraph::new(text).alignment(Alignment::Center).wrap(Wrap { trim: true });
    f.render_widget(paragraph, chunks[0]);
    render_throbber(f, throbber_state, chunks[1], " Waiting for authorization...");
}

fn draw_projects_screen(
    f: &mut Frame<'_>,
    throbber_state: &mut ThrobberState,
    area: Rect,
    projects: &Loadable<Vec<Project>>,
    list: ProjectList<'_>,
) {
    let title = if list.search_mode {
        format!("Projects (Search: {}_ )", list.search_query)
    } else if !list.search_query.is_empty() {
        format!("Projects (Filter: {})", list.search_query)
    } else {
        "Projects [/: filter] [r: reload] [Enter: open] [L: logout]".to_string()
    };
    let block = titled_block(&title);
    let inner = block.inner(area);

    let items: Vec<ListItem> = match projects {
        Loadable::Loading => Vec::new(),
        Loadable::Failed(e) => vec![ListItem::new(format!("Failed to load projects: {}", e))],
        Loadable::Ready(all) if all.is_empty() => vec![ListItem::new("No projects in this account")],
        Loadable::Ready(_) if list.displayed.is_empty() => vec![ListItem::new("No matching projects...")],
        Loadable::Ready(_) => list
            .displayed
            .iter()
            .map(|p| ListItem::new(format!("{}  ({} members)", p.name, p.members_count)))
            .collect(),
    };
    let widget = List::new(items)
        .block(block)
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_stateful_widget(widget, area, list.list_state);

    if projects.is_loading() {
        let spinner_area = Rect { x: inner.x + 1, y: inner.y, width: inner.width.saturating_sub(2), height: 1 };
        render_throbber(f, throbber_state, spinner_area, " Loading projects...");
    }
}

fn draw_project_screen(
    f: &mut Frame<'_>,
    throbber_state: &mut ThrobberState,
    busy: bool,
    area: Rect,
    view: &ProjectView,
) {
    let block = titled_block(&view.project.name);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50), Constraint::Length(1)])
        .split(inner);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);

    let agents = loadable_items(&view.agents, |agents| {
        agents
            .iter()
            .map(|a| ListItem::new(format!("{} {} {} [{}]", a.name, a.edition, a.version, a.status)))
            .collect()
    });
    f.render_widget(List::new(agents).block(Block::default().borders(Borders::ALL).title("Agents")), top[0]);

    let pipelines = loadable_items(&view.pipelines, |pipelines| {
        pipelines
            .iter()
            .map(|p| ListItem::new(format!("{} x{} [{}]", p.name, p.replicas_count, p.status)))
            .collect()
    });
    f.render_widget(List::new(pipelines).block(Block::default().borders(Borders::ALL).title("Pipelines")), top[1]);

    let metrics = loadable_items(&view.metrics, |snapshot| {
        if snapshot.is_empty() {
            return vec![ListItem::new("No metrics in the selected window")];
        }
        snapshot
            .latest_values()
            .into_iter()
            .map(|(measurement, plugin, metric, value)| {
                let value = value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
                ListItem::new(format!("{measurement} / {plugin} / {metric}: {value}"))
            })
            .collect()
    });
    f.render_widget(List::new(metrics).block(Block::default().borders(Borders::ALL).title("Metrics")), rows[1]);

    if busy {
        render_throbber(f, throbber_state, rows[2], " Loading...");
    } else {
        let help = Paragraph::new("[Esc/b: back] [L: logout] [q: quit]").style(Style::default().fg(Color::Gray));
        f.render_widget(help, rows[2]);
    }
}

fn loadable_items<T, F>(value: &Loadable<T>, render: F) -> Vec<ListItem<'static>>
where
    F: FnOnce(&T) -> Vec<ListItem<'static>>,
{
    match value {
        Loadable::Loading => vec![ListItem::new("Loading...")],
        Loadable::Failed(e) => vec![ListItem::new(format!("Unavailable: {}", e)).style(Style::default().fg(Color::Red))],
        Loadable::Ready(v) => {
            let items = render(v);
            if items.is_empty() { vec![ListItem::new("None")] } else { items }
        }
    }
}

fn draw_error_popup(f: &mut Frame<'_>, reason: &str) {
    let area = centered_rect(60, 30, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Error")
        .title_alignment(Alignment::Center)
        .style(Style::default().bg(Color::Red));
    let text = format!("\n{}\n\n(r) Retry / (L) Logout / (q) Quit", reason);
    let p = Paragraph::new(text)
        .block(block)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));
    f.render_widget(p, area);
}

fn render_throbber(f: &mut Frame<'_>, throbber_state: &mut ThrobberState, area: Rect, label: &'static str) {
    let throbber = Throbber::default()
        .label(label)
        .style(Style::default().fg(Color::Yellow))
        .throbber_set(BRAILLE_SIX)
        .use_type(WhichUse::Spin);
    f.render_stateful_widget(throbber, area, throbber_state);
}

/// Helper to center a rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
