use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::auth::next_interval;
use crate::error::{ApiError, SessionError};
use crate::model::{
    AccessCredential, Agent, AppEvent, Command, DeviceAuthorization, Epoch, Loadable, MetricsSnapshot, Pipeline,
    PollOutcome, Project,
};

/// A stored credential this close to expiry is treated as expired.
pub const CREDENTIAL_LEEWAY: Duration = Duration::from_secs(60);

/// Stand-in deadline for device codes whose lifetime does not fit the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What `retry` does from the error screen.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    Login,
    Projects,
    Project { project: Project, projects: Vec<Project> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectView {
    pub epoch: Epoch,
    pub project: Project,
    /// List to return to on back.
    pub projects: Vec<Project>,
    pub agents: Loadable<Vec<Agent>>,
    pub pipelines: Loadable<Vec<Pipeline>>,
    pub metrics: Loadable<Arc<MetricsSnapshot>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    RefreshingCredential {
        epoch: Epoch,
    },
    RequestingDeviceCode {
        epoch: Epoch,
    },
    AwaitingAuthorization {
        epoch: Epoch,
        authorization: DeviceAuthorization,
        interval: Duration,
        deadline: tokio::time::Instant,
    },
    ListingProjects {
        epoch: Epoch,
        projects: Loadable<Vec<Project>>,
    },
    ViewingProject(ProjectView),
    Error {
        reason: SessionError,
        recovery: Recovery,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::RefreshingCredential { .. } => "refreshing-credential",
            SessionState::RequestingDeviceCode { .. } => "requesting-device-code",
            SessionState::AwaitingAuthorization { .. } => "awaiting-authorization",
            SessionState::ListingProjects { .. } => "listing-projects",
            SessionState::ViewingProject(_) => "viewing-project",
            SessionState::Error { .. } => "error",
        }
    }
}

/// Session state plus the epoch counter used to tag async scopes.
///
/// [`Session::update`] is the only way state changes. It never performs I/O;
/// it returns [`Command`]s whose results come back later as events tagged
/// with the epoch they were issued under. Events from an older epoch are
/// dropped.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    last_epoch: Epoch,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self { state: SessionState::Idle, last_epoch: 0 }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn update(mut self, event: AppEvent) -> (Self, Vec<Command>) {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        let from = state.name();
        let (next, commands) = self.transition(state, event);
        if from != next.name() {
            info!("Session {} -> {}", from, next.name());
        }
        self.state = next;
        (self, commands)
    }

    fn next_epoch(&mut self) -> Epoch {
        self.last_epoch += 1;
        self.last_epoch
    }

    fn transition(&mut self, state: SessionState, event: AppEvent) -> (SessionState, Vec<Command>) {
        use SessionState as S;

        match (state, event) {
            (_, AppEvent::UserLoggedOut) => (
                S::Idle,
                vec![Command::CancelLogin, Command::CancelView, Command::DeleteCredential],
            ),

            (S::AwaitingAuthorization { deadline, .. }, AppEvent::Tick(now)) if now >= deadline => {
                warn!("Device authorization window elapsed without approval");
                login_failed(SessionError::AuthorizationExpired)
            }

            (S::Idle, AppEvent::LoginRequested) => self.start_login(),

            (S::Idle, AppEvent::CredentialLoaded { credential, now }) => {
                if !credential.is_expired(now, CREDENTIAL_LEEWAY) {
                    debug!("Resuming stored credential");
                    return self.authenticated(credential, false);
                }
                match credential.refresh_token {
                    Some(refresh_token) => {
                        let epoch = self.next_epoch();
                        (
                            S::RefreshingCredential { epoch },
                            vec![Command::RefreshCredential { epoch, refresh_token }],
                        )
                    }
                    None => self.start_login(),
                }
            }

            (S::RefreshingCredential { epoch }, AppEvent::CredentialRefreshed { epoch: e, result }) if e == epoch => {
                match result {
                    Ok(credential) => self.authenticated(credential, true),
                    Err(err) => {
                        warn!("Refresh grant failed, falling back to device login: {}", err);
                        self.start_login()
                    }
                }
            }

            (S::RequestingDeviceCode { epoch }, AppEvent::DeviceCodeReceived { epoch: e, result, received_at })
                if e == epoch =>
            {
                match result {
                    Ok(authorization) => {
                        let interval = authorization.interval;
                        let deadline = login_deadline(received_at, authorization.expires_in);
                        let device_code = authorization.device_code.clone();
                        (
                            S::AwaitingAuthorization { epoch, authorization, interval, deadline },
                            vec![Command::SchedulePoll { epoch, device_code, after: interval }],
                        )
                    }
                    Err(err) => login_failed(err.into()),
                }
            }

            (S::RequestingDeviceCode { .. } | S::AwaitingAuthorization { .. }, AppEvent::UserCancelled) => {
                (S::Idle, vec![Command::CancelLogin])
            }

            (
                S::AwaitingAuthorization { epoch, authorization, interval, deadline },
                AppEvent::PollOutcomeReceived { epoch: e, outcome },
            ) if e == epoch => match outcome {
                PollOutcome::Pending | PollOutcome::SlowDown => {
                    let interval = next_interval(interval, &outcome);
                    let device_code = authorization.device_code.clone();
                    (
                        S::AwaitingAuthorization { epoch, authorization, interval, deadline },
                        vec![Command::SchedulePoll { epoch, device_code, after: interval }],
                    )
                }
                PollOutcome::Success(credential) => self.authenticated(credential, true),
                PollOutcome::Expired => login_failed(SessionError::AuthorizationExpired),
                PollOutcome::Denied => login_failed(SessionError::AccessDenied),
                PollOutcome::TransportError(err) => login_failed(err.into()),
            },

            (S::ListingProjects { epoch, .. }, AppEvent::ProjectsFetched { epoch: e, result }) if e == epoch => {
                match result {
                    Ok(projects) => (S::ListingProjects { epoch, projects: Loadable::Ready(projects) }, vec![]),
                    Err(err) => {
                        let recovery = match err {
                            ApiError::Unauthorized => Recovery::Login,
                            _ => Recovery::Projects,
                        };
                        (S::Error { reason: err.into(), recovery }, vec![])
                    }
                }
            }

            (S::ListingProjects { projects: Loadable::Ready(_), .. }, AppEvent::UserReloadedProjects) => {
                self.list_projects()
            }

            (S::ListingProjects { projects: Loadable::Ready(projects), .. }, AppEvent::UserSelectedProject(project)) => {
                self.open_project(project, projects)
            }

            (S::ViewingProject(mut view), AppEvent::AgentsFetched { epoch, result }) if epoch == view.epoch => {
                match result {
                    Ok(agents) => {
                        view.agents = Loadable::Ready(agents);
                        (S::ViewingProject(view), vec![])
                    }
                    Err(err) => view_failed(view, err),
                }
            }

            (S::ViewingProject(mut view), AppEvent::PipelinesFetched { epoch, result }) if epoch == view.epoch => {
                match result {
                    Ok(pipelines) => {
                        view.pipelines = Loadable::Ready(pipelines);
                        (S::ViewingProject(view), vec![])
                    }
                    Err(err) => view_failed(view, err),
                }
            }

            (S::ViewingProject(mut view), AppEvent::MetricsTick { epoch, update }) if epoch == view.epoch => {
                match update {
                    Ok(snapshot) => view.metrics = Loadable::Ready(snapshot),
                    Err(ApiError::Unauthorized) => return view_failed(view, ApiError::Unauthorized),
                    // only the first fetch reports errors; keep whatever is already shown
                    Err(err) if view.metrics.is_loading() => view.metrics = Loadable::Failed(err.to_string()),
                    Err(err) => debug!("Ignoring metrics error over a valid snapshot: {}", err),
                }
                (S::ViewingProject(view), vec![])
            }

            (S::ViewingProject(view), AppEvent::UserWentBack) => {
                let epoch = self.next_epoch();
                (
                    S::ListingProjects { epoch, projects: Loadable::Ready(view.projects) },
                    vec![Command::CancelView],
                )
            }

            (S::Error { recovery, .. }, AppEvent::UserRetried) => match recovery {
                Recovery::Login => self.start_login(),
                Recovery::Projects => self.list_projects(),
                Recovery::Project { project, projects } => self.open_project(project, projects),
            },

            (state, AppEvent::Tick(_)) => (state, vec![]),

            (state, event) => {
                debug!("Ignoring {} in state {}", event_label(&event), state.name());
                (state, vec![])
            }
        }
    }

    fn start_login(&mut self) -> (SessionState, Vec<Command>) {
        let epoch = self.next_epoch();
        (
            SessionState::RequestingDeviceCode { epoch },
            vec![Command::CancelLogin, Command::RequestDeviceCode { epoch }],
        )
    }

    fn authenticated(&mut self, credential: AccessCredential, persist: bool) -> (SessionState, Vec<Command>) {
        let epoch = self.next_epoch();
        (
            SessionState::ListingProjects { epoch, projects: Loadable::Loading },
            vec![
                Command::Authenticate { credential, persist },
                Command::FetchProjects { epoch },
            ],
        )
    }

    fn list_projects(&mut self) -> (SessionState, Vec<Command>) {
        let epoch = self.next_epoch();
        (
            SessionState::ListingProjects { epoch, projects: Loadable::Loading },
            vec![Command::FetchProjects { epoch }],
        )
    }

    fn open_project(&mut self, project: Project, projects: Vec<Project>) -> (SessionState, Vec<Command>) {
        let epoch = self.next_epoch();
        let project_id = project.id.clone();
        let view = ProjectView {
            epoch,
            project,
            projects,
            agents: Loadable::Loading,
            pipelines: Loadable::Loading,
            metrics: Loadable::Loading,
        };
        (
            SessionState::ViewingProject(view),
            vec![
                Command::CancelView,
                Command::FetchAgents { epoch, project_id: project_id.clone() },
                Command::FetchPipelines { epoch, project_id: project_id.clone() },
                Command::StartMetrics { epoch, project_id },
            ],
        )
    }
}

fn login_deadline(received_at: tokio::time::Instant, expires_in: Duration) -> tokio::time::Instant {
    received_at
        .checked_add(expires_in)
        .or_else(|| received_at.checked_add(FAR_FUTURE))
        .unwrap_or(received_at)
}

fn login_failed(reason: SessionError) -> (SessionState, Vec<Command>) {
    (
        SessionState::Error { reason, recovery: Recovery::Login },
        vec![Command::CancelLogin],
    )
}

fn view_failed(view: ProjectView, err: ApiError) -> (SessionState, Vec<Command>) {
    let recovery = match err {
        ApiError::Unauthorized => Recovery::Login,
        _ => Recovery::Project { project: view.project, projects: view.projects },
    };
    (
        SessionState::Error { reason: err.into(), recovery },
        vec![Command::CancelView],
    )
}

fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::LoginRequested => "LoginRequested",
        AppEvent::CredentialLoaded { .. } => "CredentialLoaded",
        AppEvent::CredentialRefreshed { .. } => "CredentialRefreshed",
        AppEvent::DeviceCodeReceived { .. } => "DeviceCodeReceived",
        AppEvent::PollOutcomeReceived { .. } => "PollOutcomeReceived",
        AppEvent::ProjectsFetched { .. } => "ProjectsFetched",
        AppEvent::AgentsFetched { .. } => "AgentsFetched",
        AppEvent::PipelinesFetched { .. } => "PipelinesFetched",
        AppEvent::MetricsTick { .. } => "MetricsTick",
        AppEvent::UserSelectedProject(_) => "UserSelectedProject",
        AppEvent::UserReloadedProjects => "UserReloadedProjects",
        AppEvent::UserWentBack => "UserWentBack",
        AppEvent::UserCancelled => "UserCancelled",
        AppEvent::UserRetried => "UserRetried",
        AppEvent::UserLoggedOut => "UserLoggedOut",
        AppEvent::Tick(_) => "Tick",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use time::OffsetDateTime;
    use tokio::time::Instant;

    fn authorization(interval: u64, expires_in: u64) -> DeviceAuthorization {
        DeviceAuthorization {
            device_code: "d1".into(),
            user_code: "ABCD-EFGH".into(),
            verification_uri: "https://auth.example.test/activate".into(),
            verification_uri_complete: None,
            expires_in: Duration::from_secs(expires_in),
            interval: Duration::from_secs(interval),
            issued_at: OffsetDateTime::now_utc(),
        }
    }

    fn credential(expires_in: u64) -> AccessCredential {
        AccessCredential::issued("at".into(), Some("rt".into()), expires_in, OffsetDateTime::now_utc()).unwrap()
    }

    fn project(id: &str) -> Project {
        Project { id: id.into(), name: format!("project {id}"), members_count: 1 }
    }

    fn current_epoch(session: &Session) -> Epoch {
        match session.state() {
            SessionState::RefreshingCredential { epoch }
            | SessionState::RequestingDeviceCode { epoch }
            | SessionState::AwaitingAuthorization { epoch, .. }
            | SessionState::ListingProjects { epoch, .. } => *epoch,
            SessionState::ViewingProject(view) => view.epoch,
            other => panic!("no epoch in {other:?}"),
        }
    }

    /// Idle -> RequestingDeviceCode -> AwaitingAuthorization.
    fn awaiting(interval: u64, expires_in: u64, received_at: Instant) -> Session {
        let (session, _) = Session::new().update(AppEvent::LoginRequested);
        let epoch = current_epoch(&session);
        let (session, _) = session.update(AppEvent::DeviceCodeReceived {
            epoch,
            result: Ok(authorization(interval, expires_in)),
            received_at,
        });
        session
    }

    fn poll(session: Session, outcome: PollOutcome) -> (Session, Vec<Command>) {
        let epoch = current_epoch(&session);
        session.update(AppEvent::PollOutcomeReceived { epoch, outcome })
    }

    fn viewing(id: &str) -> Session {
        let (session, _) = poll(awaiting(1, 30, Instant::now()), PollOutcome::Success(credential(3600)));
        let epoch = current_epoch(&session);
        let (session, _) = session.update(AppEvent::ProjectsFetched {
            epoch,
            result: Ok(vec![project("p1"), project("p2")]),
        });
        let (session, _) = session.update(AppEvent::UserSelectedProject(project(id)));
        session
    }

    #[test]
    fn test_login_requests_device_code() {
        let (session, commands) = Session::new().update(AppEvent::LoginRequested);
        let epoch = current_epoch(&session);
        assert!(matches!(session.state(), SessionState::RequestingDeviceCode { .. }));
        assert_eq!(commands, vec![Command::CancelLogin, Command::RequestDeviceCode { epoch }]);
    }

    #[test]
    fn test_device_code_schedules_first_poll_after_interval() {
        let (session, _) = Session::new().update(AppEvent::LoginRequested);
        let epoch = current_epoch(&session);
        let (session, commands) = session.update(AppEvent::DeviceCodeReceived {
            epoch,
            result: Ok(authorization(5, 900)),
            received_at: Instant::now(),
        });
        assert!(matches!(session.state(), SessionState::AwaitingAuthorization { .. }));
        assert_eq!(
            commands,
            vec![Command::SchedulePoll { epoch, device_code: "d1".into(), after: Duration::from_secs(5) }]
        );
    }

    #[test]
    fn test_pending_keeps_interval() {
        let session = awaiting(5, 900, Instant::now());
        let (session, commands) = poll(session, PollOutcome::Pending);
        assert!(matches!(
            commands.as_slice(),
            [Command::SchedulePoll { after, .. }] if *after == Duration::from_secs(5)
        ));
        let (_, commands) = poll(session, PollOutcome::Pending);
        assert!(matches!(
            commands.as_slice(),
            [Command::SchedulePoll { after, .. }] if *after == Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_slow_down_strictly_increases_interval() {
        let mut session = awaiting(5, 900, Instant::now());
        let mut previous = Duration::from_secs(5);
        for _ in 0..3 {
            let (next, commands) = poll(session, PollOutcome::SlowDown);
            let after = match commands.as_slice() {
                [Command::SchedulePoll { after, .. }] => *after,
                other => panic!("unexpected {other:?}"),
            };
            assert!(after > previous);
            previous = after;
            session = next;
        }
        // a pending after slow_down keeps the slower interval
        let (_, commands) = poll(session, PollOutcome::Pending);
        assert!(matches!(commands.as_slice(), [Command::SchedulePoll { after, .. }] if *after == previous));
    }

    #[test]
    fn test_success_persists_and_lists_projects() {
        let cred = credential(3600);
        let (session, commands) = poll(awaiting(1, 30, Instant::now()), PollOutcome::Success(cred.clone()));
        let epoch = current_epoch(&session);
        assert_eq!(
            session.state(),
            &SessionState::ListingProjects { epoch, projects: Loadable::Loading }
        );
        assert_eq!(
            commands,
            vec![Command::Authenticate { credential: cred, persist: true }, Command::FetchProjects { epoch }]
        );
    }

    #[test]
    fn test_terminal_outcomes_stop_polling() {
        for (outcome, reason) in [
            (PollOutcome::Expired, SessionError::AuthorizationExpired),
            (PollOutcome::Denied, SessionError::AccessDenied),
            (
                PollOutcome::TransportError(AuthError::Transport("connection refused".into())),
                SessionError::Transport("connection refused".into()),
            ),
        ] {
            let (session, commands) = poll(awaiting(1, 30, Instant::now()), outcome);
            assert_eq!(commands, vec![Command::CancelLogin]);
            assert_eq!(session.state(), &SessionState::Error { reason, recovery: Recovery::Login });
        }
    }

    #[test]
    fn test_stale_poll_outcome_is_ignored() {
        let session = awaiting(1, 30, Instant::now());
        let epoch = current_epoch(&session);
        let (session, commands) = session.update(AppEvent::PollOutcomeReceived {
            epoch: epoch - 1,
            outcome: PollOutcome::Denied,
        });
        assert!(commands.is_empty());
        assert!(matches!(session.state(), SessionState::AwaitingAuthorization { .. }));
    }

    #[test]
    fn test_deadline_elapsing_is_terminal() {
        let start = Instant::now();
        let session = awaiting(1, 30, start);
        let (session, commands) = session.update(AppEvent::Tick(start + Duration::from_secs(29)));
        assert!(commands.is_empty());
        assert!(matches!(session.state(), SessionState::AwaitingAuthorization { .. }));

        let (session, commands) = session.update(AppEvent::Tick(start + Duration::from_secs(30)));
        assert_eq!(commands, vec![Command::CancelLogin]);
        assert!(matches!(
            session.state(),
            SessionState::Error { reason: SessionError::AuthorizationExpired, .. }
        ));
    }

    #[test]
    fn test_unbounded_device_code_lifetime_saturates() {
        let start = Instant::now();
        let session = awaiting(1, u64::MAX, start);
        let (session, commands) = session.update(AppEvent::Tick(start + Duration::from_secs(3600)));
        assert!(commands.is_empty());
        assert!(matches!(session.state(), SessionState::AwaitingAuthorization { .. }));
    }

    #[test]
    fn test_user_cancel_returns_to_idle() {
        let (session, commands) = awaiting(1, 30, Instant::now()).update(AppEvent::UserCancelled);
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(commands, vec![Command::CancelLogin]);
    }

    #[test]
    fn test_device_code_error_is_classified() {
        let (session, _) = Session::new().update(AppEvent::LoginRequested);
        let epoch = current_epoch(&session);
        let (session, _) = session.update(AppEvent::DeviceCodeReceived {
            epoch,
            result: Err(AuthError::Provider {
                status: 403,
                error: "unauthorized_client".into(),
                description: None,
            }),
            received_at: Instant::now(),
        });
        assert!(matches!(
            session.state(),
            SessionState::Error { reason: SessionError::Provider(_), recovery: Recovery::Login }
        ));
    }

    #[test]
    fn test_selecting_project_starts_view_scope() {
        let (session, _) = poll(awaiting(1, 30, Instant::now()), PollOutcome::Success(credential(3600)));
        let epoch = current_epoch(&session);
        let (session, _) = session.update(AppEvent::ProjectsFetched { epoch, result: Ok(vec![project("p1")]) });
        let (session, commands) = session.update(AppEvent::UserSelectedProject(project("p1")));
        let view_epoch = current_epoch(&session);
        assert_eq!(
            commands,
            vec![
                Command::CancelView,
                Command::FetchAgents { epoch: view_epoch, project_id: "p1".into() },
                Command::FetchPipelines { epoch: view_epoch, project_id: "p1".into() },
                Command::StartMetrics { epoch: view_epoch, project_id: "p1".into() },
            ]
        );
    }

    #[test]
    fn test_metrics_tick_swaps_snapshot_and_refresh_errors_keep_it() {
        let session = viewing("p1");
        let epoch = current_epoch(&session);
        let snapshot = Arc::new(MetricsSnapshot::default());
        let (session, commands) = session.update(AppEvent::MetricsTick { epoch, update: Ok(snapshot.clone()) });
        assert!(commands.is_empty());
        let (session, _) = session.update(AppEvent::MetricsTick {
            epoch,
            update: Err(ApiError::Transport("blip".into())),
        });
        match session.state() {
            SessionState::ViewingProject(view) => assert_eq!(view.metrics, Loadable::Ready(snapshot)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_initial_metrics_error_is_shown() {
        let session = viewing("p1");
        let epoch = current_epoch(&session);
        let (session, _) = session.update(AppEvent::MetricsTick {
            epoch,
            update: Err(ApiError::Transport("down".into())),
        });
        match session.state() {
            SessionState::ViewingProject(view) => assert!(matches!(view.metrics, Loadable::Failed(_))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_going_back_cancels_view_and_drops_late_results() {
        let session = viewing("p1");
        let view_epoch = current_epoch(&session);
        let (session, commands) = session.update(AppEvent::UserWentBack);
        assert_eq!(commands, vec![Command::CancelView]);
        match session.state() {
            SessionState::ListingProjects { projects: Loadable::Ready(list), .. } => assert_eq!(list.len(), 2),
            other => panic!("unexpected {other:?}"),
        }

        let before = session.state().clone();
        let (session, commands) = session.update(AppEvent::MetricsTick {
            epoch: view_epoch,
            update: Ok(Arc::new(MetricsSnapshot::default())),
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), &before);
    }

    #[test]
    fn test_agent_failure_offers_reopening_the_project() {
        let session = viewing("p2");
        let epoch = current_epoch(&session);
        let (session, commands) = session.update(AppEvent::AgentsFetched {
            epoch,
            result: Err(ApiError::Status { status: 500, message: "oops".into() }),
        });
        assert_eq!(commands, vec![Command::CancelView]);
        let (session, commands) = session.update(AppEvent::UserRetried);
        assert!(matches!(session.state(), SessionState::ViewingProject(v) if v.project.id == "p2"));
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn test_unauthorized_projects_requires_login() {
        let (session, _) = poll(awaiting(1, 30, Instant::now()), PollOutcome::Success(credential(3600)));
        let epoch = current_epoch(&session);
        let (session, _) = session.update(AppEvent::ProjectsFetched { epoch, result: Err(ApiError::Unauthorized) });
        assert!(matches!(
            session.state(),
            SessionState::Error { reason: SessionError::Unauthorized, recovery: Recovery::Login }
        ));
        let (session, commands) = session.update(AppEvent::UserRetried);
        assert!(matches!(session.state(), SessionState::RequestingDeviceCode { .. }));
        assert!(commands.contains(&Command::RequestDeviceCode { epoch: current_epoch(&session) }));
    }

    #[test]
    fn test_logout_from_any_state() {
        for session in [Session::new(), awaiting(1, 30, Instant::now()), viewing("p1")] {
            let (session, commands) = session.update(AppEvent::UserLoggedOut);
            assert_eq!(session.state(), &SessionState::Idle);
            assert_eq!(
                commands,
                vec![Command::CancelLogin, Command::CancelView, Command::DeleteCredential]
            );
        }
    }

    #[test]
    fn test_valid_stored_credential_skips_login() {
        let cred = credential(3600);
        let (session, commands) = Session::new().update(AppEvent::CredentialLoaded {
            credential: cred.clone(),
            now: OffsetDateTime::now_utc(),
        });
        assert!(matches!(session.state(), SessionState::ListingProjects { .. }));
        assert_eq!(commands[0], Command::Authenticate { credential: cred, persist: false });
    }

    #[test]
    fn test_expired_stored_credential_is_refreshed() {
        let cred = credential(30);
        let (session, commands) = Session::new().update(AppEvent::CredentialLoaded {
            credential: cred,
            now: OffsetDateTime::now_utc(),
        });
        let epoch = current_epoch(&session);
        assert_eq!(commands, vec![Command::RefreshCredential { epoch, refresh_token: "rt".into() }]);

        let (session, commands) = session.update(AppEvent::CredentialRefreshed {
            epoch,
            result: Err(AuthError::Transport("down".into())),
        });
        assert!(matches!(session.state(), SessionState::RequestingDeviceCode { .. }));
        assert!(matches!(commands.last(), Some(Command::RequestDeviceCode { .. })));
    }

    #[test]
    fn test_expired_credential_without_refresh_token_logs_in() {
        let mut cred = credential(0);
        cred.refresh_token = None;
        let (session, _) = Session::new().update(AppEvent::CredentialLoaded {
            credential: cred,
            now: OffsetDateTime::now_utc(),
        });
        assert!(matches!(session.state(), SessionState::RequestingDeviceCode { .. }));
    }

    #[test]
    fn test_error_state_ignores_navigation() {
        let (session, _) = poll(awaiting(1, 30, Instant::now()), PollOutcome::Denied);
        let before = session.state().clone();
        let (session, commands) = session.update(AppEvent::UserSelectedProject(project("p1")));
        assert!(commands.is_empty());
        assert_eq!(session.state(), &before);
    }
}
