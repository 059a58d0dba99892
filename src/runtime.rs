use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::CloudApi;
use crate::auth::AuthProvider;
use crate::config::MetricsConfig;
use crate::error::ApiError;
use crate::fetch::fetch_all;
use crate::metrics::MetricsRefreshLoop;
use crate::model::{AccessCredential, AgentMetrics, AppEvent, Command, MetricsSnapshot, Pipeline};
use crate::store::{self, CREDENTIAL_KEY, CredentialStore};

/// Builds an API client bound to a credential.
pub type ApiFactory = Box<dyn Fn(&AccessCredential) -> Arc<dyn CloudApi> + Send>;

/// Runs the commands the session issues. Every spawned task reports back by
/// sending one or more [`AppEvent`]s; none of them touch session state.
pub struct Executor {
    tx: UnboundedSender<AppEvent>,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn CredentialStore>,
    api_factory: ApiFactory,
    api: Option<Arc<dyn CloudApi>>,
    metrics: MetricsConfig,
    login_scope: CancellationToken,
    /// Requests made with the current credential; cancelled on logout.
    account_scope: CancellationToken,
    view_scope: CancellationToken,
}

impl Executor {
    pub fn new(
        tx: UnboundedSender<AppEvent>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn CredentialStore>,
        api_factory: ApiFactory,
        metrics: MetricsConfig,
    ) -> Self {
        Self {
            tx,
            auth,
            store,
            api_factory,
            api: None,
            metrics,
            login_scope: CancellationToken::new(),
            account_scope: CancellationToken::new(),
            view_scope: CancellationToken::new(),
        }
    }

    /// Cancels every background task.
    pub fn shutdown(&mut self) {
        self.login_scope.cancel();
        self.account_scope.cancel();
        self.view_scope.cancel();
    }

    pub fn run_all(&mut self, commands: Vec<Command>) {
        for command in commands {
            self.run(command);
        }
    }

    pub fn run(&mut self, command: Command) {
        debug!("Executing {:?}", CommandLabel(&command));
        match command {
            Command::CancelLogin => self.login_scope.cancel(),
            Command::CancelView => self.view_scope.cancel(),
            Command::RequestDeviceCode { epoch } => {
                let scope = renew(&mut self.login_scope);
                let auth = self.auth.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = scope.cancelled() => return,
                        result = auth.request_device_code() => result,
                    };
                    let _ = tx.send(AppEvent::DeviceCodeReceived { epoch, result, received_at: Instant::now() });
                });
            }
            Command::SchedulePoll { epoch, device_code, after } => {
                let scope = renew(&mut self.login_scope);
                let auth = self.auth.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = scope.cancelled() => return,
                        _ = tokio::time::sleep(after) => {}
                    }
                    let outcome = tokio::select! {
                        _ = scope.cancelled() => return,
                        outcome = auth.poll_token(&device_code) => outcome,
                    };
                    let _ = tx.send(AppEvent::PollOutcomeReceived { epoch, outcome });
                });
            }
            Command::RefreshCredential { epoch, refresh_token } => {
                let scope = renew(&mut self.login_scope);
                let auth = self.auth.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = scope.cancelled() => return,
                        result = auth.refresh(&refresh_token) => result,
                    };
                    let _ = tx.send(AppEvent::CredentialRefreshed { epoch, result });
                });
            }
            Command::Authenticate { credential, persist } => {
                if persist {
                    match store::save_credential(self.store.as_ref(), &credential) {
                        Ok(()) => info!("Credential saved"),
                        // the in-memory credential still works for this session
                        Err(e) => warn!("Failed to save credential: {}", e),
                    }
                }
                self.api = Some((self.api_factory)(&credential));
            }
            Command::DeleteCredential => {
                self.account_scope.cancel();
                self.api = None;
                if let Err(e) = self.store.delete(CREDENTIAL_KEY) {
                    warn!("Failed to delete stored credential: {}", e);
                }
            }
            Command::FetchProjects { epoch } => {
                let tx = self.tx.clone();
                let Some(api) = self.api.clone() else {
                    let _ = tx.send(AppEvent::ProjectsFetched { epoch, result: Err(ApiError::Unauthorized) });
                    return;
                };
                let scope = renew(&mut self.account_scope);
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = scope.cancelled() => return,
                        result = api.list_projects() => result,
                    };
                    let _ = tx.send(AppEvent::ProjectsFetched { epoch, result });
                });
            }
            Command::FetchAgents { epoch, project_id } => {
                let tx = self.tx.clone();
                let Some(api) = self.api.clone() else {
                    let _ = tx.send(AppEvent::AgentsFetched { epoch, result: Err(ApiError::Unauthorized) });
                    return;
                };
                let scope = renew(&mut self.view_scope);
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = scope.cancelled() => return,
                        result = api.list_agents(&project_id) => result,
                    };
                    let _ = tx.send(AppEvent::AgentsFetched { epoch, result });
                });
            }
            Command::FetchPipelines { epoch, project_id } => {
                let tx = self.tx.clone();
                let Some(api) = self.api.clone() else {
                    let _ = tx.send(AppEvent::PipelinesFetched { epoch, result: Err(ApiError::Unauthorized) });
                    return;
                };
                let scope = renew(&mut self.view_scope);
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = scope.cancelled() => return,
                        result = list_project_pipelines(api, project_id) => result,
                    };
                    let _ = tx.send(AppEvent::PipelinesFetched { epoch, result });
                });
            }
            Command::StartMetrics { epoch, project_id } => {
                let tx = self.tx.clone();
                let Some(api) = self.api.clone() else {
                    let _ = tx.send(AppEvent::MetricsTick { epoch, update: Err(ApiError::Unauthorized) });
                    return;
                };
                let scope = renew(&mut self.view_scope);
                let window = self.metrics.window.clone();
                let bucket = self.metrics.bucket.clone();
                let mut updates = MetricsRefreshLoop::start(scope, self.metrics.refresh, move || {
                    let api = api.clone();
                    let project_id = project_id.clone();
                    let window = window.clone();
                    let bucket = bucket.clone();
                    async move { project_metrics(api, project_id, window, bucket).await }
                });
                tokio::spawn(async move {
                    while let Some(update) = updates.recv().await {
                        if tx.send(AppEvent::MetricsTick { epoch, update }).is_err() {
                            break;
                        }
                    }
                });
            }
        }
    }
}

/// Pipelines of every core instance in the project, merged by id.
async fn list_project_pipelines(api: Arc<dyn CloudApi>, project_id: String) -> Result<Vec<Pipeline>, ApiError> {
    let instances = api.list_core_instances(&project_id).await?;
    debug!("Listing pipelines across {} core instances", instances.len());
    let ids: Vec<String> = instances.into_iter().map(|ci| ci.id).collect();
    fetch_all(ids, move |id| {
        let api = api.clone();
        async move { api.list_pipelines(&id).await }
    })
    .await
}

/// Metrics of every agent in the project, fetched concurrently and merged.
/// Any failing agent fails the whole refresh.
async fn project_metrics(
    api: Arc<dyn CloudApi>,
    project_id: String,
    window: String,
    bucket: String,
) -> Result<MetricsSnapshot, ApiError> {
    let agents = api.list_agents(&project_id).await?;
    debug!("Fetching metrics for {} agents", agents.len());
    let parts = fetch_all(agents, move |agent| {
        let api = api.clone();
        let window = window.clone();
        let bucket = bucket.clone();
        async move {
            let snapshot = api.agent_metrics(&agent.id, &window, &bucket).await?;
            Ok::<_, ApiError>(vec![AgentMetrics { agent, snapshot }])
        }
    })
    .await?;
    Ok(MetricsSnapshot::from_agents(parts))
}

/// Returns a live token for the scope, replacing it if it was cancelled.
fn renew(scope: &mut CancellationToken) -> CancellationToken {
    if scope.is_cancelled() {
        *scope = CancellationToken::new();
    }
    scope.clone()
}

/// Debug view of a command that never prints secrets.
struct CommandLabel<'a>(&'a Command);

impl std::fmt::Debug for CommandLabel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Command::Authenticate { persist, .. } => write!(f, "Authenticate {{ persist: {persist} }}"),
            Command::RefreshCredential { epoch, .. } => write!(f, "RefreshCredential {{ epoch: {epoch} }}"),
            other => write!(f, "{other:?}"),
        }
    }
}
