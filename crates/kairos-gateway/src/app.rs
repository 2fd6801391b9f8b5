use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use kairos_core::KairosConfig;
use kairos_dispatcher::Dispatcher;

use crate::http::{actions, dispatcher, health, jobs, programs, schedulers, servers};

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: KairosConfig,
    /// Cheap to clone into blocking tasks.
    pub dispatcher: Dispatcher,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: KairosConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            started_at: Instant::now(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Timed control
        .route("/jobs/run", get(jobs::run))
        .route("/jobs/stop", get(jobs::stop))
        .route("/jobs/count", get(jobs::count))
        .route("/jobs/are_running", get(jobs::are_running))
        .route("/jobs/clear", get(jobs::clear))
        // actions
        .route("/actions", get(actions::list))
        .route(
            "/actions/{name}",
            get(actions::get_one)
                .post(actions::add)
                .put(actions::set)
                .delete(actions::delete),
        )
        .route(
            "/actions/{name}/execute",
            get(actions::execute).post(actions::execute_with_rez),
        )
        // schedulers: bulk operations first, static segments win over {name}
        .route("/schedulers", get(schedulers::list))
        .route("/schedulers/reschedule_all", get(schedulers::reschedule_all))
        .route("/schedulers/unschedule_all", get(schedulers::unschedule_all))
        .route("/schedulers/action_count", get(schedulers::action_count))
        .route("/schedulers/clear_scheduling", get(schedulers::clear_scheduling))
        .route(
            "/schedulers/deferred_action_count",
            get(schedulers::deferred_action_count),
        )
        .route(
            "/schedulers/expiring_action_count",
            get(schedulers::expiring_action_count),
        )
        .route(
            "/schedulers/clear_deferred_actions",
            get(schedulers::clear_deferred_actions),
        )
        .route(
            "/schedulers/clear_expiring_actions",
            get(schedulers::clear_expiring_actions),
        )
        .route(
            "/schedulers/{name}",
            get(schedulers::get_one)
                .post(schedulers::add)
                .put(schedulers::set)
                .delete(schedulers::delete),
        )
        .route("/schedulers/{name}/unschedule", get(schedulers::unschedule))
        .route("/schedulers/{name}/reschedule", get(schedulers::reschedule))
        .route(
            "/schedulers/{name}/actions/{action}",
            get(schedulers::bind).delete(schedulers::unbind),
        )
        .route("/schedulers/{name}/actions/{action}/defer", post(schedulers::defer))
        .route("/schedulers/{name}/actions/{action}/expire", post(schedulers::expire))
        // programs
        .route("/programs", get(programs::list))
        .route("/programs/deferred_count", get(programs::deferred_count))
        .route("/programs/clear_deferred", get(programs::clear_deferred))
        .route(
            "/programs/{name}",
            get(programs::get_one)
                .post(programs::add)
                .put(programs::set)
                .delete(programs::delete),
        )
        .route("/programs/{name}/schedule", post(programs::schedule))
        // servers
        .route("/servers", get(servers::list))
        .route("/servers/by_tags", post(servers::by_tags))
        .route("/servers/execute_on_tags", post(servers::execute_on_tags))
        .route(
            "/servers/{name}",
            get(servers::get_one)
                .post(servers::add)
                .put(servers::set)
                .delete(servers::delete),
        )
        .route(
            "/servers/{name}/actions/{action}/execute",
            get(servers::execute).post(servers::execute_with_rez),
        )
        .route(
            "/servers/{name}/actions/{action}/execute_with_rez",
            post(servers::execute_with_rez),
        )
        .route("/servers/{name}/execution", post(servers::execute_supplied))
        .route(
            "/servers/{name}/tags/{key}",
            post(servers::add_tags).delete(servers::delete_key),
        )
        .route("/servers/{name}/tags/{key}/{tag}", axum::routing::delete(servers::delete_tag))
        // supplied actions
        .route("/execution", post(actions::execute_supplied))
        .route("/execution/with_rez", post(actions::execute_supplied_with_rez))
        // admin
        .route("/dispatcher/load", get(dispatcher::load).post(dispatcher::load))
        .route("/dispatcher/save", get(dispatcher::save).post(dispatcher::save))
        .route("/dispatcher/clear", get(dispatcher::clear).post(dispatcher::clear))
        .route(
            "/dispatcher/saved_dir",
            get(dispatcher::saved_dir).post(dispatcher::set_saved_dir),
        )
        .route("/dispatcher/saved", get(dispatcher::list_saved))
        .route("/dispatcher/describe_all", get(dispatcher::describe_all))
        .route("/dispatcher/counts", get(dispatcher::counts))
        .route("/dispatcher/state", get(dispatcher::state))
        .route("/dispatcher/replace", post(dispatcher::replace))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
