use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::submission::create_submission))
        .routes(routes!(
            handlers::submission::get_submission,
            handlers::submission::cancel_submission
        ))
        .routes(routes!(handlers::submission::submission_events))
        .routes(routes!(handlers::health::health))
        .routes(routes!(handlers::health::ready))
}
