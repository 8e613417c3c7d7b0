use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::routing::head;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "loghive API",
        description = "loghive 日志接收 API",
    ),
    tags(
        (name = "Receiver", description = "日志包接收"),
        (name = "Health", description = "服务健康检查")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (api_router, api_spec) = api::routes().split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(api_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", head(api::liveness))
        .merge(api_router)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/v1/openapi.json", spec))
        .layer(cors)
        .layer(CatchPanicLayer::custom(api::handle_panic))
        .layer(middleware::from_fn(logging::request_logging))
}
