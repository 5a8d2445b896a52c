use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Culler API",
        version = "0.3.0",
        description = "Collect and unfollow accounts from a following list."
    ),
    paths(
        crate::routes::start_harvest,
        crate::routes::get_harvest,
        crate::routes::start_execution,
        crate::routes::stop,
        crate::routes::scroll_to_bottom,
        crate::routes::get_progress,
        crate::routes::events,
        crate::routes::list_exclusions,
        crate::routes::set_retained,
        crate::routes::get_logs,
        crate::routes::reset,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::AccountResponse,
        crate::dto::AccountInput,
        crate::dto::StartHarvestRequest,
        crate::dto::StartExecutionRequest,
        crate::dto::RunStartedResponse,
        crate::dto::StopResponse,
        crate::dto::HarvestResponse,
        crate::dto::ProgressResponse,
        crate::dto::ExclusionListResponse,
        crate::dto::RetainRequest,
        crate::dto::LogEntryResponse,
        crate::dto::LogListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "harvest", description = "Account collection"),
        (name = "execution", description = "Batch unfollow runs"),
        (name = "progress", description = "Progress snapshots and live events"),
        (name = "exclusions", description = "Accounts kept out of every batch"),
        (name = "system", description = "Health, logs and state"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some("API key. Set via CULLER_SERVER_API_KEY."))
                        .build(),
                ),
            );
        }
    }
}
