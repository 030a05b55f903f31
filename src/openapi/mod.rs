use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DeviceDesk API",
        version = "1.0.0",
        description = r#"
# DeviceDesk

Helpdesk API for handing out mobile handsets and SIMs, shipping them to
assignees, receiving replaced devices back and closing the assignment.

## Authentication

Every `/api/v1` endpoint requires a bearer JWT. Permissions come from the
token's `permissions` claim plus the permissions of its `roles`
(`admin`, `helpdesk`, `viewer`).

```
Authorization: Bearer <your-jwt-token>
```

## Errors

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "Assignment ... is not active",
  "request_id": "...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

`400` covers malformed input and lifecycle preconditions (re-fetch the
assignment before retrying). `409` means the device already has an active
assignment.

## Pagination

List endpoints take `page` (default 1) and `limit` (default 20, max 100).
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "devices", description = "Device registry"),
        (name = "assignments", description = "Assignment lifecycle"),
        (name = "shipping", description = "Outbound shipment tracking"),
        (name = "returns", description = "Replaced device returns")
    ),
    paths(
        crate::handlers::devices::list_devices,
        crate::handlers::devices::get_device,
        crate::handlers::devices::get_device_by_imei,
        crate::handlers::devices::create_device,
        crate::handlers::assignments::list_assignments,
        crate::handlers::assignments::get_assignment,
        crate::handlers::assignments::create_assignment,
        crate::handlers::assignments::start_shipping,
        crate::handlers::assignments::update_shipping,
        crate::handlers::assignments::mark_delivered,
        crate::handlers::assignments::register_return,
        crate::handlers::assignments::close_assignment,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::entities::DeviceStatus,
            crate::entities::AssignmentType,
            crate::entities::AssignmentStatus,
            crate::entities::ShippingStatus,
            crate::entities::ReturnStatus,
            crate::services::devices::NewDevice,
            crate::lifecycle::NewAssignment,
            crate::lifecycle::ClosureRecord,
            crate::handlers::devices::DeviceSummary,
            crate::handlers::assignments::AssignmentSummary,
            crate::handlers::assignments::ReturnRegistration,
            crate::handlers::assignments::UpdateShippingRequest,
            crate::handlers::assignments::RegisterReturnRequest,
            crate::handlers::assignments::CloseAssignmentRequest,
            crate::commands::assignments::ClosureOutcome,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_lifecycle_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("DeviceDesk API"));
        assert!(json.contains("/api/v1/assignments/{id}/shipping/start"));
        assert!(json.contains("/api/v1/assignments/{id}/return"));
        assert!(json.contains("bearer_auth"));
    }
}
