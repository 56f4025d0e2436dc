/// User role management
///
/// Role changes are privileged mutations: they run behind the strong check and
/// the role hierarchy decides who may move whom.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthenticationEngine, Principal, Role, RoleTransition};
use crate::error::{AppError, ErrorContext};

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct ChangeRoleResponse {
    pub login: String,
    pub role: Role,
    pub transition: RoleTransition,
}

/// PUT /api/users/{login}/role
///
/// # Errors
/// - 400: Transition skips a rank or involves SUPER_ADMIN
/// - 403: Caller's rank may not act on the target or grant the role
/// - 404: No such user
/// - 409: User already holds the role
pub async fn change_role(
    actor: web::ReqData<Principal>,
    path: web::Path<String>,
    form: web::Json<ChangeRoleRequest>,
    engine: web::Data<AuthenticationEngine>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("role_change").with_login(&actor.login);
    let target = path.into_inner();

    let transition = engine.change_role(&actor, &target, form.role).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        actor = ?context.login,
        target = %target,
        "Role change completed"
    );
    Ok(HttpResponse::Ok().json(ChangeRoleResponse {
        login: target,
        role: form.role,
        transition,
    }))
}
