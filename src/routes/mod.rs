mod auth;
mod health_check;
mod users;

pub use auth::{
    change_password, get_current_principal, login, logout, refresh, register, AuthResponse,
    REFRESH_COOKIE, REFRESH_COOKIE_PATH,
};
pub use health_check::health_check;
pub use users::change_role;
