use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_USER_ID_LEN;

/// One shared server password. The startup `user` is taken as the caller's
/// user id, so it must be present and bounded.
#[derive(Debug)]
pub struct SharedPasswordSource {
    password: String,
}

impl SharedPasswordSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if user.is_empty() || user.len() > MAX_USER_ID_LEN {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".to_owned(),
                "28000".to_owned(),
                format!("user name must be 1 to {MAX_USER_ID_LEN} bytes"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
