use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_USER_LEN;

/// Shared-password authentication. The login user name becomes the
/// reservation owner, so it must be present and reasonably short.
#[derive(Debug)]
pub struct LabdeskAuthSource {
    password: String,
}

impl LabdeskAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for LabdeskAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        match login.user() {
            Some(user) if !user.is_empty() && user.len() <= MAX_USER_LEN => {
                Ok(Password::new(None, self.password.as_bytes().to_vec()))
            }
            _ => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28000".into(),
                    "a user name is required".into(),
                ))))
            }
        }
    }
}
