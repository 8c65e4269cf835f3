//! Username/password login

use sqlmux_core::{AuthError, AuthenticationToken, LoginRequest, TokenKind};

use crate::login::{authenticator, LoginClient, LoginFields};

pub(crate) async fn login(
    client: &LoginClient,
    request: &LoginRequest,
    password: &str,
) -> Result<AuthenticationToken, AuthError> {
    if password.is_empty() {
        return Err(AuthError::invalid_credentials("password", "password is empty"));
    }

    client
        .login(
            request,
            LoginFields {
                authenticator: authenticator::PASSWORD,
                password: Some(password),
                credential_field: "password",
                ..Default::default()
            },
            TokenKind::Password,
        )
        .await
}
