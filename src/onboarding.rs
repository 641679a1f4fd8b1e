use crate::accounts::AccountRegistry;
use crate::oauth::{
    authorize_interactive, fetch_user_email, StoredToken, GMAIL_MODIFY_SCOPE, USERINFO_EMAIL_SCOPE,
};
use crate::types::Account;
use anyhow::{Context, Result};
use oauth2::Scope;
use tracing::info;

/// Run the OAuth consent flow, discover the mailbox address, store the
/// refresh token in the account directory and register the account.
pub async fn onboard_account(registry: &mut AccountRegistry) -> Result<Account> {
    let scopes = vec![
        Scope::new(GMAIL_MODIFY_SCOPE.into()),
        Scope::new(USERINFO_EMAIL_SCOPE.into()),
    ];
    let token = authorize_interactive(&scopes)
        .await
        .context("OAuth consent flow")?;
    let refresh_token = token
        .refresh_token
        .clone()
        .context("Google returned no refresh token; revoke access and try again")?;
    let email = fetch_user_email(&token.access_token)
        .await
        .context("looking up account email")?;

    let dir = registry.account_dir(&email);
    let stored = StoredToken {
        refresh_token,
        client_id: None,
        client_secret: None,
    };
    stored
        .save(&dir.join("token.json"))
        .with_context(|| format!("saving credential for {email}"))?;

    let account = registry
        .add(&email)
        .with_context(|| format!("registering {email}"))?;
    info!(account = %account.id, dir = %account.dir.display(), "Onboarded account via OAuth");
    Ok(account)
}
