use super::ui;
use crate::core::credentials::Session;
use crate::core::gateway::{Gateway, Registration};
use anyhow::{Context, Result};

fn read_password(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => console::Term::stderr()
            .read_secure_line()
            .context("Failed to read password"),
    }
}

fn describe(session: &Session) -> String {
    let user = &session.user.data;
    let expiry = session
        .expires_at
        .map_or("no expiry".to_string(), |at| format!("expires {}", at.format("%Y-%m-%d %H:%M UTC")));
    format!(
        "Logged in as {} {} <{}> ({})",
        user.first_name,
        user.last_name,
        ui::style_text(&user.email, ui::StyleType::TotalLabel),
        ui::style_text(&expiry, ui::StyleType::Subtle)
    )
}

pub async fn login(gateway: &Gateway, email: &str, password: Option<String>) -> Result<()> {
    if password.is_none() {
        eprint!("Password for {email}: ");
    }
    let password = read_password(password)?;
    let session = gateway
        .login(email, &password)
        .await
        .context("Login failed")?;
    println!("{}", describe(&session));
    Ok(())
}

pub async fn register(gateway: &Gateway, registration: Registration) -> Result<()> {
    let session = gateway
        .register(&registration)
        .await
        .context("Registration failed")?;
    println!("{}", describe(&session));
    Ok(())
}

pub async fn logout(gateway: &Gateway) -> Result<()> {
    gateway.logout().await.context("Logout failed")?;
    println!("Logged out");
    Ok(())
}

/// Shows the account the stored session belongs to, as the backend sees it.
pub async fn whoami(gateway: &Gateway) -> Result<()> {
    let session = gateway
        .credentials()
        .session()
        .context("No active session; run `dealdesk login`")?;
    let user = gateway
        .current_user()
        .await
        .context("Failed to load the current user")?;
    println!("{}", describe(&session));
    println!(
        "{}",
        ui::style_text(
            &format!("{} on {} backend, member since {}", user.data.role, gateway.backend_name(), user.created_at.format("%Y-%m-%d")),
            ui::StyleType::Subtle
        )
    );
    Ok(())
}
