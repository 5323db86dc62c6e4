use crate::app::App;
use crate::error::TgErrorContext;
use crate::out;
use crate::store::StoreLayout;
use crate::tg;
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub cmd: Option<AuthCommand>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Check authentication status
    Status,
    /// Remove session / logout
    Logout,
}

pub async fn run(cli: &Cli, args: &AuthArgs) -> Result<()> {
    match &args.cmd {
        Some(AuthCommand::Status) => status(cli).await,
        Some(AuthCommand::Logout) => logout(cli).await,
        None => interactive_auth(cli).await,
    }
}

async fn interactive_auth(cli: &Cli) -> Result<()> {
    let app = App::new_unauthed(cli).await?;
    let client = &app.tg.client;

    eprintln!("Starting Telegram authentication…");

    // Get phone number
    eprint!("Phone number (international format, e.g. +34612345678): ");
    io::stderr().flush()?;
    let mut phone = String::new();
    io::stdin().read_line(&mut phone)?;
    let phone = phone.trim().to_string();

    if phone.is_empty() {
        anyhow::bail!("Phone number is required");
    }

    // Request login code
    let token = client
        .request_login_code(&phone, tg::API_HASH)
        .await
        .with_context(|| format!("Failed to request login code for {}", phone))?;
    eprintln!("Login code sent via Telegram.");

    eprint!("Enter the code: ");
    io::stderr().flush()?;
    let mut code = String::new();
    io::stdin().read_line(&mut code)?;
    let code = code.trim().to_string();

    // Sign in
    use grammers_client::SignInError;
    match client.sign_in(&token, &code).await {
        Ok(user) => {
            report_signed_in(cli, user.first_name())?;
        }
        Err(SignInError::PasswordRequired(password_token)) => {
            eprintln!("Two-factor authentication required.");
            let hint = password_token
                .hint()
                .map(|s| s.to_string())
                .unwrap_or_default();
            if !hint.is_empty() {
                eprintln!("Password hint: {}", hint);
            }
            let password = rpassword::prompt_password("Enter 2FA password: ")?;
            let user = client
                .check_password(password_token, password.as_bytes().to_vec())
                .await
                .context("Failed to verify 2FA password")?;
            report_signed_in(cli, user.first_name())?;
        }
        Err(e) => {
            anyhow::bail!("Sign in failed: {}", e);
        }
    }

    Ok(())
}

fn report_signed_in(cli: &Cli, first_name: Option<&str>) -> Result<()> {
    let name = first_name.unwrap_or_default();
    if cli.output.is_json() {
        out::write_json(&serde_json::json!({
            "authenticated": true,
            "user": name,
        }))?;
    } else {
        eprintln!(
            "Authenticated as {}. Archives go to {}.",
            name,
            cli.layout().root().display()
        );
    }
    Ok(())
}

/// What `auth status` and `auth logout` report about the store.
#[derive(Debug, Serialize)]
struct SessionReport {
    authenticated: bool,
    store: PathBuf,
    session: PathBuf,
    archived_chats: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SessionReport {
    fn new(layout: &StoreLayout) -> Self {
        Self {
            authenticated: false,
            store: layout.root().to_path_buf(),
            session: layout.session_path(),
            archived_chats: layout.archived_chats().len(),
            error: None,
        }
    }

    fn text(&self) -> String {
        let state = if self.authenticated {
            "Authenticated.".to_string()
        } else if let Some(err) = &self.error {
            format!("Session exists but {}. Try `tgarchive auth`.", err)
        } else if self.session.exists() {
            "Session exists but not authenticated. Run `tgarchive auth`.".to_string()
        } else {
            "Not authenticated. Run `tgarchive auth`.".to_string()
        };
        format!(
            "{}\nStore: {} ({} archived chats)",
            state,
            self.store.display(),
            self.archived_chats
        )
    }
}

fn print_report(cli: &Cli, report: &SessionReport, text: &str) -> Result<()> {
    if cli.output.is_json() {
        out::write_json(report)?;
    } else if !cli.output.is_none() {
        println!("{}", text);
    }
    Ok(())
}

async fn status(cli: &Cli) -> Result<()> {
    let layout = cli.layout();
    let mut report = SessionReport::new(&layout);
    if report.session.exists() {
        match App::new_unauthed(cli).await {
            Ok(app) => report.authenticated = app.tg.is_authorized().await?,
            Err(e) => {
                log::debug!("Connecting for auth status failed: {:#}", e);
                report.error = Some("failed to connect".to_string());
            }
        }
    }
    print_report(cli, &report, &report.text())
}

async fn logout(cli: &Cli) -> Result<()> {
    let layout = cli.layout();
    let session_path = layout.session_path();
    if !session_path.exists() {
        anyhow::bail!("No session found. Nothing to logout from.");
    }

    let app = App::new_unauthed(cli).await?;
    app.tg
        .client
        .sign_out()
        .await
        .context_invoke("auth.logOut")?;
    drop(app);
    std::fs::remove_file(&session_path)
        .with_context(|| format!("Failed to remove {}", session_path.display()))?;

    // Archives stay where they are.
    let report = SessionReport::new(&layout);
    let text = format!(
        "Logged out. {} archived chats are kept in {}.",
        report.archived_chats,
        report.store.display()
    );
    print_report(cli, &report, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_describes_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(dir.path());
        std::fs::create_dir_all(layout.chat_dir(5)).expect("mkdir");
        std::fs::write(layout.chat_db(5), b"").expect("touch");

        let mut report = SessionReport::new(&layout);
        assert!(!report.authenticated);
        assert_eq!(report.archived_chats, 1);
        assert!(report.text().starts_with("Not authenticated."));
        assert!(report.text().contains("(1 archived chats)"));

        std::fs::write(layout.session_path(), b"").expect("touch");
        report.error = Some("failed to connect".into());
        assert!(report.text().starts_with("Session exists but failed to connect."));

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["archived_chats"], 1);
        assert_eq!(json["error"], "failed to connect");
        report.error = None;
        report.authenticated = true;
        let json = serde_json::to_value(&report).expect("json");
        assert!(json.get("error").is_none());
        assert!(report.text().starts_with("Authenticated."));
    }
}
