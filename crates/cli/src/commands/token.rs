//! Enrollment token commands

use anyhow::{bail, Result};
use clap::Subcommand;
use peergate_common::db::now_epoch_secs;
use peergate_common::{EnrollmentToken, TokenStatus, TokenStore};
use serde::Serialize;

use super::Context;
use crate::output::{format_time, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a single-use enrollment token
    Issue {
        /// Lifetime in minutes
        #[arg(short, long, default_value_t = 60)]
        ttl_minutes: i64,

        /// Free-form note, e.g. who the token is for
        #[arg(short, long)]
        note: Option<String>,

        /// Issuer recorded with the token
        #[arg(long, env = "USER", default_value = "cli")]
        created_by: String,
    },

    /// List enrollment tokens
    List {
        /// Only show tokens that can still be redeemed
        #[arg(long)]
        active: bool,
    },
}

#[derive(Serialize)]
pub struct TokenDisplay {
    pub id: i64,
    pub short_id: String,
    pub status: TokenStatus,
    pub expires_at: i64,
    pub used_at: Option<i64>,
    pub created_by: String,
    pub note: Option<String>,
}

impl TokenDisplay {
    fn new(token: &EnrollmentToken, now: i64) -> Self {
        Self {
            id: token.id,
            short_id: token.short_id().to_string(),
            status: token.status(now),
            expires_at: token.expires_at,
            used_at: token.used_at,
            created_by: token.created_by.clone(),
            note: token.note.clone(),
        }
    }
}

impl TableDisplay for TokenDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Hash", "Status", "Expires", "Used", "By", "Note"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.short_id.clone(),
            self.status.to_string(),
            format_time(self.expires_at),
            self.used_at.map(format_time).unwrap_or_default(),
            self.created_by.clone(),
            self.note.clone().unwrap_or_default(),
        ]
    }
}

pub fn execute(cmd: TokenCommands, ctx: &Context) -> Result<()> {
    let store = TokenStore::new(ctx.db.clone());

    match cmd {
        TokenCommands::Issue {
            ttl_minutes,
            note,
            created_by,
        } => {
            let Some(ttl_secs) = ttl_minutes.checked_mul(60) else {
                bail!("ttl of {} minutes is too large", ttl_minutes);
            };
            let issued = store.issue(ttl_secs, &created_by, note.as_deref())?;

            match ctx.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&issued)?),
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&issued)?),
                OutputFormat::Table => {
                    print_success(&format!(
                        "Issued enrollment token {} (expires {})",
                        issued.record.short_id(),
                        format_time(issued.record.expires_at)
                    ));
                    println!("{}", issued.token);
                    println!("The token is shown once and is valid for a single peer.");
                }
            }
        }

        TokenCommands::List { active } => {
            let now = now_epoch_secs();
            let tokens: Vec<TokenDisplay> = store
                .list()?
                .iter()
                .map(|t| TokenDisplay::new(t, now))
                .filter(|t| !active || t.status == TokenStatus::Active)
                .collect();
            print_list(&tokens, "No enrollment tokens.", ctx.format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_row() {
        let token = EnrollmentToken {
            id: 4,
            token_hash: "ab".repeat(32),
            expires_at: 100,
            used: false,
            used_at: None,
            created_by: "ops".to_string(),
            note: Some("laptop".to_string()),
            created_at: 0,
        };

        let active = TokenDisplay::new(&token, 50);
        assert_eq!(active.status, TokenStatus::Active);
        let row = active.row();
        assert_eq!(row.len(), TokenDisplay::headers().len());
        assert_eq!(row[1], "abababababab");
        assert_eq!(row[2], "active");
        assert_eq!(row[4], "");

        assert_eq!(TokenDisplay::new(&token, 100).status, TokenStatus::Expired);
    }
}
