//! Applies a stream of lifecycle commands to a [`PaymentRailService`].

use super::csv::command_reader::{Command, CommandError};
use crate::application::service::PaymentRailService;
use crate::domain::authorization::AuthorizationId;
use crate::error::{RailError, Result};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub failed: usize,
}

/// Runs every command in order. A failing command is logged and counted;
/// it never stops the batch.
pub async fn run_commands<I>(service: &PaymentRailService, commands: I) -> BatchSummary
where
    I: IntoIterator<Item = std::result::Result<Command, CommandError>>,
{
    let mut summary = BatchSummary::default();
    for command in commands {
        match command {
            Ok(command) => {
                let key = command.key().to_string();
                match apply(service, command).await {
                    Ok(()) => summary.applied += 1,
                    Err(err) => {
                        warn!(key, error = %err, "Command failed");
                        summary.failed += 1;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Skipping unreadable command");
                summary.failed += 1;
            }
        }
    }
    summary
}

pub async fn apply(service: &PaymentRailService, command: Command) -> Result<()> {
    match command {
        Command::Authorize { key, request } => {
            let auth = service.authorize_payment(request, &key).await?;
            info!(key, authorization_id = %auth.id, status = %auth.status, "Authorized");
        }
        Command::Initiate { key, request } => {
            let auth = service.initiate_payment(request, &key).await?;
            info!(key, authorization_id = %auth.id, status = %auth.status, "Initiated");
        }
        Command::Authenticate { key, response } => {
            let id = resolve(service, &key).await?;
            let auth = service.complete_authentication(id, &response).await?;
            info!(key, status = %auth.status, "Authentication answered");
        }
        Command::Confirm { key } => {
            let id = resolve(service, &key).await?;
            let result = service.confirm_payment(id).await?;
            info!(key, payment_id = %result.payment_id, "Confirmed");
        }
        Command::Cancel { key } => {
            let id = resolve(service, &key).await?;
            let result = service.cancel_authorization(id).await?;
            info!(key, cancelled = result.cancelled, status = %result.status, "Cancel processed");
        }
        Command::Reconcile { key } => {
            let id = resolve(service, &key).await?;
            let auth = service.reconcile(id).await?;
            info!(key, status = %auth.status, "Reconciled");
        }
    }
    Ok(())
}

async fn resolve(service: &PaymentRailService, key: &str) -> Result<AuthorizationId> {
    service
        .find_by_idempotency_token(key)
        .await?
        .map(|auth| auth.id)
        .ok_or_else(|| RailError::PaymentNotFound(format!("No authorization for key {}", key)))
}
