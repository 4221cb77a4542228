use super::{admin, server, Action};
use crate::cli::prompt::LinePrompt;
use anyhow::Result;

pub(super) async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::CreateAdmin(args) => admin::execute_create(args, &mut LinePrompt::stdin()).await,
        Action::ResetAdmins(args) => admin::execute_reset(args, &mut LinePrompt::stdin()).await,
    }
}
