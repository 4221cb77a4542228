pub mod admin;
pub mod server;

// The match over actions lives in run.rs.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    CreateAdmin(admin::CreateArgs),
    ResetAdmins(admin::ResetArgs),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
