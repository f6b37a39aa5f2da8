pub mod pcc;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle package files
    Pcc {
        #[command(subcommand)]
        command: pcc::PccCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Pcc { command } => command.handle(),
        }
    }
}
