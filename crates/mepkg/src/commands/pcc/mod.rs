mod convert;
mod extract;
mod info;
mod replace;

#[derive(clap::Subcommand)]
pub enum PccCommands {
    /// Show header information and table listings for a package
    Info(info::InfoArgs),

    /// Extract one export payload into a file
    Extract(extract::ExtractArgs),

    /// Replace one export payload from a file and save the package
    Replace(replace::ReplaceArgs),

    /// Rewrite a package with its payload region compressed or uncompressed
    Convert(convert::ConvertArgs),
}

impl PccCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            PccCommands::Info(args) => args.handle(),
            PccCommands::Extract(args) => args.handle(),
            PccCommands::Replace(args) => args.handle(),
            PccCommands::Convert(args) => args.handle(),
        }
    }
}
