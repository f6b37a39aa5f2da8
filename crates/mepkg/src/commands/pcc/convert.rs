use clap::Args;
use me_pcc::{Package, SaveOptions, SaveStatus};
use miette::Result;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct ConvertArgs {
    /// A package file to rewrite in place
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Recompress the payload region
    #[arg(long, conflicts_with = "decompress")]
    compress: bool,

    /// Store the payload region uncompressed
    #[arg(long)]
    decompress: bool,
}

impl ConvertArgs {
    pub fn handle(&self) -> Result<()> {
        let package = Package::open(&self.file)?;

        let status = package.save(
            SaveOptions::builder()
                .force_compress(self.compress)
                .force_decompress(self.decompress)
                .build(),
        )?;

        match status {
            SaveStatus::Changed => info!("rewrote {}", self.file.display()),
            SaveStatus::Unchanged => info!("{} left untouched", self.file.display()),
        }

        Ok(())
    }
}
