use clap::Args;
use me_pcc::{Package, SaveOptions, SaveStatus};
use miette::{Context, IntoDiagnostic, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct ReplaceArgs {
    /// A package file to patch
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Index of the export whose payload should be replaced
    #[arg(short, long)]
    id: usize,

    /// A file holding the replacement payload
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Append the modding trailer marker
    #[arg(long, default_value_t = false)]
    marker: bool,
}

impl ReplaceArgs {
    pub fn handle(&self) -> Result<()> {
        let data = std::fs::read(&self.input)
            .into_diagnostic()
            .context(format!("path: {}", &self.input.display()))?;

        let mut package = Package::open(&self.file)?;
        info!(
            "replacing {} ({} bytes) with {} bytes",
            package.object_path(self.id as i32 + 1),
            package.export(self.id)?.data_size(),
            data.len()
        );
        package.set_export_data(self.id, data)?;

        let status = package.save(SaveOptions::builder().append_marker(self.marker).build())?;
        info!("package {}", match status {
            SaveStatus::Changed => "rewritten",
            SaveStatus::Unchanged => "unchanged",
        });

        Ok(())
    }
}
