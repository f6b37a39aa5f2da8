use clap::Args;
use me_pcc::Package;
use miette::{Context, IntoDiagnostic, Result};
use std::{fs::File, io::Write, path::PathBuf};
use tracing::info;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input package file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Index of the export whose payload should be extracted
    #[arg(short, long)]
    id: usize,

    /// A target file for the payload bytes
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let mut package = Package::open(&self.file)?;
        let data = package.export_data(self.id)?;

        info!(
            "writing {} bytes of {} to {}",
            data.len(),
            package.object_path(self.id as i32 + 1),
            self.output.display()
        );

        let mut out = if !self.overwrite {
            File::create_new(&self.output)
                .into_diagnostic()
                .context(format!("creating {}", &self.output.display()))?
        } else {
            File::create(&self.output)
                .into_diagnostic()
                .context(format!("creating {}", &self.output.display()))?
        };
        out.write_all(&data).into_diagnostic()?;

        Ok(())
    }
}
