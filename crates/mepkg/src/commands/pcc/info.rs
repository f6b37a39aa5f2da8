use clap::Args;
use me_pcc::Package;
use miette::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct InfoArgs {
    /// An input package file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// List every export with its payload placement
    #[arg(long, default_value_t = false)]
    exports: bool,

    /// List every name in table order
    #[arg(long, default_value_t = false)]
    names: bool,
}

impl InfoArgs {
    pub fn handle(&self) -> Result<()> {
        let package = Package::open(&self.file)?;

        println!(
            "{} {:?} ({})",
            "version:".bold(),
            package.version(),
            package.version().wire()
        );
        println!("{} {:?}", "compression:".bold(), package.compression());
        println!("{} {}", "names:".bold(), package.name_count());
        println!("{} {}", "imports:".bold(), package.import_count());
        println!("{} {}", "exports:".bold(), package.export_count());
        println!(
            "{} {:#x}",
            "payload end:".bold(),
            package.exports_end_offset()
        );

        if self.names {
            for (i, name) in package.names().enumerate() {
                println!("{:>6} {}", i.dimmed(), name);
            }
        }

        if self.exports {
            for (i, export) in package.exports().iter().enumerate() {
                println!(
                    "{:>6} {:>10} {:>10} {} ({})",
                    i.dimmed(),
                    export.data_offset(),
                    export.data_size(),
                    package.object_path(i as i32 + 1),
                    package.class_name(export.class_id()).cyan(),
                );
            }
        }

        Ok(())
    }
}
