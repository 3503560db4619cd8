//! Command-line interface for ArcBind

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arcbind")]
#[command(about = "ArcBind - archive reader over a dynamically loaded codec module", long_about = None)]
pub struct Cli {
    /// Path to the codec module shared library
    #[arg(short, long)]
    pub module: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the methods and formats the codec module registers
    Info,

    /// List archive entries
    List {
        /// Archive file
        archive: PathBuf,

        /// Password for encrypted archives
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Extract archive entries into a directory
    Extract {
        /// Input archive file
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Password for encrypted archives
        #[arg(short, long)]
        password: Option<String>,
    },
}
