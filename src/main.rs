//! ArcBind - archive reader over a dynamically loaded codec module

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use arcbind_core::abi::entry_prop;
use arcbind_core::{ArchiveSession, CodecRegistry, FileSink, FileSource};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let registry = CodecRegistry::initialize(&cli.module)
        .with_context(|| format!("loading codec module {}", cli.module.display()))?;

    match cli.command {
        Commands::Info => {
            println!("Codec module: {}", cli.module.display());
            println!();
            println!("Methods: {}", registry.methods().len());
            for method in registry.methods() {
                let name = method.name.as_deref().unwrap_or("<unnamed>");
                let mut roles = Vec::new();
                if method.decoder.is_some() {
                    roles.push("decoder");
                }
                if method.encoder.is_some() {
                    roles.push("encoder");
                }
                println!("  {} ({})", name, roles.join(", "));
            }
            println!();
            println!("Formats: {}", registry.formats().len());
            for format in registry.formats() {
                let name = format.name.as_deref().unwrap_or("<unnamed>");
                if format.signatures.is_empty() {
                    println!("  {} (no signature, fallback only)", name);
                } else {
                    println!(
                        "  {} ({} signature(s) at offset {})",
                        name,
                        format.signatures.len(),
                        format.signature_offset
                    );
                }
            }
            Ok(())
        }

        Commands::List { archive, password } => {
            let mut session = open_archive(&registry, &archive, password.as_deref())?;
            println!(
                "Archive: {} (format: {})",
                archive.display(),
                session.format_name().unwrap_or("unknown")
            );

            let count = session.entry_count()?;
            println!("Entries: {}", count);
            for index in 0..count {
                let path = session
                    .entry_string_property(index, entry_prop::PATH)
                    .unwrap_or_else(|_| format!("<entry {}>", index));
                let is_dir = session
                    .entry_bool_property(index, entry_prop::IS_DIR)
                    .unwrap_or(false);
                if is_dir {
                    println!("  {:>12}  {}/", "-", path);
                } else {
                    let size = session
                        .entry_long_property(index, entry_prop::SIZE)
                        .unwrap_or(0);
                    println!("  {:>12}  {}", size, path);
                }
            }
            session.close()?;
            Ok(())
        }

        Commands::Extract {
            archive,
            output,
            password,
        } => {
            let mut session = open_archive(&registry, &archive, password.as_deref())?;
            let count = session.entry_count()?;
            println!(
                "Extracting {} entries from {} (format: {})",
                count,
                archive.display(),
                session.format_name().unwrap_or("unknown")
            );

            let pb = ProgressBar::new(count as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );

            let mut extracted = 0usize;
            for index in 0..count {
                let path = session
                    .entry_string_property(index, entry_prop::PATH)
                    .unwrap_or_else(|_| format!("entry-{}", index));
                pb.set_message(path.clone());

                let is_dir = session
                    .entry_bool_property(index, entry_prop::IS_DIR)
                    .unwrap_or(false);
                let target = output.join(sanitize_entry_path(&path));
                if is_dir {
                    fs::create_dir_all(&target)
                        .with_context(|| format!("creating directory {}", target.display()))?;
                } else {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("creating directory {}", parent.display()))?;
                    }
                    let sink = FileSink::create(&target)
                        .with_context(|| format!("creating {}", target.display()))?;
                    session
                        .extract_entry(index, password.as_deref(), Box::new(sink))
                        .with_context(|| format!("extracting {}", path))?;
                    extracted += 1;
                }
                pb.inc(1);
            }

            pb.finish_with_message("Complete");
            println!("Extracted {} files to {}", extracted, output.display());
            session.close()?;
            Ok(())
        }
    }
}

fn open_archive(
    registry: &CodecRegistry,
    archive: &Path,
    password: Option<&str>,
) -> Result<ArchiveSession> {
    let source = FileSource::open(archive)
        .with_context(|| format!("opening {}", archive.display()))?;
    let session = ArchiveSession::open(registry, Box::new(source), password)
        .with_context(|| format!("no registered format matched {}", archive.display()))?;
    Ok(session)
}

/// Keeps only the normal components of an archived path so an entry
/// cannot escape the output directory.
fn sanitize_entry_path(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}
