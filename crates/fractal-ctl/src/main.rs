//! fractal-ctl — command-line front end for the fractal content loader.

use std::path::PathBuf;

use anyhow::{Context, Result};

use fractal_core::FractalConfig;

mod cmd;

fn print_usage() {
    println!("Usage: fractal-ctl [--store <dir>] [--manifest <path>] <command>");
    println!();
    println!("Commands:");
    println!("  load <site> [--out <path>]   Load a site and write its content");
    println!("  scan <site>                  List a site's leaves without fetching them");
    println!("  sites                        List sites in the manifest");
    println!("  config                       Show the effective configuration");
    println!("  config init                  Write the default config file if missing");
    println!();
    println!("Options:");
    println!("  --store <dir>       Chunk directory (overrides store.chunk_dir)");
    println!("  --manifest <path>   Site manifest (overrides store.manifest_path)");
    println!("  --out <path>        Output file for load (default: <site>.out)");
    println!();
    println!("Set RUST_LOG=info to see progress.");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = FractalConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FractalConfig::default()
    });

    let mut out: Option<PathBuf> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--store" => {
                i += 1;
                config.store.chunk_dir = args.get(i).context("--store requires a value")?.into();
            }
            "--manifest" => {
                i += 1;
                config.store.manifest_path =
                    args.get(i).context("--manifest requires a value")?.into();
            }
            "--out" => {
                i += 1;
                out = Some(args.get(i).context("--out requires a value")?.into());
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["load", site] => cmd::load::run(&config, site, out.as_deref()).await,
        ["scan", site] => cmd::scan::run(&config, site).await,
        ["sites"] => cmd::scan::list_sites(&config),
        ["config"] => cmd::config::show(&config),
        ["config", "init"] => cmd::config::init(),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
