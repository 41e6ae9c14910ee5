#![warn(clippy::all)]

//! Parcel Workbench command line.
//!
//! Drives the same import, share and storage core as the browser build:
//! perimeter files can be turned into share links, share links decoded back
//! into property records, and a producer's startup load replayed against a
//! directory standing in for localStorage.

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use anyhow::{bail, Context};
    use clap::{Parser, Subcommand};
    use parcel_workbench::geo::MemoryMap;
    use parcel_workbench::loader::DirectorySource;
    use parcel_workbench::settings::WorkbenchSettings;
    use parcel_workbench::share::MemoryAddressBar;
    use parcel_workbench::storage::{native::DirectoryStore, KeyValueStore};
    use parcel_workbench::Workbench;
    use std::path::{Path, PathBuf};
    use url::Url;

    #[derive(Parser)]
    #[command(name = "parcel-workbench")]
    #[command(about = "Import, share and inspect rural property perimeters")]
    pub struct Cli {
        /// Path to a JSON settings file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory standing in for the browser's localStorage
        #[arg(long, default_value = ".parcel-workbench")]
        store: PathBuf,

        /// Page address share links are built on
        #[arg(long, default_value = "http://localhost:8080/")]
        base_url: String,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// Import perimeter files, save them and print the share link
        Import {
            #[arg(required = true)]
            files: Vec<PathBuf>,
        },
        /// Decode a share token or link into property records
        Decode {
            /// A bare token or a full URL carrying one
            input: String,
        },
        /// Import perimeter files and write them as a JSON export
        Export {
            #[arg(required = true)]
            files: Vec<PathBuf>,
            /// Output file; stdout when omitted
            #[arg(short, long)]
            output: Option<PathBuf>,
        },
        /// Replay the startup load for a page address
        Load {
            url: String,
            /// Directory holding producers' remote perimeter files
            #[arg(long, default_value = ".")]
            remote_dir: PathBuf,
        },
    }

    fn read_file(path: &Path) -> anyhow::Result<(String, Vec<u8>)> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok((name, bytes))
    }

    fn session<S: KeyValueStore>(
        settings: &WorkbenchSettings,
        address: &str,
        backend: S,
    ) -> anyhow::Result<Workbench<MemoryMap, MemoryAddressBar, S>> {
        let address = MemoryAddressBar::parse(address)
            .with_context(|| format!("invalid address {:?}", address))?;
        Ok(Workbench::new(
            settings.clone(),
            MemoryMap::new(),
            address,
            backend,
        ))
    }

    fn import_all<S: KeyValueStore>(
        workbench: &mut Workbench<MemoryMap, MemoryAddressBar, S>,
        files: &[PathBuf],
    ) -> anyhow::Result<()> {
        for path in files {
            let (name, bytes) = read_file(path)?;
            let report = workbench
                .import_file(&name, &bytes)
                .with_context(|| format!("importing {}", path.display()))?;
            println!("{}: {} properties", name, report.added.len());
            if report.rejected > 0 {
                log::warn!("{} features of {} were rejected", report.rejected, name);
            }
        }
        Ok(())
    }

    /// Turns `input` into an address carrying a share token.
    fn address_for_token(settings: &WorkbenchSettings, base: &str, input: &str) -> anyhow::Result<String> {
        if let Ok(url) = Url::parse(input) {
            return Ok(url.to_string());
        }
        let mut url = Url::parse(base).context("invalid base URL")?;
        url.query_pairs_mut()
            .append_pair(&settings.share_param, input.trim());
        Ok(url.to_string())
    }

    pub fn run(cli: Cli) -> anyhow::Result<()> {
        let settings = match &cli.config {
            Some(path) => WorkbenchSettings::from_file(path)?,
            None => WorkbenchSettings::default(),
        };
        let store = DirectoryStore::new(&cli.store);

        match cli.command {
            Command::Import { files } => {
                let mut workbench = session(&settings, &cli.base_url, store)?;
                pollster::block_on(workbench.initialize::<DirectorySource>(None));
                import_all(&mut workbench, &files)?;
                let links = workbench.share_url()?;
                println!("{}", links.url);
            }
            Command::Decode { input } => {
                let address = address_for_token(&settings, &cli.base_url, &input)?;
                let mut workbench = session(&settings, &address, store)?;
                let token = workbench_token(&workbench);
                let report = workbench.consume(token.as_deref())?;
                log::info!("Decoded {} properties with the {} tier", report.loaded, report.tier);
                println!("{}", workbench.export_json()?);
            }
            Command::Export { files, output } => {
                let mut workbench = session(
                    &settings,
                    &cli.base_url,
                    parcel_workbench::storage::native::MemoryStore::new(),
                )?;
                import_all(&mut workbench, &files)?;
                let json = workbench.export_json()?;
                match output {
                    Some(path) => std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?,
                    None => println!("{}", json),
                }
            }
            Command::Load { url, remote_dir } => {
                let mut workbench = session(&settings, &url, store)?;
                let remote = DirectorySource::new(remote_dir);
                let outcome = pollster::block_on(workbench.initialize(Some(&remote)));
                for attempt in &outcome.attempts {
                    println!("{}: {}", attempt.source, attempt.reason);
                }
                match outcome.source {
                    Some(source) => println!("loaded {} properties from {}", outcome.loaded, source),
                    None => bail!("no source supplied any properties"),
                }
                println!("{}", workbench.export_json()?);
            }
        }
        Ok(())
    }

    fn workbench_token<S: KeyValueStore>(
        workbench: &Workbench<MemoryMap, MemoryAddressBar, S>,
    ) -> Option<String> {
        use parcel_workbench::share::{AddressBar, UrlParams};
        let url = workbench.address().current().ok()?;
        UrlParams::parse(&url, workbench.settings()).data
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    use clap::Parser;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = cli::run(cli::Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// The browser build starts from the library's wasm entry point.
#[cfg(target_arch = "wasm32")]
fn main() {}
