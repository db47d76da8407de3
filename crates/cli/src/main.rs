//! The silo command-line interface.

mod config;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use silo_core::{Mac, RepositoryConfig, ResourceKind};
use silo_repository::{CacheManager, Repository};
use silo_snapshot::{
    backup, check, maintenance, restore, sync, BackupOptions, CheckCache, CheckOptions,
    FsExporter, FsImporter, MaintenanceOptions, Snapshot, SnapshotHeader,
};
use silo_storage::new_store;
use std::process::ExitCode;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const PASSPHRASE_ENV: &str = "SILO_PASSPHRASE";

#[derive(Parser)]
#[command(name = "silo")]
#[command(about = "Deduplicating, content-addressed snapshot engine")]
#[command(version)]
struct Cli {
    /// Store location (fs://..., memory://...) or configured name (@name)
    #[arg(short = 's', long, global = true, env = "SILO_STORE")]
    store: Option<String>,

    /// Maximum concurrent file chunkers during backup
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Suppress status lines and collapse warning exit codes
    #[arg(long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a repository
    Create {
        /// Store location; defaults to the configured store
        location: Option<String>,
        /// Create without encryption
        #[arg(long)]
        no_encryption: bool,
        /// Hashing algorithm
        #[arg(long, default_value = "SHA256")]
        hashing: String,
        /// Minimum chunk size in bytes
        #[arg(long)]
        chunking_min: Option<u32>,
        /// Normal chunk size in bytes
        #[arg(long)]
        chunking_normal: Option<u32>,
        /// Maximum chunk size in bytes
        #[arg(long)]
        chunking_max: Option<u32>,
        /// Packfile soft size cap in bytes
        #[arg(long)]
        packfile_max_size: Option<u64>,
    },
    /// Snapshot a directory or a configured source (@name)
    Backup {
        path: String,
        /// Snapshot name
        #[arg(long)]
        name: Option<String>,
        /// Tags attached to the snapshot
        #[arg(short = 't', long = "tag")]
        tags: Vec<String>,
        /// Glob patterns to exclude
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        /// Job label
        #[arg(long)]
        job: Option<String>,
    },
    /// List snapshots, or the paths of one snapshot (SNAP[:PATH])
    Ls { target: Option<String> },
    /// Write one file's content to stdout (SNAP:PATH)
    Cat { target: String },
    /// Restore a snapshot subtree (SNAP[:PATH]) into a directory or @destination
    Restore { target: String, destination: String },
    /// Verify snapshot integrity (all snapshots unless SNAP[:PATH] given)
    Check {
        target: Option<String>,
        /// Only verify presence, skip re-hashing
        #[arg(long)]
        fast: bool,
    },
    /// Remove snapshots
    Rm { snapshots: Vec<String> },
    /// Garbage-collect unreferenced packfiles
    Maintenance {
        /// Tombstone grace window in seconds
        #[arg(long, default_value_t = 3600)]
        grace_seconds: u64,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Replicate snapshots to, from, or with a peer repository
    Sync {
        #[arg(value_parser = ["to", "from", "with"])]
        direction: String,
        /// Peer store location or configured name (@name)
        peer: String,
    },
    /// Resolve one blob's packfile location
    Locate { kind: String, mac: String },
    /// Low-level inspection of stored structures
    Diag {
        #[command(subcommand)]
        command: DiagCommands,
    },
    /// Repository information
    Info,
}

#[derive(Subcommand)]
enum DiagCommands {
    /// Dump a packfile's footer and index
    Packfile { mac: String },
    /// Dump a state delta's events
    State { mac: String },
    /// Dump an object record
    Object { mac: String },
    /// Dump a snapshot's VFS index
    Vfs { snapshot: String },
}

struct Globals {
    store: Option<String>,
    concurrency: Option<usize>,
    quiet: bool,
}

struct App {
    cli: Globals,
    cache: CacheManager,
    warnings: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "error" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let silent = cli.silent;
    let quiet = cli.quiet;
    let command = cli.command;
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut app = App {
        cli: Globals {
            store: cli.store,
            concurrency: cli.concurrency,
            quiet: cli.quiet,
        },
        cache: CacheManager::new(config::cache_dir()),
        warnings: 0,
    };

    match runtime.block_on(app.run(command)) {
        Ok(()) => {
            if !quiet && !silent {
                if app.warnings > 0 {
                    println!("OK ({} warnings)", app.warnings);
                } else {
                    println!("OK");
                }
            }
            if app.warnings > 0 && !silent {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            if !quiet && !silent {
                println!("KO");
            }
            ExitCode::FAILURE
        }
    }
}

impl App {
    async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Create {
                location,
                no_encryption,
                hashing,
                chunking_min,
                chunking_normal,
                chunking_max,
                packfile_max_size,
            } => {
                let chunking = (chunking_min, chunking_normal, chunking_max);
                self.create(location, no_encryption, hashing, chunking, packfile_max_size)
                    .await
            }
            Commands::Backup {
                path,
                name,
                tags,
                excludes,
                job,
            } => self.backup(path, name, tags, excludes, job).await,
            Commands::Ls { target } => self.ls(target).await,
            Commands::Cat { target } => self.cat(target).await,
            Commands::Restore {
                target,
                destination,
            } => self.restore(target, destination).await,
            Commands::Check { target, fast } => self.check(target, fast).await,
            Commands::Rm { snapshots } => self.rm(snapshots).await,
            Commands::Maintenance {
                grace_seconds,
                dry_run,
            } => self.maintenance(grace_seconds, dry_run).await,
            Commands::Sync { direction, peer } => self.sync(direction, peer).await,
            Commands::Locate { kind, mac } => self.locate(kind, mac).await,
            Commands::Diag { command } => self.diag(command).await,
            Commands::Info => self.info().await,
        }
    }

    /// The selected store: explicit flag (literal or @name), else the
    /// configured default. Returns (location, passphrase).
    fn selected_store(&self) -> Result<(String, Option<String>)> {
        let stores = config::load_stores(&config::config_dir())?;
        let env_passphrase = std::env::var(PASSPHRASE_ENV).ok();

        let entry = match &self.cli.store {
            Some(value) => match value.strip_prefix('@') {
                Some(name) => Some(
                    stores
                        .entry(Some(name))?
                        .ok_or_else(|| anyhow!("no store named {name:?}"))?,
                ),
                None => {
                    return Ok((value.clone(), env_passphrase));
                }
            },
            None => stores.entry(None)?,
        };

        match entry {
            Some(entry) => {
                let passphrase = match env_passphrase {
                    Some(p) => Some(p),
                    None => entry.resolve_passphrase()?,
                };
                Ok((entry.location.clone(), passphrase))
            }
            None => bail!("no store selected: pass --store or configure a default in stores.yml"),
        }
    }

    async fn open_repository(&self) -> Result<Arc<Repository>> {
        let (location, passphrase) = self.selected_store()?;
        let store = new_store(&location).await?;
        let repository = Repository::open(store, &self.cache, passphrase.as_deref())
            .await
            .with_context(|| format!("opening repository at {location}"))?;
        Ok(Arc::new(repository))
    }

    async fn create(
        &mut self,
        location: Option<String>,
        no_encryption: bool,
        hashing: String,
        chunking: (Option<u32>, Option<u32>, Option<u32>),
        packfile_max_size: Option<u64>,
    ) -> Result<()> {
        let (location, passphrase) = match location {
            Some(location) => (location, std::env::var(PASSPHRASE_ENV).ok()),
            None => self.selected_store()?,
        };

        let passphrase = if no_encryption {
            None
        } else {
            Some(passphrase.ok_or_else(|| {
                anyhow!(
                    "encryption requires a passphrase: set {PASSPHRASE_ENV} or pass --no-encryption"
                )
            })?)
        };

        let mut repo_config =
            RepositoryConfig::new(Uuid::new_v4(), OffsetDateTime::now_utc());
        let algorithm = silo_core::HashingAlgorithm::parse(&hashing)
            .ok_or_else(|| anyhow!("unsupported hashing algorithm {hashing:?}"))?;
        repo_config.hashing.algorithm = algorithm;
        repo_config.hashing.bits = algorithm.bits();
        if let Some(min) = chunking.0 {
            repo_config.chunking.min_size = min;
        }
        if let Some(normal) = chunking.1 {
            repo_config.chunking.normal_size = normal;
        }
        if let Some(max) = chunking.2 {
            repo_config.chunking.max_size = max;
        }
        if let Some(max_size) = packfile_max_size {
            repo_config.packfile.max_size = max_size;
        }

        let store = new_store(&location).await?;
        Repository::create(&store, repo_config, passphrase.as_deref()).await?;
        if !self.cli.quiet {
            eprintln!("created repository at {location}");
        }
        Ok(())
    }

    async fn backup(
        &mut self,
        path: String,
        name: Option<String>,
        mut tags: Vec<String>,
        mut excludes: Vec<String>,
        job: Option<String>,
    ) -> Result<()> {
        let path = match path.strip_prefix('@') {
            Some(source) => {
                let sources = config::load_sources(&config::config_dir())?;
                let entry = sources
                    .sources
                    .get(source)
                    .ok_or_else(|| anyhow!("no source named {source:?} in sources.yml"))?;
                excludes.extend(entry.excludes.iter().cloned());
                tags.extend(entry.tags.iter().cloned());
                entry.location.clone()
            }
            None => path,
        };

        let repository = self.open_repository().await?;
        let importer = Arc::new(FsImporter::new(&path).await?);
        let outcome = backup(
            repository,
            &self.cache,
            importer,
            BackupOptions {
                name,
                tags,
                job,
                excludes,
                concurrency: self.cli.concurrency,
                ..Default::default()
            },
        )
        .await?;

        self.warnings = outcome.warnings;
        if !self.cli.quiet {
            eprintln!(
                "snapshot {}: {} files, {} directories, {} bytes in {:.1}s",
                outcome.snapshot.short(),
                outcome.summary.files,
                outcome.summary.directories,
                outcome.summary.total_size,
                outcome.duration.as_seconds_f64(),
            );
        }
        Ok(())
    }

    async fn ls(&mut self, target: Option<String>) -> Result<()> {
        let repository = self.open_repository().await?;
        match target {
            None => {
                let mut headers: Vec<SnapshotHeader> = Vec::new();
                for mac in repository.list_snapshots().await {
                    let snapshot = Snapshot::load(Arc::clone(&repository), mac).await?;
                    headers.push(snapshot.header().clone());
                }
                headers.sort_by_key(|h| h.timestamp);
                for header in headers {
                    println!(
                        "{}  {}  {:>12}  {}",
                        header
                            .timestamp
                            .format(&Rfc3339)
                            .unwrap_or_else(|_| "-".to_string()),
                        header.identifier.short(),
                        header.summary.total_size,
                        header.name,
                    );
                }
            }
            Some(target) => {
                let (prefix, path) = parse_target(&target);
                let snapshot = self.load_snapshot(&repository, prefix).await?;
                for entry in snapshot.list(&path).await? {
                    let mtime = OffsetDateTime::from_unix_timestamp_nanos(
                        i128::from(entry.mtime_ns),
                    )
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH);
                    println!(
                        "{:o}  {:>12}  {}  {}",
                        entry.mode,
                        entry.size,
                        mtime.format(&Rfc3339).unwrap_or_else(|_| "-".to_string()),
                        entry.pathname,
                    );
                }
            }
        }
        Ok(())
    }

    async fn cat(&mut self, target: String) -> Result<()> {
        use futures::StreamExt;
        use tokio::io::AsyncWriteExt;

        let (prefix, path) = parse_target(&target);
        let repository = self.open_repository().await?;
        let snapshot = self.load_snapshot(&repository, prefix).await?;

        let mut stdout = tokio::io::stdout();
        let mut stream = snapshot.reader(&path).await?;
        while let Some(chunk) = stream.next().await {
            stdout.write_all(&chunk?).await?;
        }
        stdout.flush().await?;
        Ok(())
    }

    async fn restore(&mut self, target: String, destination: String) -> Result<()> {
        let destination = match destination.strip_prefix('@') {
            Some(name) => {
                let destinations = config::load_destinations(&config::config_dir())?;
                destinations
                    .destinations
                    .get(name)
                    .ok_or_else(|| anyhow!("no destination named {name:?} in destinations.yml"))?
                    .location
                    .clone()
            }
            None => destination,
        };

        let (prefix, path) = parse_target(&target);
        let repository = self.open_repository().await?;
        let snapshot = self.load_snapshot(&repository, prefix).await?;

        let exporter = FsExporter::new(&destination).await?;
        let stats = restore(&snapshot, &path, &exporter).await?;
        self.warnings = stats.warnings;
        if !self.cli.quiet {
            eprintln!(
                "restored {} files, {} directories, {} bytes to {destination}",
                stats.files, stats.directories, stats.bytes
            );
        }
        Ok(())
    }

    async fn check(&mut self, target: Option<String>, fast: bool) -> Result<()> {
        let repository = self.open_repository().await?;
        let cache = CheckCache::new();
        let mut failures = 0u64;

        let targets: Vec<(Mac, Option<String>)> = match target {
            Some(target) => {
                let (prefix, path) = parse_target(&target);
                let mac = resolve_snapshot(&repository, &prefix).await?;
                let path = if path == "/" { None } else { Some(path) };
                vec![(mac, path)]
            }
            None => repository
                .list_snapshots()
                .await
                .into_iter()
                .map(|mac| (mac, None))
                .collect(),
        };

        for (mac, path) in targets {
            let snapshot = Snapshot::load(Arc::clone(&repository), mac).await?;
            let report = check(&snapshot, &CheckOptions { fast, path }, &cache).await?;
            for failure in &report.failures {
                eprintln!("error: {}: {failure}", mac.short());
            }
            failures += report.failures.len() as u64;
            if !self.cli.quiet && report.ok() {
                eprintln!("{}: {} blobs verified", mac.short(), report.checked);
            }
        }

        if failures > 0 {
            bail!("{failures} integrity failures");
        }
        Ok(())
    }

    async fn rm(&mut self, snapshots: Vec<String>) -> Result<()> {
        if snapshots.is_empty() {
            bail!("rm needs at least one snapshot id");
        }
        let repository = self.open_repository().await?;
        for prefix in snapshots {
            let mac = resolve_snapshot(&repository, &prefix).await?;
            repository.delete_snapshot(mac).await?;
            if !self.cli.quiet {
                eprintln!("removed snapshot {}", mac.short());
            }
        }
        Ok(())
    }

    async fn maintenance(&mut self, grace_seconds: u64, dry_run: bool) -> Result<()> {
        let repository = self.open_repository().await?;
        let stats = maintenance(
            repository,
            &MaintenanceOptions {
                grace: Duration::seconds(grace_seconds as i64),
                dry_run,
            },
        )
        .await?;

        if !self.cli.quiet {
            let verb = if dry_run { "would delete" } else { "deleted" };
            eprintln!(
                "{} {} of {} packfiles, {} locate entries dropped, {} orphans",
                verb,
                stats.packfiles_deleted,
                stats.packfiles_scanned,
                stats.blobs_dropped,
                stats.orphan_packfiles,
            );
        }
        if stats.orphan_packfiles > 0 {
            self.warnings += stats.orphan_packfiles;
        }
        Ok(())
    }

    async fn sync(&mut self, direction: String, peer: String) -> Result<()> {
        let (peer_location, peer_passphrase) = match peer.strip_prefix('@') {
            Some(name) => {
                let stores = config::load_stores(&config::config_dir())?;
                let entry = stores
                    .entry(Some(name))?
                    .ok_or_else(|| anyhow!("no store named {name:?}"))?;
                let passphrase = entry.resolve_passphrase()?;
                (entry.location, passphrase)
            }
            None => (peer, std::env::var(PASSPHRASE_ENV).ok()),
        };

        let local = self.open_repository().await?;
        let peer_store = new_store(&peer_location).await?;
        // The peer cache lives under a separate root so the two aggregates
        // never contend for one lock.
        let peer_cache = CacheManager::new(config::cache_dir().join("peers"));
        let peer = Arc::new(
            Repository::open(peer_store, &peer_cache, peer_passphrase.as_deref())
                .await
                .with_context(|| format!("opening peer repository at {peer_location}"))?,
        );

        let mut moved = 0u64;
        match direction.as_str() {
            "to" => moved += sync(&local, &peer).await?.snapshots,
            "from" => moved += sync(&peer, &local).await?.snapshots,
            "with" => {
                moved += sync(&local, &peer).await?.snapshots;
                moved += sync(&peer, &local).await?.snapshots;
            }
            _ => unreachable!("clap validates direction"),
        }
        if !self.cli.quiet {
            eprintln!("synchronized {moved} snapshots");
        }
        Ok(())
    }

    async fn locate(&mut self, kind: String, mac: String) -> Result<()> {
        let kind = ResourceKind::parse(&kind)
            .ok_or_else(|| anyhow!("unknown resource kind {kind:?}"))?;
        let mac = Mac::from_hex(&mac)?;

        let repository = self.open_repository().await?;
        match repository.locate(kind, mac).await {
            Some(location) => println!(
                "packfile {} offset {} length {}",
                location.packfile, location.offset, location.length
            ),
            None => bail!("{kind} {} has no locate entry", mac.short()),
        }
        Ok(())
    }

    async fn diag(&mut self, command: DiagCommands) -> Result<()> {
        let repository = self.open_repository().await?;
        match command {
            DiagCommands::Packfile { mac } => {
                let reader = repository.get_packfile(Mac::from_hex(&mac)?).await?;
                println!(
                    "{}",
                    serde_json::json!({
                        "count": reader.footer().count,
                        "index_offset": reader.footer().index_offset,
                        "index_mac": reader.footer().index_mac.to_hex(),
                        "timestamp": reader.footer().timestamp.format(&Rfc3339).ok(),
                    })
                );
                for entry in reader.entries() {
                    println!(
                        "{}",
                        serde_json::json!({
                            "kind": entry.kind.as_str(),
                            "mac": entry.mac.to_hex(),
                            "offset": entry.offset,
                            "length": entry.length,
                        })
                    );
                }
            }
            DiagCommands::State { mac } => {
                let delta = repository.get_state_delta(Mac::from_hex(&mac)?).await?;
                println!(
                    "{}",
                    serde_json::json!({
                        "serial": delta.serial.to_string(),
                        "locates": delta.locates.len(),
                        "tombstones": delta.tombstones.len(),
                    })
                );
                for event in &delta.locates {
                    println!(
                        "{}",
                        serde_json::json!({
                            "event": "locate",
                            "kind": event.kind.as_str(),
                            "mac": event.mac.to_hex(),
                            "packfile": event.location.packfile.to_hex(),
                            "offset": event.location.offset,
                            "length": event.location.length,
                        })
                    );
                }
                for event in &delta.tombstones {
                    println!(
                        "{}",
                        serde_json::json!({
                            "event": "tombstone",
                            "kind": event.kind.as_str(),
                            "mac": event.mac.to_hex(),
                        })
                    );
                }
            }
            DiagCommands::Object { mac } => {
                let bytes = repository
                    .get_blob(ResourceKind::Object, Mac::from_hex(&mac)?)
                    .await?;
                let object = silo_core::Object::from_bytes(&bytes)?;
                println!(
                    "{}",
                    serde_json::json!({
                        "mac": object.mac.to_hex(),
                        "content_type": object.content_type,
                        "entropy": object.entropy,
                        "chunks": object.chunks.len(),
                        "length": object.total_length(),
                    })
                );
            }
            DiagCommands::Vfs { snapshot } => {
                let mac = resolve_snapshot(&repository, &snapshot).await?;
                let snapshot = Snapshot::load(Arc::clone(&repository), mac).await?;
                let vfs = snapshot.filesystem().await?;
                for (path, entry_mac) in vfs.pathnames().await? {
                    println!("{}  {path}", entry_mac.to_hex());
                }
            }
        }
        Ok(())
    }

    async fn info(&mut self) -> Result<()> {
        let repository = self.open_repository().await?;
        let repo_config = repository.config();
        println!("location:    {}", repository.location());
        println!("repository:  {}", repo_config.repository_id);
        println!(
            "hashing:     {} ({} bits)",
            repo_config.hashing.algorithm.as_str(),
            repo_config.hashing.bits
        );
        println!(
            "chunking:    {} min={} normal={} max={}",
            repo_config.chunking.algorithm,
            repo_config.chunking.min_size,
            repo_config.chunking.normal_size,
            repo_config.chunking.max_size
        );
        println!("packfile:    max {} bytes", repo_config.packfile.max_size);
        println!(
            "compression: {}",
            repo_config
                .compression
                .as_ref()
                .map(|c| format!("{} level {}", c.algorithm.as_str(), c.level))
                .unwrap_or_else(|| "none".to_string())
        );
        println!(
            "encryption:  {}",
            repo_config
                .encryption
                .as_ref()
                .map(|e| e.data_algorithm.clone())
                .unwrap_or_else(|| "none".to_string())
        );
        println!("snapshots:   {}", repository.list_snapshots().await.len());
        println!("packfiles:   {}", repository.list_packfiles().await.len());
        println!("states:      {}", repository.states().await?.len());
        Ok(())
    }

    async fn load_snapshot(
        &self,
        repository: &Arc<Repository>,
        prefix: String,
    ) -> Result<Snapshot> {
        let mac = resolve_snapshot(repository, &prefix).await?;
        Ok(Snapshot::load(Arc::clone(repository), mac).await?)
    }
}

/// Split `SNAP[:PATH]` into the snapshot prefix and a normalized path.
fn parse_target(target: &str) -> (String, String) {
    match target.split_once(':') {
        Some((snapshot, path)) => {
            let path = if path.is_empty() {
                "/".to_string()
            } else if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            };
            (snapshot.to_string(), path)
        }
        None => (target.to_string(), "/".to_string()),
    }
}

/// Resolve a hex prefix to a unique snapshot id.
async fn resolve_snapshot(repository: &Arc<Repository>, prefix: &str) -> Result<Mac> {
    let prefix = prefix.to_lowercase();
    let matches: Vec<Mac> = repository
        .list_snapshots()
        .await
        .into_iter()
        .filter(|mac| mac.to_hex().starts_with(&prefix))
        .collect();
    match matches.len() {
        0 => bail!("no snapshot matches {prefix:?}"),
        1 => Ok(matches[0]),
        n => bail!("{prefix:?} is ambiguous, {n} snapshots match"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_targets() {
        assert_eq!(
            parse_target("abc123"),
            ("abc123".to_string(), "/".to_string())
        );
        assert_eq!(
            parse_target("abc123:/a/b.txt"),
            ("abc123".to_string(), "/a/b.txt".to_string())
        );
        assert_eq!(
            parse_target("abc123:a/b.txt"),
            ("abc123".to_string(), "/a/b.txt".to_string())
        );
        assert_eq!(parse_target("abc:"), ("abc".to_string(), "/".to_string()));
    }

    #[test]
    fn cli_parses() {
        Cli::try_parse_from(["silo", "-s", "memory://x", "ls"]).unwrap();
        Cli::try_parse_from(["silo", "backup", "/tmp", "-t", "daily", "--exclude", "*.log"])
            .unwrap();
        Cli::try_parse_from(["silo", "sync", "to", "@offsite"]).unwrap();
        assert!(Cli::try_parse_from(["silo", "sync", "sideways", "@x"]).is_err());
        Cli::try_parse_from(["silo", "diag", "packfile", "abcd"]).unwrap();
        Cli::try_parse_from(["silo", "maintenance", "--grace-seconds", "600", "--dry-run"])
            .unwrap();
    }
}
