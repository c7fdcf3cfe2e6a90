mod cli;

use crate::cli::{Assets, Cli, Command};
use clap::Parser;
use derive_more::{Display, Error};
use exn::ResultExt;
use futures::StreamExt;
use shelf_cache::{CacheStore, Thumbnailer};
use shelf_config::Config;
use shelf_library::{CatalogCover, Library, Reconciler, SyncEvent, TransferEvent};
use shelf_remote::{ContentSource, HttpSource};
use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open the cache")]
    Cache,
    #[display("could not reach the remote")]
    Remote,
    #[display("library operation failed")]
    Library,
    #[display("could not write output")]
    Output,
    #[display("{_0} of {_1} transfers failed")]
    Transfers(#[error(not(source))] usize, #[error(not(source))] usize),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn open_library(config: &Config) -> Result<Library> {
    let mut cache = CacheStore::new(&config.cache.root).or_raise(|| ErrorKind::Cache)?;
    if config.cache.thumbnails {
        cache = cache.with_thumbnailer(Thumbnailer::discover(config.cache.cover_concurrency));
    }
    let source = HttpSource::new(
        "github",
        &config.remote.api_url,
        config.remote.token.as_deref(),
        &config.remote.user_agent,
    )
    .or_raise(|| ErrorKind::Remote)?;
    Ok(Library::with_cover_concurrency(cache, Arc::new(source), config.cache.cover_concurrency))
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let library = open_library(&config)?;
    match cli.command {
        Command::Status(assets) => status(&library, &assets).await,
        Command::Download { assets, force } => download(library, &assets, force).await,
        Command::Uncache(assets) => {
            for item in assets.items() {
                library.uncache(&item.key).await.or_raise(|| ErrorKind::Library)?;
                println!("uncached\t{}", item.key.asset);
            }
            Ok(())
        },
        Command::Fetch { repository, path, reference } => {
            let content = repository.content(&path, reference.as_deref());
            let fetched = library.source().fetch(&content).await.or_raise(|| ErrorKind::Remote)?;
            tracing::info!(content = %content, token = %fetched.token, bytes = fetched.bytes.len(), "Fetched");
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&fetched.bytes).await.or_raise(|| ErrorKind::Output)?;
            stdout.flush().await.or_raise(|| ErrorKind::Output)
        },
        Command::Cover { assets, from } => cover(&library, &assets, from.as_deref()).await,
    }
}

async fn status(library: &Library, assets: &Assets) -> Result<()> {
    for item in assets.items() {
        println!("{}\t{}", library.state(&item).await, item.key.asset);
    }
    Ok(())
}

async fn download(library: Library, assets: &Assets, force: bool) -> Result<()> {
    let reconciler = Reconciler::new(library);
    let mut outcome = (0, 0);
    if force {
        reconciler.enqueue(assets.items(), None);
        let mut events = pin!(reconciler.drain());
        while let Some(event) = events.next().await {
            report(event, &mut outcome);
        }
    } else {
        let mut events = pin!(reconciler.sync(assets.items()));
        while let Some(event) = events.next().await {
            match event {
                SyncEvent::Classified { item, state } => tracing::debug!(key = %item.key, %state, "Classified"),
                SyncEvent::Transfer(event) => report(event, &mut outcome),
            }
        }
    }
    let (succeeded, failed) = outcome;
    if failed > 0 {
        exn::bail!(ErrorKind::Transfers(failed, succeeded + failed));
    }
    Ok(())
}

fn report(event: TransferEvent, (succeeded, failed): &mut (usize, usize)) {
    match event {
        TransferEvent::Started { item, .. } => eprintln!("downloading\t{}", item.key.asset),
        TransferEvent::Progress { progress, .. } => {
            if let Some(fraction) = progress.fraction() {
                tracing::debug!(percent = (fraction * 100.0).round(), "Progress");
            }
        },
        TransferEvent::Succeeded { entry, .. } => println!("downloaded\t{}", entry.path.display()),
        TransferEvent::Failed { id, error } => eprintln!("failed\t{id}\t{error:?}"),
        TransferEvent::Complete { succeeded: ok, failed: err } => {
            *succeeded += ok;
            *failed += err;
        },
    }
}

async fn cover(library: &Library, assets: &Assets, from: Option<&str>) -> Result<()> {
    let items = assets.items();
    if let Some(path) = from {
        let covers = items
            .iter()
            .map(|item| CatalogCover { key: item.key.clone(), content: assets.repository.content(path, None) })
            .collect();
        let mut fetched = pin!(library.fetch_catalog_covers(covers));
        while let Some((key, result)) = fetched.next().await {
            if let Err(e) = result {
                tracing::warn!(key = %key, error = ?e, "Could not fetch catalog cover");
            }
        }
    }
    for item in items {
        match library.cache().cover(&item.key).await {
            Some((source, path)) => println!("{source:?}\t{}", path.display()),
            None => println!("none\t{}", item.key.asset),
        }
    }
    Ok(())
}
