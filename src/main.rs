//! `tandem`: list, copy, move, delete and unpack across local disks,
//! archives and remote stores from the command line.

mod cli;
mod error;
mod prompt;

use crate::cli::{Cli, Command, split_destination};
use crate::error::{ErrorKind, Result};
use crate::prompt::describe;
use clap::Parser;
use exn::ResultExt;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tandem_config::Config;
use tandem_jobs::{EventKind, Job, JobContext, JobEvent, JobKind, JobOptions, JobReport, JobState, Progress, Scheduler};
use tandem_vfs::error::ErrorKind as VfsErrorKind;
use tandem_vfs::{FileAddress, FileSet, NodeHandle, NodeKind, Registry};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("TANDEM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let registry = Arc::new(registry(&config).await?);
    let (kind, sources) = match &cli.command {
        Command::Ls { address } => return list(&registry, address).await,
        Command::Rm { addresses } => (JobKind::Delete, addresses.as_slice()),
        Command::Cp { paths } => {
            let (sources, destination) = with_destination(&registry, paths).await?;
            (JobKind::Copy { destination }, sources)
        },
        Command::Mv { paths } => {
            let (sources, destination) = with_destination(&registry, paths).await?;
            (JobKind::Move { destination }, sources)
        },
        Command::Unpack { paths } => {
            let (sources, destination) = with_destination(&registry, paths).await?;
            (JobKind::Unpack { destination }, sources)
        },
    };
    let files = selection(&registry, sources).await?;

    let options = JobOptions {
        buffer_size: config.jobs.buffer_size,
        compute_totals: cli.totals || config.jobs.compute_totals,
    };
    let context = JobContext::new(registry, Arc::new(cli.channel()))
        .with_scheduler(Scheduler::new(config.jobs.max_concurrent))
        .with_options(options);
    let job = Job::new(kind, files, context);
    let printer = job.events().map(|events| tokio::spawn(print_events(events)));
    job.start().or_raise(|| ErrorKind::Job)?;

    let report = job.await_terminal_state().await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    summarize(&report);
    if report.state == JobState::Completed && report.files_errored == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Every backend the build and the configuration allow.
async fn registry(config: &Config) -> Result<Registry> {
    #[cfg_attr(not(any(feature = "http", feature = "s3")), expect(unused_mut))]
    let mut registry = Registry::new().archive_sniffing(config.archives.sniff_content);
    #[cfg(feature = "http")]
    {
        let timeout = std::time::Duration::from_secs(config.http.timeout_secs);
        let backend = tandem_vfs::backend::HttpBackend::new(timeout, &config.http.user_agent)
            .or_raise(|| ErrorKind::Backend("http".to_string()))?;
        registry.register(Arc::new(backend));
    }
    #[cfg(feature = "s3")]
    if let Some(s3) = &config.s3 {
        let backend = tandem_vfs::backend::S3Backend::new(
            s3.region.clone(),
            s3.endpoint.clone(),
            s3.key_id.clone(),
            s3.key_secret.clone(),
        )
        .await
        .or_raise(|| ErrorKind::Backend("s3".to_string()))?;
        registry.register(Arc::new(backend));
    }
    tracing::debug!(?registry, "Backends ready");
    Ok(registry)
}

/// Parse a command-line location. Relative local paths are taken from the
/// working directory.
fn address(raw: &str) -> Result<FileAddress> {
    if raw.contains("://") || Path::new(raw).is_absolute() {
        return FileAddress::parse(raw).or_raise(|| ErrorKind::Address(raw.to_string()));
    }
    let cwd = std::env::current_dir().or_raise(|| ErrorKind::Address(raw.to_string()))?;
    let absolute = cwd.join(raw);
    FileAddress::parse(&absolute.to_string_lossy()).or_raise(|| ErrorKind::Address(raw.to_string()))
}

async fn resolve(registry: &Registry, raw: &str) -> Result<NodeHandle> {
    let address = address(raw)?;
    registry.resolve(&address).await.or_raise(|| ErrorKind::Resolve(address.to_string()))
}

async fn with_destination<'a>(registry: &Registry, paths: &'a [String]) -> Result<(&'a [String], NodeHandle)> {
    let Some((sources, destination)) = split_destination(paths) else {
        exn::bail!(ErrorKind::Address("a destination folder is required".to_string()));
    };
    Ok((sources, resolve(registry, destination).await?))
}

/// The closest folder holding every address.
fn common_base(addresses: &[FileAddress]) -> Option<FileAddress> {
    let mut base = addresses.first()?.parent()?;
    while !addresses.iter().all(|address| base.is_ancestor_of(address)) {
        base = base.parent()?;
    }
    Some(base)
}

async fn selection(registry: &Registry, raws: &[String]) -> Result<FileSet> {
    let addresses = raws.iter().map(|raw| address(raw)).collect::<Result<Vec<_>>>()?;
    let Some(base) = common_base(&addresses) else {
        exn::bail!(ErrorKind::Address("the sources share no parent folder".to_string()));
    };
    let base_node = registry.resolve(&base).await.or_raise(|| ErrorKind::Resolve(base.to_string()))?;
    let mut nodes = Vec::with_capacity(addresses.len());
    for address in &addresses {
        nodes.push(registry.resolve(address).await.or_raise(|| ErrorKind::Resolve(address.to_string()))?);
    }
    FileSet::from_nodes(base_node, nodes).or_raise(|| ErrorKind::Address(base.to_string()))
}

async fn list(registry: &Registry, raw: &str) -> Result<ExitCode> {
    let node = resolve(registry, raw).await?;
    let mut children = node.list().await.or_raise(|| ErrorKind::Resolve(node.address().to_string()))?;
    children.sort_by_key(|child| child.name());
    for child in children {
        match child.metadata().await {
            Ok(metadata) => {
                let marker = match metadata.kind {
                    NodeKind::Directory => "/",
                    NodeKind::Symlink { .. } => "@",
                    NodeKind::Regular => "",
                };
                println!("{}  {}{marker}", describe(&metadata), child.name());
            },
            Err(err) => {
                let cause: &VfsErrorKind = &err;
                println!("{:>12}  {}  ({cause})", "?", child.name());
            },
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn counter(done: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("{done}/{total}"),
        None => done.to_string(),
    }
}

fn progress_line(progress: &Progress, path: &FileAddress) -> String {
    format!(
        "[{} files, {} bytes] {path}",
        counter(progress.files_done, progress.files_total),
        counter(progress.bytes_done, progress.bytes_total)
    )
}

async fn print_events(mut events: mpsc::UnboundedReceiver<JobEvent>) {
    while let Some(event) = events.recv().await {
        match event.kind {
            EventKind::StateChanged(state) => println!("{state}"),
            EventKind::FileStarted(path) => println!("{}", progress_line(&event.progress, &path)),
            EventKind::Skipped(path) => println!("skipped {path}"),
            EventKind::Faulted(fault) => println!("error {}: {}", fault.path, fault.cause),
            EventKind::Progress | EventKind::Finished(_) => {},
        }
    }
}

fn summarize(report: &JobReport) {
    println!(
        "{}: {} files, {} bytes, {} skipped, {} errors",
        report.state, report.files_done, report.bytes_done, report.files_skipped, report.files_errored
    );
    if let Some(failure) = &report.failure {
        println!("failure: {failure}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(raw: &str) -> FileAddress {
        FileAddress::parse(raw).unwrap()
    }

    #[rstest]
    #[case(&["/a/b/one.txt", "/a/b/two.txt"], Some("/a/b"))]
    #[case(&["/a/b/one.txt", "/a/c/two.txt"], Some("/a"))]
    #[case(&["/a/one.txt"], Some("/a"))]
    #[case(&["/a/x.zip!/docs/one.txt", "/a/x.zip!/docs/two.txt"], Some("/a/x.zip!/docs"))]
    fn test_common_base(#[case] raws: &[&str], #[case] expected: Option<&str>) {
        let addresses: Vec<FileAddress> = raws.iter().map(|raw| parse(raw)).collect();
        assert_eq!(common_base(&addresses), expected.map(parse));
    }

    #[test]
    fn test_relative_paths_are_absolute() {
        let address = address("some/file.txt").unwrap();
        let expected = std::env::current_dir().unwrap().join("some/file.txt");
        assert_eq!(address, FileAddress::local(expected).unwrap());
    }

    #[test]
    fn test_progress_line() {
        let mut progress = Progress {
            job_id: uuid::Uuid::nil(),
            state: JobState::Running,
            current_path: None,
            bytes_done: 10,
            bytes_total: Some(100),
            files_done: 1,
            files_total: None,
            files_skipped: 0,
            files_errored: 0,
        };
        let path = parse("/tmp/a.txt");
        assert_eq!(progress_line(&progress, &path), "[1 files, 10/100 bytes] /tmp/a.txt");
        progress.files_total = Some(4);
        assert_eq!(progress_line(&progress, &path), "[1/4 files, 10/100 bytes] /tmp/a.txt");
    }
}
