use slog::Drain;
use std::fs::File;
use std::path::Path;

/// Asynchronous terminal logger tagged with the replica it belongs to.
pub fn stdout_logger(replica_id: impl Into<String>) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id.into()))
}

/// Plain-text logger appending to `path`, for long test runs whose output would drown a terminal.
pub fn file_logger(path: impl AsRef<Path>) -> std::io::Result<slog::Logger> {
    let file = File::options().create(true).append(true).open(path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!()))
}

pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
