use std::io::Write;
use std::process::Stdio;

use anyhow::{Context, Result};
use memocache::{Cache, CacheRequest, CleanupStats, Config, FsRemoval};
use tokio::process::Command as Process;

use crate::cli::{Command, RunArgs};

/// Runs a parsed command against the configured cache.
pub async fn execute(command: Command, config: Config) -> Result<()> {
    let cache = Cache::new(config.cache).context("failed to create the cache")?;
    tracing::debug!(?cache, "Cache created");

    match command {
        Command::Clean(args) => {
            let stats = cache
                .clean_fs(fs_removal(args.extension))
                .await
                .context("failed to clean the cache")?;
            report(&stats);
        }
        Command::Purge(args) => {
            let stats = cache
                .purge_fs(fs_removal(args.extension))
                .await
                .context("failed to purge the cache")?;
            report(&stats);
        }
        Command::Remove { key, extension } => {
            let removed = cache
                .remove(&key, extension.extension.as_deref())
                .await
                .with_context(|| format!("failed to remove `{key}`"))?;
            if !removed {
                tracing::info!("No entry for `{key}`");
            }
        }
        Command::Run(args) => {
            let output = memoize(&cache, args).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn fs_removal(extension: Option<String>) -> FsRemoval {
    match extension {
        Some(extension) => FsRemoval::new().extension(extension),
        None => FsRemoval::new(),
    }
}

fn report(stats: &CleanupStats) {
    println!(
        "Removed {} and retained {} cache files",
        stats.removed, stats.retained
    );
}

/// Returns the cached output of the program, running it on a miss.
///
/// The process exits right after, so no removal is scheduled.
async fn memoize(cache: &Cache, args: RunArgs) -> Result<String> {
    let RunArgs {
        key,
        ttl,
        extension,
        skip,
        program,
    } = args;

    let mut request = CacheRequest::new(&key)
        .skip(skip)
        .schedule_removal(false);
    if let Some(ttl) = ttl {
        request = request.ttl(ttl);
    }
    if let Some(extension) = extension.extension {
        request = request.extension(extension);
    }

    let output = cache
        .compute_memoized(request, move || run_program(program))
        .await
        .with_context(|| format!("failed to compute `{key}`"))?;
    Ok(output)
}

async fn run_program(command: Vec<String>) -> Result<String> {
    let (program, args) = command.split_first().context("no program given")?;
    tracing::debug!(program = %program, ?args, "Running program");

    let output = Process::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .await
        .with_context(|| format!("failed to run `{program}`"))?;

    if !output.status.success() {
        anyhow::bail!("`{program}` exited with {}", output.status);
    }
    String::from_utf8(output.stdout).with_context(|| format!("output of `{program}` is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use memocache::CacheConfig;

    use super::*;

    fn run_args(key: &str, program: &[&str]) -> RunArgs {
        RunArgs {
            key: key.to_owned(),
            ttl: None,
            extension: crate::cli::ExtensionArgs { extension: None },
            skip: false,
            program: program.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn test_cache(dir: &memocache_test::TempDir) -> Cache {
        memocache_test::setup();
        Cache::new(CacheConfig {
            path: dir.path().join("cache"),
            ..Default::default()
        })
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_memoizes_program_output() {
        let dir = memocache_test::tempdir();
        let cache = test_cache(&dir);

        let output = memoize(&cache, run_args("greeting", &["echo", "hello"]))
            .await
            .unwrap();
        assert_eq!(output, "hello\n");

        // a program that would fail is never run while the output is fresh
        let output = memoize(&cache, run_args("greeting", &["false"]))
            .await
            .unwrap();
        assert_eq!(output, "hello\n");
        assert_eq!(
            memocache_test::list_files(dir.path().join("cache")),
            ["greeting.tmp"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_is_not_cached() {
        let dir = memocache_test::tempdir();
        let cache = test_cache(&dir);

        let err = memoize(&cache, run_args("broken", &["false"]))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("`false` exited with"));
        assert!(cache.memory_keys().is_empty());
    }
}
