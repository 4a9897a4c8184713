//! Subcommand implementations.

use std::io::Write;

use anyhow::{bail, Context, Result};
use encore_config::Config;
use encore_download::{Downloader, Progress};
use encore_runtime::AsyncRuntime;
use encore_store::{EvictionPolicy, Lookup, PayloadKind, ReconcileReport, StoreRegistry, Value};
use indicatif::{ProgressBar, ProgressStyle};

use crate::target::StoreRef;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn stats(registry: &StoreRegistry, target: &StoreRef) -> Result<()> {
    let store = target.open(registry)?;
    let stats = store.statistics();
    println!();
    println!("  {}  ({})", target, store.directory().display());
    println!("    entries:    {}", store.len());
    println!("    size:       {}", format_bytes(stats.size));
    if let Some(cache) = store.as_cache() {
        println!("    limit:      {}", format_bytes(cache.max_bytes()));
    }
    println!("    hits:       {}", stats.hits);
    println!("    misses:     {}", stats.misses);
    println!("    hit ratio:  {:.1}%", stats.hit_ratio() * 100.0);
    println!("    saves:      {}", stats.saves);
    println!("    evictions:  {}", stats.evictions);
    println!("    deletions:  {}", stats.deletions);
    Ok(())
}

fn print_keys(label: &str, keys: &[String]) {
    if !keys.is_empty() {
        println!("    {:<16}{}", label, keys.join(", "));
    }
}

fn print_report(report: &ReconcileReport) {
    print_keys("adopted:", &report.adopted);
    print_keys("deleted files:", &report.deleted_files);
    print_keys("kept files:", &report.kept_files);
    print_keys("dropped:", &report.dropped_entries);
    print_keys("resized:", &report.resized);
    print_keys("renamed:", &report.renamed);
    print_keys("expired:", &report.expired);
    if report.stale_temporaries > 0 {
        println!("    {:<16}{}", "temporaries:", report.stale_temporaries);
    }
    if report.repaired {
        println!("    index order repaired");
    }
}

pub fn reconcile(registry: &StoreRegistry, target: &StoreRef, restore: bool) -> Result<()> {
    let store = target.open(registry)?;
    let report = store
        .reconcile(restore)
        .with_context(|| format!("Reconcile of {} failed", target))?;
    println!();
    if report.is_clean() {
        println!("  {}: journal and files agree", target);
    } else {
        println!("  {}: repaired", target);
    }
    print_report(&report);
    Ok(())
}

pub fn collect(registry: &StoreRegistry, target: &StoreRef) -> Result<()> {
    let StoreRef::Cache(name) = target else {
        bail!("collect only applies to caches, got {}", target);
    };
    let cache = registry.cache(name)?;
    let expired = cache.collect();
    println!("  {}: {} expired entries removed", target, expired.len());
    print_keys("expired:", &expired);
    Ok(())
}

pub fn evict(
    registry: &StoreRegistry,
    target: &StoreRef,
    policy: EvictionPolicy,
    count: usize,
) -> Result<()> {
    let StoreRef::Cache(name) = target else {
        bail!("evict only applies to caches, got {}", target);
    };
    let cache = registry.cache(name)?;
    let evicted = cache.evict(policy, count);
    println!("  {}: {} entries evicted ({:?})", target, evicted.len(), policy);
    print_keys("evicted:", &evicted);
    Ok(())
}

pub fn clear(registry: &StoreRegistry, target: &StoreRef) -> Result<()> {
    let store = target.open(registry)?;
    let removed = store.clear()?;
    println!("  {}: {} entries removed", target, removed);
    Ok(())
}

pub fn get(registry: &StoreRegistry, target: &StoreRef, key: &str) -> Result<()> {
    let store = target.open(registry)?;
    let value = match store.get(key)? {
        Lookup::Hit(value) => value,
        Lookup::Miss => bail!("{} has no entry {:?}", target, key),
    };
    let mut stdout = std::io::stdout().lock();
    match value {
        Value::Bytes(bytes) => stdout.write_all(&bytes)?,
        Value::Text(text) => writeln!(stdout, "{}", text)?,
        Value::Dict(map) => writeln!(stdout, "{}", serde_json::to_string_pretty(&map)?)?,
    }
    stdout.flush()?;
    Ok(())
}

pub fn fingerprint(input: &str) -> Result<()> {
    println!("{}", encore_store::fingerprint(input));
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:32.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

pub fn download(
    config: &Config,
    registry: &StoreRegistry,
    url: &str,
    store_name: &str,
    key: &str,
    extension: Option<&str>,
    resume: bool,
) -> Result<()> {
    let store = registry.datastore(store_name)?;
    let downloader = Downloader::new(&config.download).context("Failed to build HTTP client")?;
    let io = AsyncRuntime::from_config(&config.workers)?;

    let mut handle = store
        .open_write_file(key, PayloadKind::Binary, extension, resume)
        .with_context(|| format!("Cannot write {:?} into data:{}", key, store_name))?;

    let pb = progress_bar();
    let bar = pb.clone();
    let url_owned = url.to_string();
    let job = io.spawn(async move {
        let result = downloader
            .download_with_fallback(&url_owned, &mut handle, move |p: Progress| {
                if let Some(total) = p.total {
                    bar.set_length(total);
                }
                bar.set_position(p.current);
            })
            .await;
        (handle, result)
    });
    let (handle, result) = job.wait()?;
    pb.finish_and_clear();

    match result {
        Ok(_) => {
            let size = store.close_write_file(handle)?;
            println!(
                "  data:{}/{}  {}  <- {}",
                store_name,
                key,
                format_bytes(size),
                url
            );
            Ok(())
        }
        Err(err) => {
            store.discard_write_file(handle)?;
            Err(err).with_context(|| format!("Download of {} failed", url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MiB");
    }
}
