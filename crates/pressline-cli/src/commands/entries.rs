use anyhow::{Context, Result};
use colored::Colorize;
use pressline_cache::TieredCache;

use crate::cli::OutputFormat;
use crate::output::{
    describe_slot, format_duration, print_json, print_rows, print_success, print_warning,
    slot_json,
};

pub async fn inspect(
    cache: &TieredCache,
    cache_name: &str,
    key: &str,
    format: OutputFormat,
) -> Result<()> {
    let inspection = cache
        .inspect(cache_name, key)
        .await
        .with_context(|| format!("failed to inspect {cache_name}/{key}"))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "key": inspection.key,
            "remote": slot_json(&inspection.remote),
            "remote_ttl_ms": inspection.remote_ttl.map(|d| d.as_millis() as u64),
            "backend": cache.stats().remote_mode,
        }))?,
        OutputFormat::Table => {
            println!("{}: {}", "Entry".cyan(), inspection.key);
            print_rows(&[
                ("Backend", cache.stats().remote_mode.to_string()),
                ("Remote", describe_slot(&inspection.remote)),
                ("Remote TTL", format_duration(inspection.remote_ttl)),
            ]);
        }
    }
    Ok(())
}

pub async fn evict(cache: &TieredCache, cache_name: &str, key: &str) -> Result<()> {
    let removed = cache
        .evict(cache_name, key)
        .await
        .with_context(|| format!("failed to evict {cache_name}/{key}"))?;

    if removed {
        print_success(&format!("Evicted {cache_name}/{key}"));
    } else {
        print_warning(&format!("{cache_name}/{key} was not cached"));
    }
    Ok(())
}

pub async fn evict_pattern(
    cache: &TieredCache,
    cache_name: &str,
    pattern: &str,
    format: OutputFormat,
) -> Result<()> {
    let removed = cache
        .evict_by_pattern(cache_name, pattern)
        .await
        .with_context(|| format!("failed to evict {cache_name}/{pattern}"))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "cache": cache_name,
            "pattern": pattern,
            "removed": removed,
        }))?,
        OutputFormat::Table => {
            print_success(&format!("Evicted {removed} entries matching {cache_name}/{pattern}"))
        }
    }
    Ok(())
}
