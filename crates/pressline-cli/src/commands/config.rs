use anyhow::Result;
use colored::Colorize;
use pressline_cache::Settings;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;
use crate::output::print_json;

pub fn show(settings: &Settings, source: Option<&str>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::to_value(settings)?),
        OutputFormat::Table => {
            println!(
                "{}: {}",
                "Source".cyan(),
                source.unwrap_or("pressline.toml (if present) + PRESSLINE__* env")
            );
            print_ttl_table(settings);
            println!("{}", toml::to_string_pretty(settings)?);
            Ok(())
        }
    }
}

fn print_ttl_table(settings: &Settings) {
    let cache = &settings.cache;
    let mut names: Vec<_> = cache.ttl_secs.iter().collect();
    names.sort();

    let mut builder = Builder::default();
    builder.push_record(["Cache", "TTL (s)", "Negative TTL (s)"]);
    for (name, secs) in names {
        builder.push_record([
            name.clone(),
            secs.to_string(),
            cache.negative_ttl_secs.to_string(),
        ]);
    }
    builder.push_record([
        "(default)".to_string(),
        cache.default_ttl_secs.to_string(),
        cache.negative_ttl_secs.to_string(),
    ]);
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}
