//! Query command implementation

use anyhow::{bail, Context, Result};
use pkgdb::prelude::*;

pub fn execute(
    config: DbConfig,
    tag: &str,
    key: Option<&str>,
    filters: &[String],
    instances: &[u32],
) -> Result<()> {
    let tag: Tag = tag.parse()?;
    let filters = filters
        .iter()
        .map(|spec| parse_filter(spec.as_str()))
        .collect::<Result<Vec<_>>>()?;

    let db = Database::open(config).context("Failed to open database")?;
    TerminationController::global().install_signal_listener()?;

    let key_bytes = match (tag, key) {
        (Tag::Packages, Some(k)) => {
            let instance: u32 = k
                .parse()
                .with_context(|| format!("'{k}' is not an instance number"))?;
            Some(instance.to_be_bytes().to_vec())
        }
        (_, Some(k)) => Some(k.as_bytes().to_vec()),
        (_, None) => None,
    };

    let mut iter = db.match_iter(tag, key_bytes.as_deref())?;
    if !instances.is_empty() {
        iter.append(instances)?;
    }
    for (tag, mode, pattern) in &filters {
        iter.set_pattern(*tag, *mode, pattern)?;
    }

    let mut shown = 0usize;
    while let Some(header) = iter.next_header()? {
        let nevra = header.nevra();
        println!("{:>8}  {}", iter.offset(), nevra);
        shown += 1;
    }
    tracing::debug!("{} of {} candidates matched", shown, iter.count());

    iter.free()?;
    db.close()?;
    Ok(())
}

/// `TAG:MODE:PATTERN`; the pattern may itself contain colons.
fn parse_filter(spec: &str) -> Result<(Tag, MatchMode, String)> {
    let mut parts = spec.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(mode), Some(pattern)) => {
            Ok((tag.parse()?, mode.parse()?, pattern.to_string()))
        }
        _ => bail!("filter '{spec}' is not TAG:MODE:PATTERN"),
    }
}
