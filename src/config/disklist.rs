use super::settings::PlannerConfig;
use crate::planner::{Compression, DiskUnit, Encryption, EstimateMethod, HoldingPolicy, Strategy};
use anyhow::{anyhow, bail, Context, Result};

/// Split a line on whitespace, honouring double quotes and `\` escapes.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                let escaped = chars.next().ok_or_else(|| anyhow!("dangling escape"))?;
                cur.push(escaped);
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            c => {
                cur.push(c);
                in_token = true;
            }
        }
    }
    if quoted {
        bail!("unterminated quote");
    }
    if in_token {
        tokens.push(cur);
    }
    Ok(tokens)
}

fn parse_bool(value: Option<&str>) -> Result<bool> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("yes" | "true" | "1" | "on") => Ok(true),
        Some("no" | "false" | "0" | "off") => Ok(false),
        Some(other) => bail!("invalid boolean: {other}"),
    }
}

fn parse_priority(value: &str) -> Result<i32> {
    match value {
        "low" => Ok(0),
        "medium" => Ok(1),
        "high" => Ok(2),
        n => n.parse().with_context(|| format!("invalid priority: {n}")),
    }
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| anyhow!("{key} needs a value"))
}

fn apply_option(disk: &mut DiskUnit, key: &str, value: Option<&str>) -> Result<()> {
    match key {
        "device" => disk.device = Some(required(key, value)?.to_string()),
        "program" => disk.program = required(key, value)?.to_string(),
        "strategy" => {
            disk.strategy = Strategy::try_from(required(key, value)?).map_err(|e| anyhow!(e))?;
        }
        "dumpcycle" => disk.dumpcycle = required(key, value)?.parse()?,
        "priority" => disk.priority = parse_priority(required(key, value)?)?,
        "compress" => {
            disk.compress = Compression::try_from(required(key, value)?).map_err(|e| anyhow!(e))?;
        }
        "encrypt" => {
            disk.encrypt = Encryption::try_from(required(key, value)?).map_err(|e| anyhow!(e))?;
        }
        "comprate" => {
            let raw = required(key, value)?;
            let (full, incr) = raw.split_once(',').unwrap_or((raw, raw));
            disk.comprate = (full.trim().parse()?, incr.trim().parse()?);
        }
        "bumppercent" => disk.bump.percent = required(key, value)?.parse()?,
        "bumpsize" => disk.bump.size_kb = required(key, value)?.parse()?,
        "bumpdays" => disk.bump.days = required(key, value)?.parse()?,
        "bumpmult" => disk.bump.mult = required(key, value)?.parse()?,
        "skip-full" => disk.skip_full = parse_bool(value)?,
        "skip-incr" => disk.skip_incr = parse_bool(value)?,
        "maxpromoteday" => disk.maxpromoteday = required(key, value)?.parse()?,
        "splitsize" => disk.splitsize = required(key, value)?.parse()?,
        "allow-split" => disk.allow_split = parse_bool(value)?,
        "estimate" => {
            disk.estimate = required(key, value)?
                .split(',')
                .map(|m| EstimateMethod::try_from(m.trim()).map_err(|e| anyhow!(e)))
                .collect::<Result<Vec<_>>>()?;
            if disk.estimate.is_empty() {
                bail!("estimate list is empty");
            }
        }
        "spindle" => disk.spindle = required(key, value)?.parse()?,
        "maxdumps" => disk.maxdumps = required(key, value)?.parse()?,
        "directtcp" => disk.directtcp = parse_bool(value)?,
        "holding" => {
            disk.holding = HoldingPolicy::try_from(required(key, value)?).map_err(|e| anyhow!(e))?;
        }
        "todo" => disk.todo = parse_bool(value)?,
        other => bail!("unknown option {other}"),
    }
    Ok(())
}

/// Parse the disk list: `host disk [key=value ...]` per line, `#` comments.
///
/// Disks inherit the dump cycle and bump settings from `config`.
pub(crate) fn parse_disklist(contents: &str, config: &PlannerConfig) -> Result<Vec<DiskUnit>> {
    let mut disks = Vec::new();

    for (idx, raw) in contents.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens = tokenize(line).with_context(|| format!("disklist line {lineno}"))?;
        let [host, name, options @ ..] = tokens.as_slice() else {
            bail!("disklist line {lineno}: expected `host disk [options]`");
        };

        let mut disk = DiskUnit::new(host, name, config.dumpcycle, config.bump);
        for option in options {
            let (key, value) = match option.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (option.as_str(), None),
            };
            apply_option(&mut disk, key, value)
                .with_context(|| format!("disklist line {lineno}: option {option}"))?;
        }

        if disks.iter().any(|d: &DiskUnit| d.host == disk.host && d.name == disk.name) {
            bail!("disklist line {lineno}: duplicate disk {}:{}", disk.host, disk.name);
        }
        disks.push(disk);
    }

    Ok(disks)
}
