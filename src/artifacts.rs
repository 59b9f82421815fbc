// =============================================================================
// Artifacts — QA reports, microstructure CSVs, retention planning
// =============================================================================
//
// Everything written here is operator-facing: the QA report pair
// (`out/qa/QA_REPORT.json` + `.md`), microstructure CSV exports, and the
// retention planner that decides which artifact files may be deleted. All
// writes use the tmp + rename pattern.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::provider::health::ProviderHealth;

// =============================================================================
// QA report
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPhase {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaReport {
    pub generated_at: DateTime<Utc>,
    pub phases: Vec<QaPhase>,
    pub provider_health: BTreeMap<String, ProviderHealth>,
}

impl QaReport {
    pub fn passed(&self) -> bool {
        self.phases.iter().all(|p| p.passed)
    }
}

/// Write `QA_REPORT.json` and its Markdown companion under `<dir>/qa/`.
pub fn write_qa_report(dir: impl AsRef<Path>, report: &QaReport) -> Result<()> {
    let qa_dir = dir.as_ref().join("qa");
    std::fs::create_dir_all(&qa_dir).context("creating qa dir")?;

    let json_path = qa_dir.join("QA_REPORT.json");
    let json = serde_json::to_string_pretty(report).context("serializing QA report")?;
    atomic_write(&json_path, json.as_bytes())?;

    let md_path = qa_dir.join("QA_REPORT.md");
    atomic_write(&md_path, render_markdown(report).as_bytes())?;

    info!(path = %json_path.display(), phases = report.phases.len(), "QA report written");
    Ok(())
}

fn render_markdown(report: &QaReport) -> String {
    let mut md = String::new();
    md.push_str("# QA Report\n\n");
    md.push_str(&format!("Generated: {}\n\n", report.generated_at.to_rfc3339()));

    md.push_str("## Phases\n\n| Phase | Result | Detail |\n|---|---|---|\n");
    for phase in &report.phases {
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            phase.name,
            if phase.passed { "PASS" } else { "FAIL" },
            phase.detail
        ));
    }

    md.push_str("\n## Provider Health\n\n");
    md.push_str("| Venue | Success | p50 ms | p95 ms | Budget | Degraded |\n|---|---|---|---|---|---|\n");
    for (venue, h) in &report.provider_health {
        md.push_str(&format!(
            "| {venue} | {:.2} | {:.0} | {:.0} | {} | {} |\n",
            h.success_rate,
            h.latency_p50_ms,
            h.latency_p95_ms,
            h.budget_remaining,
            h.degraded_reason.as_deref().unwrap_or("no"),
        ));
    }
    md
}

// =============================================================================
// Microstructure CSV
// =============================================================================

pub const MICROSTRUCTURE_HEADERS: [&str; 6] =
    ["pair", "venue", "spread_bps", "depth_usd_2pc", "vadr", "adv"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrostructureRow {
    pub pair: String,
    pub venue: String,
    pub spread_bps: f64,
    pub depth_usd_2pc: f64,
    pub vadr: f64,
    pub adv: f64,
}

pub fn write_microstructure_csv(path: impl AsRef<Path>, rows: &[MicrostructureRow]) -> Result<()> {
    let mut csv = MICROSTRUCTURE_HEADERS.join(",");
    csv.push('\n');
    for row in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            row.pair, row.venue, row.spread_bps, row.depth_usd_2pc, row.vadr, row.adv
        ));
    }
    atomic_write(path.as_ref(), csv.as_bytes())
}

/// Parse a microstructure CSV. Header names match case-insensitively and in
/// any column order.
pub fn read_microstructure_csv(content: &str) -> Result<Vec<MicrostructureRow>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines.next().context("empty CSV")?;
    let headers: Vec<String> = header_line
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("missing column '{name}'"))
    };
    let pair_col = column("pair")?;
    let venue_col = column("venue")?;
    let spread_col = column("spread_bps")?;
    let depth_col = column("depth_usd_2pc")?;
    let vadr_col = column("vadr")?;
    let adv_col = column("adv")?;

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |i: usize| -> Result<&str> {
            fields
                .get(i)
                .copied()
                .with_context(|| format!("line {}: missing field {i}", line_no + 2))
        };
        let numeric = |i: usize| -> Result<f64> {
            field(i)?
                .parse::<f64>()
                .with_context(|| format!("line {}: bad number in field {i}", line_no + 2))
        };

        rows.push(MicrostructureRow {
            pair: field(pair_col)?.to_string(),
            venue: field(venue_col)?.to_string(),
            spread_bps: numeric(spread_col)?,
            depth_usd_2pc: numeric(depth_col)?,
            vadr: numeric(vadr_col)?,
            adv: numeric(adv_col)?,
        });
    }
    Ok(rows)
}

// =============================================================================
// Retention
// =============================================================================

/// One artifact file under retention management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub family: String,
    pub created_at: DateTime<Utc>,
    pub pinned: bool,
    pub last_pass: bool,
    pub last_run: bool,
}

impl ArtifactEntry {
    fn always_keep(&self) -> bool {
        self.pinned || self.last_pass || self.last_run
    }
}

/// Per-family delete plan: keep the newest `keep` entries plus everything
/// marked pinned / last_pass / last_run, delete the rest. Returns the paths
/// to delete.
pub fn retention_plan(entries: &[ArtifactEntry], keep: usize) -> Vec<String> {
    let mut by_family: BTreeMap<&str, Vec<&ArtifactEntry>> = BTreeMap::new();
    for entry in entries {
        by_family.entry(&entry.family).or_default().push(entry);
    }

    let mut deletions = Vec::new();
    for (_, mut family_entries) in by_family {
        family_entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for (i, entry) in family_entries.iter().enumerate() {
            if entry.always_keep() {
                continue;
            }
            if i >= keep {
                deletions.push(entry.path.clone());
            }
        }
    }
    deletions
}

// =============================================================================
// Helpers
// =============================================================================

fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("writing tmp file {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}
