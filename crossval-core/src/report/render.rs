//! Human-readable Markdown summary of a report.

use std::fmt::Write as _;

use super::models::ValidationReport;
use crate::comparison::DivergenceClass;
use crate::models::FetchStatus;

/// Renders a Markdown summary: parameters, pool and sample sizes, status
/// counts per platform, divergence counts and the full failure list.
pub fn render_summary(report: &ValidationReport) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = render_into(report, &mut out);
    out
}

fn render_into(report: &ValidationReport, out: &mut String) -> std::fmt::Result {
    let params = &report.parameters;
    let platforms: Vec<String> = params.platforms.iter().map(ToString::to_string).collect();

    writeln!(out, "# Cross-platform validation summary")?;
    writeln!(out)?;
    writeln!(out, "| Parameter | Value |")?;
    writeln!(out, "|---|---|")?;
    writeln!(out, "| Run | `{}` |", report.run_id)?;
    writeln!(out, "| Started | {} |", params.started_at.to_rfc3339())?;
    writeln!(out, "| Duration | {:.1}s |", report.duration_seconds())?;
    writeln!(out, "| Seed | {} |", params.seed)?;
    writeln!(out, "| Target sample | {} |", params.target_n)?;
    writeln!(out, "| Platforms | {} |", platforms.join(", "))?;
    writeln!(out, "| Max cache age | {}h |", params.max_cache_age_secs.saturating_div(3600))?;
    writeln!(out, "| Metadata | {} |", escape(&params.metadata_source))?;
    writeln!(out)?;

    writeln!(out, "## Pool and sample")?;
    writeln!(out)?;
    writeln!(
        out,
        "{} indicators loaded, {} valid, {} rejected.",
        report.pool.loaded,
        report.pool.valid,
        report.pool.rejected.values().sum::<usize>()
    )?;
    for (reason, count) in &report.pool.rejected {
        writeln!(out, "- {}: {}", reason, count)?;
    }
    writeln!(out)?;
    write!(
        out,
        "Sampled {} indicators across {} strata",
        report.sample.total,
        report.sample.allocations.len()
    )?;
    if report.sample.oversampled {
        write!(
            out,
            " (above the target of {} so every stratum is represented)",
            params.target_n
        )?;
    }
    writeln!(out, ".")?;
    writeln!(out)?;

    writeln!(out, "## Fetch status by platform")?;
    writeln!(out)?;
    write!(out, "| Platform |")?;
    for status in FetchStatus::ALL {
        write!(out, " {} |", status)?;
    }
    writeln!(out)?;
    write!(out, "|---|")?;
    for _ in FetchStatus::ALL {
        write!(out, "---:|")?;
    }
    writeln!(out)?;
    for platform in &params.platforms {
        write!(out, "| {} |", platform)?;
        for status in FetchStatus::ALL {
            write!(out, " {} |", report.summary.status_count(*platform, status))?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;

    writeln!(out, "## Row-count divergence")?;
    writeln!(out)?;
    writeln!(
        out,
        "{} of {} indicators had data on two or more platforms.",
        report.summary.comparable, report.summary.total_tested
    )?;
    writeln!(out)?;
    writeln!(out, "| Class | Indicators |")?;
    writeln!(out, "|---|---:|")?;
    for class in DivergenceClass::ALL {
        writeln!(out, "| {} | {} |", class, report.summary.divergence_count(class))?;
    }
    writeln!(out)?;

    let divergent: Vec<_> = report.verdicts_at_least(DivergenceClass::Minor).collect();
    if !divergent.is_empty() {
        writeln!(out, "| Indicator | Class | Rows | Ratio |")?;
        writeln!(out, "|---|---|---|---:|")?;
        for verdict in divergent {
            let rows: Vec<String> = verdict
                .row_count_by_platform
                .iter()
                .map(|(platform, rows)| format!("{} {}", platform, rows))
                .collect();
            let ratio = verdict
                .row_ratio
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "| {} | {} | {} | {} |",
                verdict.indicator_code,
                verdict.row_divergence_class,
                rows.join(", "),
                ratio
            )?;
        }
        writeln!(out)?;
    }

    let gaps: Vec<_> = report
        .verdicts
        .iter()
        .filter(|v| v.has_core_column_gap())
        .collect();
    if !gaps.is_empty() {
        writeln!(out, "## Missing core columns")?;
        writeln!(out)?;
        for verdict in gaps {
            let platforms: Vec<String> = verdict
                .core_columns_present
                .iter()
                .filter(|(_, present)| !**present)
                .map(|(platform, _)| platform.to_string())
                .collect();
            writeln!(out, "- {}: {}", verdict.indicator_code, platforms.join(", "))?;
        }
        writeln!(out)?;
    }

    writeln!(out, "## Failures")?;
    writeln!(out)?;
    if report.failures.is_empty() {
        writeln!(out, "None.")?;
    } else {
        writeln!(out, "| Indicator | Platform | Status | Detail |")?;
        writeln!(out, "|---|---|---|---|")?;
        for failure in &report.failures {
            writeln!(
                out,
                "| {} | {} | {} | {} |",
                failure.indicator_code,
                failure.platform,
                failure.status,
                escape(failure.detail.as_deref().unwrap_or(""))
            )?;
        }
    }

    Ok(())
}

/// Keeps free text inside one table cell.
fn escape(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}
