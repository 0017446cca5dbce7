//! Report rendering: the dated plain-text summary and the weekly SVG chart.
//!
//! Both artifacts are rendered in memory and then moved into place, so a failed run
//! never leaves a half-written report behind.

use crate::error::ReportError;
use crate::types::RepoId;
use crate::weekly::{WeekBucket, WeeklySummary};
use chrono::NaiveDate;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

pub const CHART_FILE_NAME: &str = "weekly_issues_plot.svg";

const CHART_WIDTH: f64 = 1200.0;
const CHART_HEIGHT: f64 = 600.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_TOP: f64 = 70.0;
const MARGIN_BOTTOM: f64 = 90.0;
const Y_TICKS: u32 = 5;
const MAX_X_LABELS: usize = 12;

const OPENED_COLOR: &str = "#1f77b4";
const CLOSED_COLOR: &str = "#ff7f0e";
const CUMULATIVE_COLOR: &str = "#2ca02c";

/// Run-level facts printed alongside the bucket table.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub repo: &'a RepoId,
    pub run_date: NaiveDate,
    pub summary: WeeklySummary,
    /// `None` when the fork count could not be fetched.
    pub forks_count: Option<u64>,
}

/// Where the artifacts of a run were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub summary: PathBuf,
    pub chart: PathBuf,
}

/// `YYYYMMDD_weekly_issues_results.txt` for the given run date.
pub fn results_file_name(run_date: NaiveDate) -> String {
    format!("{}_weekly_issues_results.txt", run_date.format("%Y%m%d"))
}

/// Writes the `#`-prefixed header followed by one line per bucket.
pub fn write_summary<W: Write>(
    buckets: &[WeekBucket],
    context: &ReportContext<'_>,
    writer: &mut W,
) -> std::fmt::Result {
    let summary = &context.summary;

    writeln!(writer, "# Weekly issue analysis for {}", context.repo)?;
    writeln!(writer, "# generated: {}", context.run_date.format("%Y-%m-%d"))?;
    writeln!(
        writer,
        "# weeks={} opened={} closed={} open={}",
        buckets.len(),
        summary.total_opened,
        summary.total_closed,
        summary.currently_open
    )?;
    if let Some(forks) = context.forks_count {
        writeln!(writer, "# forks={}", forks)?;
    }

    for bucket in buckets {
        writeln!(
            writer,
            "{}: opened={} closed={} cumulative_open={}",
            bucket.week_start.format("%Y-%m-%d"),
            bucket.opened_count,
            bucket.closed_count,
            bucket.cumulative_open
        )?;
    }

    Ok(())
}

/// Renders a line chart of opened, closed and cumulative open issues per week.
pub fn render_chart<W: Write>(
    buckets: &[WeekBucket],
    repo: &RepoId,
    writer: &mut W,
) -> std::fmt::Result {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let plot_bottom = MARGIN_TOP + plot_height;

    let y_max = buckets
        .iter()
        .flat_map(|b| [b.opened_count as f64, b.closed_count as f64, b.cumulative_open as f64])
        .fold(1.0_f64, f64::max);

    let x_at = |i: usize| -> f64 {
        if buckets.len() <= 1 {
            MARGIN_LEFT + plot_width / 2.0
        } else {
            MARGIN_LEFT + plot_width * i as f64 / (buckets.len() - 1) as f64
        }
    };
    let y_at = |value: f64| -> f64 { plot_bottom - plot_height * value / y_max };

    writeln!(
        writer,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="system-ui, -apple-system, sans-serif">"##,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    )?;
    writeln!(writer, r##"  <rect width="100%" height="100%" fill="#ffffff"/>"##)?;
    writeln!(
        writer,
        r##"  <text x="{}" y="35" text-anchor="middle" font-size="20" font-weight="700">Weekly Analysis of Issues for {}</text>"##,
        CHART_WIDTH / 2.0,
        escape_xml(&repo.to_string())
    )?;

    // Horizontal grid with y-axis labels.
    for tick in 0..=Y_TICKS {
        let value = y_max * f64::from(tick) / f64::from(Y_TICKS);
        let y = y_at(value);
        writeln!(
            writer,
            r##"  <line x1="{x1}" y1="{y:.1}" x2="{x2}" y2="{y:.1}" stroke="#e5e5e5"/>"##,
            x1 = MARGIN_LEFT,
            x2 = MARGIN_LEFT + plot_width,
            y = y
        )?;
        writeln!(
            writer,
            r##"  <text x="{}" y="{:.1}" text-anchor="end" dominant-baseline="middle" font-size="12">{:.0}</text>"##,
            MARGIN_LEFT - 8.0,
            y,
            value
        )?;
    }

    writeln!(
        writer,
        r##"  <line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="#333333"/>"##,
        l = MARGIN_LEFT,
        r = MARGIN_LEFT + plot_width,
        b = plot_bottom
    )?;
    writeln!(
        writer,
        r##"  <line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="#333333"/>"##,
        l = MARGIN_LEFT,
        t = MARGIN_TOP,
        b = plot_bottom
    )?;
    writeln!(
        writer,
        r##"  <text x="{}" y="{}" text-anchor="middle" font-size="14">Week</text>"##,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0
    )?;
    writeln!(
        writer,
        r##"  <text x="20" y="{y}" text-anchor="middle" font-size="14" transform="rotate(-90 20 {y})">Issues</text>"##,
        y = MARGIN_TOP + plot_height / 2.0
    )?;

    if buckets.is_empty() {
        writeln!(
            writer,
            r##"  <text x="{}" y="{}" text-anchor="middle" font-size="16" fill="#888888">No issues</text>"##,
            MARGIN_LEFT + plot_width / 2.0,
            MARGIN_TOP + plot_height / 2.0
        )?;
    }

    let label_step = buckets.len().div_ceil(MAX_X_LABELS).max(1);
    for (i, bucket) in buckets.iter().enumerate().step_by(label_step) {
        let x = x_at(i);
        writeln!(
            writer,
            r##"  <text x="{x:.1}" y="{y}" text-anchor="end" font-size="11" transform="rotate(-35 {x:.1} {y})">{label}</text>"##,
            x = x,
            y = plot_bottom + 18.0,
            label = bucket.week_start.format("%Y-%m-%d")
        )?;
    }

    let series: [(&str, &str, fn(&WeekBucket) -> f64); 3] = [
        ("Issues Opened", OPENED_COLOR, |b| b.opened_count as f64),
        ("Issues Closed", CLOSED_COLOR, |b| b.closed_count as f64),
        ("Cumulative Open", CUMULATIVE_COLOR, |b| b.cumulative_open as f64),
    ];

    for (index, (name, color, value_of)) in series.iter().enumerate() {
        if !buckets.is_empty() {
            let points: Vec<String> = buckets
                .iter()
                .enumerate()
                .map(|(i, b)| format!("{:.1},{:.1}", x_at(i), y_at(value_of(b))))
                .collect();
            writeln!(
                writer,
                r##"  <polyline fill="none" stroke="{}" stroke-width="2" points="{}"/>"##,
                color,
                points.join(" ")
            )?;
            for (i, b) in buckets.iter().enumerate() {
                writeln!(
                    writer,
                    r##"  <circle cx="{:.1}" cy="{:.1}" r="3" fill="{}"/>"##,
                    x_at(i),
                    y_at(value_of(b)),
                    color
                )?;
            }
        }

        let legend_x = MARGIN_LEFT + 10.0 + 170.0 * index as f64;
        writeln!(
            writer,
            r##"  <rect x="{:.1}" y="48" width="14" height="4" fill="{}"/>"##,
            legend_x, color
        )?;
        writeln!(
            writer,
            r##"  <text x="{:.1}" y="54" font-size="13">{}</text>"##,
            legend_x + 20.0,
            name
        )?;
    }

    writeln!(writer, "</svg>")?;
    Ok(())
}

/// Renders both artifacts and moves them into `dir`.
///
/// The chart path is fixed and overwritten on every run; the summary path carries the
/// run date.
pub fn write_artifacts(
    dir: &Path,
    buckets: &[WeekBucket],
    context: &ReportContext<'_>,
) -> Result<ReportPaths, ReportError> {
    let mut summary = String::new();
    write_summary(buckets, context, &mut summary)?;

    let mut chart = String::new();
    render_chart(buckets, context.repo, &mut chart)?;

    fs::create_dir_all(dir)?;

    let paths = ReportPaths {
        summary: dir.join(results_file_name(context.run_date)),
        chart: dir.join(CHART_FILE_NAME),
    };

    let summary_tmp = sibling_path(&paths.summary, ".tmp");
    let chart_tmp = sibling_path(&paths.chart, ".tmp");

    let staged = fs::write(&summary_tmp, summary).and_then(|()| fs::write(&chart_tmp, chart));
    if let Err(e) = staged {
        let _ = fs::remove_file(&summary_tmp);
        let _ = fs::remove_file(&chart_tmp);
        return Err(e.into());
    }

    if let Err(e) = commit(&summary_tmp, &paths.summary, &chart_tmp, &paths.chart) {
        let _ = fs::remove_file(&summary_tmp);
        let _ = fs::remove_file(&chart_tmp);
        return Err(e.into());
    }

    tracing::info!(
        summary = %paths.summary.display(),
        chart = %paths.chart.display(),
        "Report written"
    );

    Ok(paths)
}

/// Moves both staged files into place. If the chart cannot be moved, the summary is
/// rolled back to whatever was there before (usually nothing, as it is dated).
fn commit(
    summary_tmp: &Path,
    summary: &Path,
    chart_tmp: &Path,
    chart: &Path,
) -> std::io::Result<()> {
    let backup = sibling_path(summary, ".bak");
    let had_summary = summary.exists();
    if had_summary {
        fs::rename(summary, &backup)?;
    }

    let result = fs::rename(summary_tmp, summary).and_then(|()| fs::rename(chart_tmp, chart));

    if had_summary {
        if result.is_ok() {
            let _ = fs::remove_file(&backup);
        } else {
            let _ = fs::rename(&backup, summary);
        }
    } else if result.is_err() {
        let _ = fs::remove_file(summary);
    }

    result
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
