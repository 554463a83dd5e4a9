//! Sweep report aggregation and rendering
//!
//! Collects one [`ModelReport`] per (environment, variable tuple) and
//! renders markdown comparison tables: a flat table over the non-reduced
//! variables, or a two-variable pivot grid per metric. Re-rendered on
//! every update so the report file always reflects current progress.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{Environment, ReportSpec};
use crate::error::Result;
use crate::train::ModelReport;

/// Aggregated reports across a sweep, insertion order preserved.
#[derive(Debug, Default)]
pub struct ReportAggregator {
    environments: Vec<EnvReports>,
}

#[derive(Debug)]
struct EnvReports {
    name: String,
    entries: Vec<(Vec<String>, ModelReport)>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the report for one variant.
    pub fn update(&mut self, env_name: &str, values: &[String], report: ModelReport) {
        let env = match self.environments.iter_mut().find(|e| e.name == env_name) {
            Some(env) => env,
            None => {
                self.environments.push(EnvReports {
                    name: env_name.to_string(),
                    entries: Vec::new(),
                });
                self.environments.last_mut().expect("just pushed")
            }
        };
        match env.entries.iter_mut().find(|(v, _)| v == values) {
            Some((_, existing)) => *existing = report,
            None => env.entries.push((values.to_vec(), report)),
        }
    }

    pub fn get(&self, env_name: &str, values: &[String]) -> Option<&ModelReport> {
        self.environments
            .iter()
            .find(|e| e.name == env_name)?
            .entries
            .iter()
            .find(|(v, _)| v == values)
            .map(|(_, r)| r)
    }

    /// Render the full report: one section per environment that has
    /// results, laid out per its report spec.
    pub fn render(&self, environments: &[Environment]) -> String {
        let mut s = String::from("\n# Report\n");
        for env in environments {
            let Some(reports) = self.environments.iter().find(|e| e.name == env.name) else {
                continue;
            };
            let title = env.title.as_deref().unwrap_or(&env.name);
            s.push_str(&format!("\n## {title}\n"));

            let metrics = gather_metrics(&reports.entries);
            match &env.report {
                ReportSpec::Raw { reduce } => {
                    s.push_str(&render_raw(env, &reports.entries, reduce, &metrics));
                }
                ReportSpec::Table { row, col } => {
                    s.push_str(&render_table(env, &reports.entries, row, col, &metrics));
                }
            }
        }
        s
    }

    /// Render and write the report artifact to
    /// `<reports_dir>/<config_name>.md`.
    pub fn write(
        &self,
        environments: &[Environment],
        config_name: &str,
        reports_dir: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(reports_dir)?;
        let path = reports_dir.join(format!("{config_name}.md"));
        std::fs::write(&path, self.render(environments))?;
        Ok(path)
    }
}

/// Union of metric names across reports, sorted for stable rendering.
fn gather_metrics(entries: &[(Vec<String>, ModelReport)]) -> Vec<String> {
    let mut set = BTreeSet::new();
    for (_, report) in entries {
        set.extend(report.metrics.iter().cloned());
    }
    set.into_iter().collect()
}

/// Format one report's value for `metric`: three decimals, an in-progress
/// suffix while unfinished, empty when absent.
pub fn format_result(report: Option<&ModelReport>, metric: &str) -> String {
    let Some(report) = report else {
        return String::new();
    };
    let Some(value) = report.current_results.get(metric) else {
        return String::new();
    };
    let status = if report.finished {
        String::new()
    } else if let (Some(fold), Some(folds)) = (
        report.cross_validation_current_fold,
        report.cross_validation_num_folds,
    ) {
        format!(" (cross validation {fold}/{folds})")
    } else {
        format!(" (epoch {}/{})", report.current_epoch, report.num_epochs)
    };
    format!("{value:.3}{status}")
}

fn render_raw(
    env: &Environment,
    entries: &[(Vec<String>, ModelReport)],
    reduce: &[String],
    metrics: &[String],
) -> String {
    let keep: Vec<usize> = (0..env.variable_names.len())
        .filter(|&i| !reduce.contains(&env.variable_names[i]))
        .collect();
    let remaining_names: Vec<String> = keep
        .iter()
        .map(|&i| env.variable_names[i].clone())
        .collect();

    // group reports by the remaining tuple, insertion order preserved
    let mut groups: Vec<(Vec<String>, Vec<&ModelReport>)> = Vec::new();
    for (values, report) in entries {
        let reduced: Vec<String> = keep.iter().map(|&i| values[i].clone()).collect();
        match groups.iter_mut().find(|(k, _)| *k == reduced) {
            Some((_, reports)) => reports.push(report),
            None => groups.push((reduced, vec![report])),
        }
    }

    let mut table = Vec::with_capacity(groups.len() + 1);
    let mut header = remaining_names;
    header.extend(metrics.iter().cloned());
    table.push(header);
    for (key, reports) in &groups {
        let mut row = key.clone();
        for metric in metrics {
            let cell = reports
                .iter()
                .map(|r| format_result(Some(r), metric))
                .collect::<Vec<_>>()
                .join(" ~ ");
            row.push(cell);
        }
        table.push(row);
    }
    format!("\n{}\n", table_to_string(&table))
}

fn render_table(
    env: &Environment,
    entries: &[(Vec<String>, ModelReport)],
    row: &str,
    col: &str,
    metrics: &[String],
) -> String {
    let row_dim = env
        .variable_names
        .iter()
        .position(|n| n == row)
        .expect("validated row variable");
    let col_dim = env
        .variable_names
        .iter()
        .position(|n| n == col)
        .expect("validated col variable");
    let row_values = &env.variable_values[row_dim];
    let col_values = &env.variable_values[col_dim];

    let mut s = String::new();
    for metric in metrics {
        s.push_str(&format!("\nResults (metric: {metric})\n"));
        let mut grid: Vec<Vec<Option<String>>> = vec![vec![None; col_values.len()]; row_values.len()];
        for (values, report) in entries {
            let Some(r) = row_values.iter().position(|v| v == &values[row_dim]) else {
                continue;
            };
            let Some(c) = col_values.iter().position(|v| v == &values[col_dim]) else {
                continue;
            };
            let formatted = format_result(Some(report), metric);
            match &mut grid[r][c] {
                // several variants land in the same cell when other
                // dimensions vary
                Some(cell) => {
                    cell.push_str(" / ");
                    cell.push_str(&formatted);
                }
                empty => *empty = Some(formatted),
            }
        }

        let mut table = Vec::with_capacity(row_values.len() + 1);
        let mut header = vec![String::new()];
        header.extend(col_values.iter().cloned());
        table.push(header);
        for (r, row_value) in row_values.iter().enumerate() {
            let mut line = vec![row_value.clone()];
            line.extend(grid[r].iter().map(|c| c.clone().unwrap_or_default()));
            table.push(line);
        }
        s.push_str(&format!("\n{}\n", table_to_string(&table)));
    }
    s
}

/// Render a 2D grid as a markdown table, one space of cell padding.
pub fn table_to_string(table: &[Vec<String>]) -> String {
    const PADDING: usize = 1;
    if table.is_empty() || table[0].is_empty() {
        return String::new();
    }
    let num_cols = table[0].len();
    let col_sizes: Vec<usize> = (0..num_cols)
        .map(|i| {
            table
                .iter()
                .map(|row| row.get(i).map_or(0, |cell| cell.chars().count()))
                .max()
                .unwrap_or(0)
                + 2 * PADDING
        })
        .collect();

    let pad = |cell: &str, width: usize| {
        let fill = width - cell.chars().count() - PADDING;
        format!("{}{}{}", " ".repeat(PADDING), cell, " ".repeat(fill))
    };

    let mut s = String::new();
    // header
    s.push('|');
    for (i, cell) in table[0].iter().enumerate() {
        s.push_str(&pad(cell, col_sizes[i]));
        s.push('|');
    }
    s.push('\n');
    s.push('|');
    for &size in &col_sizes {
        s.push_str(&"-".repeat(size));
        s.push('|');
    }
    s.push('\n');
    // content
    for row in &table[1..] {
        s.push('|');
        for (i, cell) in row.iter().enumerate() {
            s.push_str(&pad(cell, col_sizes[i]));
            s.push('|');
        }
        s.push('\n');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportSpec;
    use std::collections::HashMap;

    fn finished_report(metric: &str, value: f64) -> ModelReport {
        let mut report = ModelReport::new(vec![metric.to_string()], 10);
        report.current_results = HashMap::from([(metric.to_string(), value)]);
        report.finish();
        report
    }

    fn running_report(metric: &str, value: f64, epoch: u32) -> ModelReport {
        let mut report = ModelReport::new(vec![metric.to_string()], 10);
        report.current_results = HashMap::from([(metric.to_string(), value)]);
        report.current_epoch = epoch;
        report
    }

    fn env(names: &[&str], values: &[&[&str]], report: ReportSpec) -> Environment {
        Environment {
            name: "grid".into(),
            title: None,
            default: true,
            variable_names: names.iter().map(|s| s.to_string()).collect(),
            variable_values: values
                .iter()
                .map(|vs| vs.iter().map(|s| s.to_string()).collect())
                .collect(),
            variables_list: Vec::new(),
            configs_list: Vec::new(),
            report,
        }
    }

    #[test]
    fn test_format_result_variants() {
        assert_eq!(format_result(None, "acc"), "");
        assert_eq!(format_result(Some(&finished_report("acc", 0.9)), "acc"), "0.900");
        assert_eq!(
            format_result(Some(&running_report("acc", 0.9, 3)), "acc"),
            "0.900 (epoch 3/10)"
        );

        let mut cv = running_report("acc", 0.9, 3);
        cv.set_fold(2, 5);
        assert_eq!(
            format_result(Some(&cv), "acc"),
            "0.900 (cross validation 2/5)"
        );

        // metric absent
        assert_eq!(format_result(Some(&finished_report("acc", 0.9)), "f1"), "");
    }

    #[test]
    fn test_raw_reduction_joins_in_order() {
        let env = env(
            &["lr", "seed"],
            &[&["0.1"], &["1", "2", "3"]],
            ReportSpec::Raw {
                reduce: vec!["seed".into()],
            },
        );
        let mut agg = ReportAggregator::new();
        for (i, seed) in ["1", "2", "3"].iter().enumerate() {
            agg.update(
                "grid",
                &["0.1".to_string(), seed.to_string()],
                finished_report("acc", 0.5 + i as f64 * 0.1),
            );
        }

        let rendered = agg.render(std::slice::from_ref(&env));
        assert!(rendered.contains("0.500 ~ 0.600 ~ 0.700"));
        // header keeps the remaining variable plus the metric
        assert!(rendered.contains("| lr "));
        assert!(rendered.contains("| acc "));
        assert!(!rendered.contains("seed"));
    }

    #[test]
    fn test_pivot_grid_populates_all_cells() {
        let env = env(
            &["lr", "batch_size"],
            &[&["0.1", "0.01"], &["16", "32"]],
            ReportSpec::Table {
                row: "lr".into(),
                col: "batch_size".into(),
            },
        );
        let mut agg = ReportAggregator::new();
        let mut value = 0.1;
        for lr in ["0.1", "0.01"] {
            for bs in ["16", "32"] {
                agg.update(
                    "grid",
                    &[lr.to_string(), bs.to_string()],
                    finished_report("acc", value),
                );
                value += 0.1;
            }
        }

        let rendered = agg.render(std::slice::from_ref(&env));
        assert!(rendered.contains("Results (metric: acc)"));
        // header row holds the column values, header column the row values
        assert!(rendered.contains("| 16 "));
        assert!(rendered.contains("| 32 "));
        assert!(rendered.contains("| 0.1 "));
        assert!(rendered.contains("| 0.01 "));
        for expected in ["0.100", "0.200", "0.300", "0.400"] {
            assert!(rendered.contains(expected), "missing cell {expected}");
        }
    }

    #[test]
    fn test_pivot_collisions_join_with_slash() {
        // a third dimension (seed) varies, so two variants share each cell
        let env = env(
            &["lr", "batch_size", "seed"],
            &[&["0.1"], &["16"], &["1", "2"]],
            ReportSpec::Table {
                row: "lr".into(),
                col: "batch_size".into(),
            },
        );
        let mut agg = ReportAggregator::new();
        agg.update(
            "grid",
            &["0.1".into(), "16".into(), "1".into()],
            finished_report("acc", 0.5),
        );
        agg.update(
            "grid",
            &["0.1".into(), "16".into(), "2".into()],
            finished_report("acc", 0.6),
        );

        let rendered = agg.render(std::slice::from_ref(&env));
        assert!(rendered.contains("0.500 / 0.600"));
    }

    #[test]
    fn test_update_replaces_existing_entry() {
        let mut agg = ReportAggregator::new();
        agg.update("grid", &["0.1".into()], running_report("acc", 0.4, 1));
        agg.update("grid", &["0.1".into()], finished_report("acc", 0.8));

        let report = agg.get("grid", &["0.1".into()]).unwrap();
        assert!(report.finished);
        assert_eq!(report.current_results["acc"], 0.8);
    }

    #[test]
    fn test_table_to_string_markdown_shape() {
        let table = vec![
            vec!["lr".to_string(), "acc".to_string()],
            vec!["0.1".to_string(), "0.900".to_string()],
        ];
        let s = table_to_string(&table);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("| lr"));
        assert!(lines[1].chars().all(|c| c == '|' || c == '-'));
        assert!(lines[2].contains("0.900"));
    }

    #[test]
    fn test_write_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&["lr"], &[&["0.1"]], ReportSpec::default());
        let mut agg = ReportAggregator::new();
        agg.update("grid", &["0.1".into()], finished_report("acc", 0.9));

        let path = agg
            .write(std::slice::from_ref(&env), "demo", dir.path())
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "demo.md");
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("\n# Report\n"));
        assert!(contents.contains("## grid"));
    }
}
