//! Branch and loop coverage.
//!
//! Every transform pass returns a [`CoverageRecord`] next to its SQL. A
//! [`CoverageHandler`] can be attached to the engine to aggregate records
//! across executions; [`CoverageCollector`] is the in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;

use dashmap::DashMap;
use serde::Serialize;

use crate::node::NodeTree;

/// Which sides of a branch were observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchOutcome {
    True,
    False,
    Both,
}

impl BranchOutcome {
    pub fn from_bool(taken: bool) -> Self {
        if taken { Self::True } else { Self::False }
    }

    pub fn merge(self, other: Self) -> Self {
        if self == other { self } else { Self::Both }
    }

    /// Number of sides covered, 1 or 2.
    pub fn sides(self) -> usize {
        match self {
            Self::Both => 2,
            _ => 1,
        }
    }
}

/// The outcomes observed during one transform pass.
///
/// Each branch position appears at most once; a branch reached several
/// times (inside a loop) merges its outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageRecord {
    branches: BTreeMap<usize, BranchOutcome>,
    loops: BTreeMap<usize, Vec<usize>>,
}

impl CoverageRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_branch(&mut self, position: usize, taken: bool) {
        let outcome = BranchOutcome::from_bool(taken);
        self.branches
            .entry(position)
            .and_modify(|o| *o = o.merge(outcome))
            .or_insert(outcome);
    }

    pub fn record_loop(&mut self, position: usize, iterations: usize) {
        self.loops.entry(position).or_default().push(iterations);
    }

    /// Fold another record into this one.
    pub fn absorb(&mut self, other: CoverageRecord) {
        for (position, outcome) in other.branches {
            self.branches
                .entry(position)
                .and_modify(|o| *o = o.merge(outcome))
                .or_insert(outcome);
        }
        for (position, counts) in other.loops {
            self.loops.entry(position).or_default().extend(counts);
        }
    }

    pub fn branch(&self, position: usize) -> Option<BranchOutcome> {
        self.branches.get(&position).copied()
    }

    pub fn branches(&self) -> impl Iterator<Item = (usize, BranchOutcome)> + '_ {
        self.branches.iter().map(|(p, o)| (*p, *o))
    }

    /// Iteration counts observed at a loop, one entry per time it was reached.
    pub fn loop_iterations(&self, position: usize) -> &[usize] {
        self.loops.get(&position).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn loops(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.loops.iter().map(|(p, c)| (*p, c.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.loops.is_empty()
    }
}

/// The kind of a coverage point in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    If,
    ElseIf,
    Begin,
    For,
}

impl PointKind {
    pub fn is_branch(self) -> bool {
        !matches!(self, PointKind::For)
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PointKind::If => "IF",
            PointKind::ElseIf => "ELSEIF",
            PointKind::Begin => "BEGIN",
            PointKind::For => "FOR",
        };
        f.write_str(s)
    }
}

/// A directive whose outcome is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoveragePoint {
    pub position: usize,
    pub kind: PointKind,
}

/// Receives the coverage record of every execution.
pub trait CoverageHandler: Send + Sync {
    fn accept(&self, name: &str, tree: &NodeTree, record: &CoverageRecord);
}

/// Running iteration statistics for one loop position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LoopStats {
    reached: usize,
    min: usize,
    max: usize,
}

impl LoopStats {
    fn observe(&mut self, iterations: usize) {
        if self.reached == 0 {
            self.min = iterations;
            self.max = iterations;
        } else {
            self.min = self.min.min(iterations);
            self.max = self.max.max(iterations);
        }
        self.reached += 1;
    }
}

/// Everything kept per template; its size depends on the template, not on
/// the number of executions.
#[derive(Debug, Default)]
struct TemplateCoverage {
    points: Vec<CoveragePoint>,
    branches: BTreeMap<usize, BranchOutcome>,
    loops: BTreeMap<usize, LoopStats>,
    executions: usize,
}

impl TemplateCoverage {
    fn observe(&mut self, record: &CoverageRecord) {
        for (position, outcome) in record.branches() {
            self.branches
                .entry(position)
                .and_modify(|o| *o = o.merge(outcome))
                .or_insert(outcome);
        }
        for (position, counts) in record.loops() {
            let stats = self.loops.entry(position).or_default();
            for &iterations in counts {
                stats.observe(iterations);
            }
        }
        self.executions += 1;
    }
}

/// Aggregates coverage per template name in memory.
#[derive(Debug, Default)]
pub struct CoverageCollector {
    templates: DashMap<String, TemplateCoverage>,
}

impl CoverageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self, name: &str) -> Option<CoverageSummary> {
        self.templates
            .get(name)
            .map(|t| CoverageSummary::build(name, &t))
    }

    /// Summaries of every template seen, ordered by name.
    pub fn summaries(&self) -> Vec<CoverageSummary> {
        let mut summaries: Vec<CoverageSummary> = self
            .templates
            .iter()
            .map(|entry| CoverageSummary::build(entry.key(), entry.value()))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}

impl CoverageHandler for CoverageCollector {
    fn accept(&self, name: &str, tree: &NodeTree, record: &CoverageRecord) {
        let mut entry = self
            .templates
            .entry(name.to_string())
            .or_insert_with(|| TemplateCoverage {
                points: tree.coverage_points(),
                ..Default::default()
            });
        entry.observe(record);
        tracing::debug!(
            "coverage for '{}': {} execution(s) recorded",
            name,
            entry.executions
        );
    }
}

/// Loop statistics for one `FOR` position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopSummary {
    pub position: usize,
    pub reached: usize,
    pub min_iterations: Option<usize>,
    pub max_iterations: Option<usize>,
}

/// Aggregated coverage for one template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub name: String,
    pub executions: usize,
    pub branch_points: usize,
    /// Branch points observed both true and false.
    pub fully_covered: Vec<usize>,
    /// Branch points observed on one side only.
    pub partially_covered: Vec<(usize, BranchOutcome)>,
    /// Branch points never reached.
    pub uncovered: Vec<usize>,
    pub loops: Vec<LoopSummary>,
}

impl CoverageSummary {
    fn build(name: &str, coverage: &TemplateCoverage) -> Self {
        let mut summary = Self {
            name: name.to_string(),
            executions: coverage.executions,
            branch_points: 0,
            fully_covered: Vec::new(),
            partially_covered: Vec::new(),
            uncovered: Vec::new(),
            loops: Vec::new(),
        };
        for point in &coverage.points {
            if point.kind.is_branch() {
                summary.branch_points += 1;
                match coverage.branches.get(&point.position).copied() {
                    Some(BranchOutcome::Both) => summary.fully_covered.push(point.position),
                    Some(outcome) => summary.partially_covered.push((point.position, outcome)),
                    None => summary.uncovered.push(point.position),
                }
            } else {
                let stats = coverage
                    .loops
                    .get(&point.position)
                    .copied()
                    .unwrap_or_default();
                let seen = stats.reached > 0;
                summary.loops.push(LoopSummary {
                    position: point.position,
                    reached: stats.reached,
                    min_iterations: seen.then_some(stats.min),
                    max_iterations: seen.then_some(stats.max),
                });
            }
        }
        summary
    }

    /// Branch coverage as a percentage of all branch sides.
    ///
    /// A template without branches counts as fully covered.
    pub fn branch_percent(&self) -> f64 {
        if self.branch_points == 0 {
            return 100.0;
        }
        let covered = self.fully_covered.len() * 2 + self.partially_covered.len();
        covered as f64 * 100.0 / (self.branch_points * 2) as f64
    }
}

impl fmt::Display for CoverageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {:.1}% branch coverage over {} execution(s)",
            self.name,
            self.branch_percent(),
            self.executions
        )?;
        for position in &self.uncovered {
            writeln!(f, "  never reached: branch at {}", position)?;
        }
        for (position, outcome) in &self.partially_covered {
            let missing = match outcome {
                BranchOutcome::True => "false",
                _ => "true",
            };
            writeln!(f, "  partial: branch at {} never {}", position, missing)?;
        }
        for l in &self.loops {
            match (l.min_iterations, l.max_iterations) {
                (Some(min), Some(max)) => writeln!(
                    f,
                    "  loop at {}: reached {} time(s), {}..={} iteration(s)",
                    l.position, l.reached, min, max
                )?,
                _ => writeln!(f, "  loop at {}: never reached", l.position)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_branch_merge() {
        let mut record = CoverageRecord::new();
        record.record_branch(4, true);
        record.record_branch(4, true);
        assert_eq!(record.branch(4), Some(BranchOutcome::True));
        record.record_branch(4, false);
        assert_eq!(record.branch(4), Some(BranchOutcome::Both));
        assert_eq!(record.branches().count(), 1);
    }

    #[test]
    fn test_absorb() {
        let mut a = CoverageRecord::new();
        a.record_branch(1, true);
        a.record_loop(9, 2);
        let mut b = CoverageRecord::new();
        b.record_branch(1, false);
        b.record_branch(5, false);
        b.record_loop(9, 0);
        a.absorb(b);
        assert_eq!(a.branch(1), Some(BranchOutcome::Both));
        assert_eq!(a.branch(5), Some(BranchOutcome::False));
        assert_eq!(a.loop_iterations(9), &[2, 0]);
    }

    #[test]
    fn test_collector_summary() {
        let tree = parse("SELECT 1 /*IF a*/, a/*END*/ /*FOR x IN xs*//*#x*/1/*END*/").unwrap();
        let points = tree.coverage_points();
        assert_eq!(points.len(), 2);
        let if_pos = points[0].position;
        let for_pos = points[1].position;

        let collector = CoverageCollector::new();
        let mut first = CoverageRecord::new();
        first.record_branch(if_pos, true);
        first.record_loop(for_pos, 3);
        collector.accept("q", &tree, &first);

        let summary = collector.summary("q").unwrap();
        assert_eq!(summary.executions, 1);
        assert_eq!(summary.partially_covered, vec![(if_pos, BranchOutcome::True)]);
        assert_eq!(summary.branch_percent(), 50.0);
        assert_eq!(summary.loops[0].max_iterations, Some(3));

        let mut second = CoverageRecord::new();
        second.record_branch(if_pos, false);
        collector.accept("q", &tree, &second);
        let summary = collector.summary("q").unwrap();
        assert_eq!(summary.fully_covered, vec![if_pos]);
        assert_eq!(summary.branch_percent(), 100.0);
        assert!(summary.to_string().contains("100.0% branch coverage"));
    }

    #[test]
    fn test_collector_state_stays_bounded() {
        let tree = parse("/*FOR x IN xs*//*IF x > 1*//*#x*/1/*END*//*END*/").unwrap();
        let for_pos = tree.coverage_points()[0].position;
        let collector = CoverageCollector::new();

        for i in 0..10_000 {
            let mut record = CoverageRecord::new();
            record.record_loop(for_pos, i % 7);
            record.record_branch(15, i % 2 == 0);
            collector.accept("q", &tree, &record);
        }

        let summary = collector.summary("q").unwrap();
        assert_eq!(summary.executions, 10_000);
        assert_eq!(
            summary.loops,
            vec![LoopSummary {
                position: for_pos,
                reached: 10_000,
                min_iterations: Some(0),
                max_iterations: Some(6),
            }]
        );

        let state = collector.templates.get("q").unwrap();
        assert_eq!(state.loops.len(), 1);
        assert_eq!(state.branches.len(), 1);
        assert_eq!(state.loops[&for_pos].reached, 10_000);
    }

    #[test]
    fn test_summaries_sorted_by_name() {
        let tree = parse("SELECT 1").unwrap();
        let collector = CoverageCollector::new();
        collector.accept("b", &tree, &CoverageRecord::new());
        collector.accept("a", &tree, &CoverageRecord::new());
        let names: Vec<String> = collector.summaries().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unknown_template_has_no_summary() {
        let collector = CoverageCollector::new();
        assert!(collector.summary("nope").is_none());
        assert!(collector.summaries().is_empty());
    }
}
