//! Staged launch ordering: ungrouped children first, then each named
//! group in name-sort order, separated by `start_delay`. Shutdown
//! strictly reverses whatever `launch_order` was at the moment
//! shutdown began.

use crate::config::Config;
use crate::process_table::{ChildState, ProcessTable};

/// One launch cohort: labels that start together, separated from the
/// next cohort by `start_delay`.
pub type Cohort = Vec<String>;

/// Builds the cohorts that are *currently* eligible to launch: pending
/// labels in `ungrouped_order` whose `scheduled_start <= now`, then the
/// same for each group in name-sort order. Groups/ungrouped cohorts
/// that have nothing eligible right now are omitted entirely (so the
/// caller doesn't insert a delay for an empty cohort).
pub fn build_cohorts(cfg: &Config, table: &ProcessTable, now: i64) -> Vec<Cohort> {
    let eligible = |label: &str| -> bool {
        matches!(
            table.get(label).map(|r| r.state()),
            Some(ChildState::PendingLaunch)
        ) && table.get(label).map(|r| r.scheduled_start <= now).unwrap_or(false)
    };

    let mut cohorts = Vec::new();

    let ungrouped: Cohort = cfg
        .ungrouped_order()
        .into_iter()
        .filter(|l| eligible(l))
        .collect();
    if !ungrouped.is_empty() {
        cohorts.push(ungrouped);
    }

    for (_, labels) in cfg.groups() {
        let cohort: Cohort = labels.into_iter().filter(|l| eligible(l)).collect();
        if !cohort.is_empty() {
            cohorts.push(cohort);
        }
    }

    cohorts
}

/// Which kind of cohort a `TaggedCohort` represents, so the control
/// loop knows when to insert the extra `start_delay` that separates
/// the ungrouped cohort from the first group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CohortKind {
    Ungrouped,
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCohort {
    pub kind: CohortKind,
    pub labels: Cohort,
}

/// Like `build_cohorts`, but keeps the ungrouped/group identity of
/// each cohort so the caller can apply the extra inter-cohort delay
/// between the ungrouped cohort and the first group.
pub fn build_launch_plan(cfg: &Config, table: &ProcessTable, now: i64) -> Vec<TaggedCohort> {
    let eligible = |label: &str| -> bool {
        matches!(
            table.get(label).map(|r| r.state()),
            Some(ChildState::PendingLaunch)
        ) && table.get(label).map(|r| r.scheduled_start <= now).unwrap_or(false)
    };

    let mut plan = Vec::new();

    let ungrouped: Cohort = cfg
        .ungrouped_order()
        .into_iter()
        .filter(|l| eligible(l))
        .collect();
    if !ungrouped.is_empty() {
        plan.push(TaggedCohort {
            kind: CohortKind::Ungrouped,
            labels: ungrouped,
        });
    }

    for (name, labels) in cfg.groups() {
        let cohort: Cohort = labels.into_iter().filter(|l| eligible(l)).collect();
        if !cohort.is_empty() {
            plan.push(TaggedCohort {
                kind: CohortKind::Group(name),
                labels: cohort,
            });
        }
    }

    plan
}

/// `launch_order` reversed, for shutdown.
pub fn shutdown_order(launch_order: &[String]) -> Vec<String> {
    let mut order = launch_order.to_vec();
    order.reverse();
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChildDecl;
    use crate::process_table::ChildRecord;

    fn cfg_with(children: &[(&str, Option<&str>)]) -> Config {
        let mut cfg = Config::default();
        for (label, group) in children {
            cfg.children.push(ChildDecl {
                label: label.to_string(),
                group: group.map(|g| g.to_string()),
                command: "/bin/true".to_string(),
            });
        }
        cfg
    }

    #[test]
    fn launch_order_is_ungrouped_then_groups_by_name() {
        let cfg = cfg_with(&[
            ("A", None),
            ("X", Some("Grp2")),
            ("Y", Some("Grp1")),
        ]);
        assert_eq!(cfg.launch_order(), vec!["A", "Y", "X"]);
        assert_eq!(sequencer_shutdown(&cfg), vec!["X", "Y", "A"]);
    }

    fn sequencer_shutdown(cfg: &Config) -> Vec<String> {
        shutdown_order(&cfg.launch_order())
    }

    #[test]
    fn cohorts_only_include_eligible_pending_launches() {
        let cfg = cfg_with(&[("A", None), ("B", None), ("X", Some("Grp"))]);
        let mut table = ProcessTable::new();
        table.insert(ChildRecord::new_pending("A".into(), "/bin/true".into(), None, 0));
        let mut later = ChildRecord::new_pending("B".into(), "/bin/true".into(), None, 50);
        later.scheduled_start = 50; // not yet eligible at now=10
        table.insert(later);
        table.insert(ChildRecord::new_pending(
            "X".into(),
            "/bin/true".into(),
            Some("Grp".into()),
            0,
        ));

        let cohorts = build_cohorts(&cfg, &table, 10);
        assert_eq!(cohorts, vec![vec!["A".to_string()], vec!["X".to_string()]]);
    }

    #[test]
    fn launch_plan_tags_ungrouped_and_group_cohorts() {
        let cfg = cfg_with(&[("A", None), ("X", Some("Grp2")), ("Y", Some("Grp1"))]);
        let mut table = ProcessTable::new();
        for (label, group) in [("A", None), ("X", Some("Grp2")), ("Y", Some("Grp1"))] {
            table.insert(ChildRecord::new_pending(
                label.to_string(),
                "/bin/true".into(),
                group.map(|g: &str| g.to_string()),
                0,
            ));
        }
        let plan = build_launch_plan(&cfg, &table, 0);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].kind, CohortKind::Ungrouped);
        assert_eq!(plan[0].labels, vec!["A"]);
        assert_eq!(plan[1].kind, CohortKind::Group("Grp1".to_string()));
        assert_eq!(plan[1].labels, vec!["Y"]);
        assert_eq!(plan[2].kind, CohortKind::Group("Grp2".to_string()));
        assert_eq!(plan[2].labels, vec!["X"]);
    }

    #[test]
    fn empty_cohorts_are_omitted() {
        let cfg = cfg_with(&[("X", Some("Grp"))]);
        let mut table = ProcessTable::new();
        table.insert(ChildRecord::new_pending(
            "X".into(),
            "/bin/true".into(),
            Some("Grp".into()),
            0,
        ));
        let cohorts = build_cohorts(&cfg, &table, 10);
        assert_eq!(cohorts.len(), 1);
    }
}
