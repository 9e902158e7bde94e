// Pure planning helpers: template validation, ready-set computation,
// rollback ordering. No I/O so the ordering rules are directly testable.

use homefleet_contracts::{JobStatus, WorkflowStep};
use homefleet_storage::JobRow;
use serde_json::Value;
use std::collections::HashSet;

/// Validate a template's steps at write time: at least one step, unique
/// non-negative orders, every dependency pointing at a strictly lower order
/// that exists. This makes templates DAGs by construction.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), String> {
    if steps.is_empty() {
        return Err("Workflow template has no steps".to_string());
    }

    let mut orders = HashSet::new();
    for step in steps {
        if step.order < 0 {
            return Err(format!("Step order {} is negative", step.order));
        }
        if !orders.insert(step.order) {
            return Err(format!("Duplicate step order {}", step.order));
        }
    }

    for step in steps {
        for dep in &step.depends_on {
            if *dep >= step.order {
                return Err(format!(
                    "Step {} depends on {} which is not a lower order",
                    step.order, dep
                ));
            }
            if !orders.contains(dep) {
                return Err(format!(
                    "Step {} depends on missing order {}",
                    step.order, dep
                ));
            }
        }
    }

    Ok(())
}

/// Build the frozen snapshot stored on a workflow instance.
pub fn snapshot(template_name: &str, steps: &[WorkflowStep]) -> Value {
    serde_json::json!({
        "name": template_name,
        "steps": steps,
    })
}

/// Recover the steps from a stored snapshot.
pub fn snapshot_steps(snapshot: &Value) -> Vec<WorkflowStep> {
    snapshot
        .get("steps")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or_default()
}

/// Ids of pending non-rollback jobs whose dependencies are all COMPLETED,
/// ties broken by ascending step order.
pub fn ready_job_ids(jobs: &[JobRow]) -> Vec<i64> {
    let completed: HashSet<i64> = jobs
        .iter()
        .filter(|j| !j.is_rollback && j.status() == JobStatus::Completed)
        .map(|j| j.id)
        .collect();

    let mut ready: Vec<&JobRow> = jobs
        .iter()
        .filter(|j| !j.is_rollback && j.status() == JobStatus::Pending)
        .filter(|j| {
            j.depends_on_job_ids
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .all(|dep| completed.contains(dep))
        })
        .collect();

    ready.sort_by_key(|j| (j.step_order.unwrap_or(0), j.id));
    ready.iter().map(|j| j.id).collect()
}

/// Steps to compensate, in strict reverse order: every completed step with a
/// declared rollback action, highest order first.
pub fn rollback_plan(steps: &[WorkflowStep], completed_orders: &HashSet<i32>) -> Vec<WorkflowStep> {
    let mut plan: Vec<WorkflowStep> = steps
        .iter()
        .filter(|s| completed_orders.contains(&s.order) && s.rollback_action.is_some())
        .cloned()
        .collect();
    plan.sort_by_key(|s| std::cmp::Reverse(s.order));
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn step(order: i32, depends_on: Vec<i32>, rollback: Option<&str>) -> WorkflowStep {
        WorkflowStep {
            order,
            action_name: format!("action_{}", order),
            executor_type: "ansible".to_string(),
            depends_on,
            rollback_action: rollback.map(String::from),
            extra_vars: None,
        }
    }

    fn job(id: i64, step_order: i32, status: &str, deps: Option<Vec<i64>>) -> JobRow {
        JobRow {
            id,
            device_id: 1,
            device_ids: None,
            executor_type: "ansible".to_string(),
            action_name: format!("action_{}", step_order),
            action_config: None,
            extra_vars: None,
            vault_secret_id: None,
            status: status.to_string(),
            progress: 0,
            task_count: 0,
            tasks_completed: 0,
            log_output: None,
            error_category: None,
            cancel_requested: false,
            worker_task_id: None,
            workflow_instance_id: Some(1),
            step_order: Some(step_order),
            depends_on_job_ids: deps,
            is_rollback: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn validates_well_formed_template() {
        let steps = vec![
            step(1, vec![], None),
            step(2, vec![1], Some("revert")),
            step(3, vec![1, 2], None),
        ];
        assert!(validate_steps(&steps).is_ok());
    }

    #[test]
    fn rejects_empty_template() {
        assert!(validate_steps(&[]).is_err());
    }

    #[test]
    fn rejects_duplicate_orders() {
        let steps = vec![step(1, vec![], None), step(1, vec![], None)];
        assert!(validate_steps(&steps).unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn rejects_forward_and_self_dependencies() {
        assert!(validate_steps(&[step(1, vec![1], None)]).is_err());
        let steps = vec![step(1, vec![2], None), step(2, vec![], None)];
        assert!(validate_steps(&steps).is_err());
    }

    #[test]
    fn rejects_missing_dependency() {
        let steps = vec![step(5, vec![3], None)];
        assert!(validate_steps(&steps).unwrap_err().contains("missing"));
    }

    #[test]
    fn rejects_negative_order() {
        assert!(validate_steps(&[step(-1, vec![], None)]).is_err());
    }

    #[test]
    fn snapshot_round_trips_steps() {
        let steps = vec![step(1, vec![], None), step(2, vec![1], Some("revert"))];
        let snap = snapshot("deploy", &steps);
        assert_eq!(snap["name"], json!("deploy"));
        assert_eq!(snapshot_steps(&snap), steps);
    }

    #[test]
    fn snapshot_without_steps_is_empty() {
        assert!(snapshot_steps(&json!({"name": "x"})).is_empty());
    }

    #[test]
    fn roots_are_ready_first() {
        let jobs = vec![
            job(10, 1, "pending", None),
            job(11, 2, "pending", Some(vec![10])),
        ];
        assert_eq!(ready_job_ids(&jobs), vec![10]);
    }

    #[test]
    fn dependent_becomes_ready_after_ancestor_completes() {
        let jobs = vec![
            job(10, 1, "completed", None),
            job(11, 2, "pending", Some(vec![10])),
            job(12, 3, "pending", Some(vec![10, 11])),
        ];
        assert_eq!(ready_job_ids(&jobs), vec![11]);
    }

    #[test]
    fn ready_ties_break_by_step_order() {
        let jobs = vec![
            job(20, 5, "pending", None),
            job(21, 2, "pending", None),
            job(22, 9, "pending", None),
        ];
        assert_eq!(ready_job_ids(&jobs), vec![21, 20, 22]);
    }

    #[test]
    fn running_and_failed_jobs_are_not_ready() {
        let jobs = vec![
            job(10, 1, "running", None),
            job(11, 2, "failed", None),
            job(12, 3, "pending", Some(vec![11])),
        ];
        assert!(ready_job_ids(&jobs).is_empty());
    }

    #[test]
    fn rollback_plan_is_reverse_order_of_completed_steps() {
        let steps = vec![
            step(1, vec![], Some("undo_1")),
            step(2, vec![1], Some("undo_2")),
            step(3, vec![2], None),
            step(4, vec![3], Some("undo_4")),
        ];
        // Steps 1, 2, 3 completed; 4 failed before completing.
        let completed: HashSet<i32> = [1, 2, 3].into_iter().collect();
        let plan = rollback_plan(&steps, &completed);
        let orders: Vec<i32> = plan.iter().map(|s| s.order).collect();
        // 3 has no rollback action; 4 never completed.
        assert_eq!(orders, vec![2, 1]);
    }

    #[test]
    fn rollback_plan_empty_when_no_actions_defined() {
        let steps = vec![step(1, vec![], None), step(2, vec![1], None)];
        let completed: HashSet<i32> = [1, 2].into_iter().collect();
        assert!(rollback_plan(&steps, &completed).is_empty());
    }
}
