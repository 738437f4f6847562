//! Plan parsing and validation
//!
//! A plan is the reasoning model's decomposition of one root task. The reply
//! may wrap the JSON in a fenced block or in prose; the outermost object is
//! extracted and then checked for duplicate ids, unknown dependencies and
//! cycles before anything is dispatched.

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::TaskPriority;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub subtasks: Vec<PlannedSubtask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSubtask {
    pub id: String,
    pub description: String,
    #[serde(alias = "assigned_role", alias = "role")]
    pub assigned_role: String,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: TaskPriority,
    #[serde(default, alias = "depends_on", alias = "dependsOn")]
    pub dependencies: Vec<String>,
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<TaskPriority, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| s.parse().ok())
        .unwrap_or_default())
}

impl Plan {
    /// Parse and validate a model reply
    pub fn parse(reply: &str) -> SchedulerResult<Self> {
        let json = extract_json(reply)
            .ok_or_else(|| SchedulerError::PlanParse("no JSON object in reply".to_string()))?;

        let plan: Plan = serde_json::from_str(json)
            .map_err(|e| SchedulerError::PlanParse(format!("invalid plan JSON: {}", e)))?;

        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.subtasks.is_empty() {
            return Err(SchedulerError::PlanParse("plan has no subtasks".to_string()));
        }

        let mut ids = HashSet::new();
        for subtask in &self.subtasks {
            if subtask.id.trim().is_empty() {
                return Err(SchedulerError::PlanParse("subtask with empty id".to_string()));
            }
            if !ids.insert(subtask.id.as_str()) {
                return Err(SchedulerError::PlanParse(format!(
                    "duplicate subtask id: {}",
                    subtask.id
                )));
            }
        }

        for subtask in &self.subtasks {
            for dep in &subtask.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(SchedulerError::PlanParse(format!(
                        "subtask {} depends on unknown id: {}",
                        subtask.id, dep
                    )));
                }
            }
        }

        if let Some(id) = self.find_cycle() {
            return Err(SchedulerError::PlanParse(format!(
                "dependency cycle through subtask: {}",
                id
            )));
        }

        Ok(())
    }

    /// Kahn's algorithm; returns a subtask left over when the graph has a cycle
    fn find_cycle(&self) -> Option<&str> {
        let mut indegree: HashMap<&str, usize> = self
            .subtasks
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for subtask in &self.subtasks {
            for dep in &subtask.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(subtask.id.as_str());
            }
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = ready.pop() {
            visited += 1;
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(n) = indegree.get_mut(next) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(*next);
                    }
                }
            }
        }

        if visited == self.subtasks.len() {
            None
        } else {
            self.subtasks
                .iter()
                .find(|s| indegree.get(s.id.as_str()).copied().unwrap_or(0) > 0)
                .map(|s| s.id.as_str())
        }
    }

    pub fn get(&self, id: &str) -> Option<&PlannedSubtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Roles the plan asks for, deduplicated, in plan order
    pub fn roles(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.subtasks
            .iter()
            .map(|s| s.assigned_role.as_str())
            .filter(|r| seen.insert(*r))
            .collect()
    }
}

/// Body of the first fenced block if any, then the span from the first `{`
/// to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let candidate = fenced_block(text).unwrap_or(text);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    (end > start).then(|| &candidate[start..=end])
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // skip the info string (```json)
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// System prompt for the decomposition call; `roles` are `(name, description)`
pub fn planning_prompt(roles: &[(&str, &str)]) -> String {
    format!(
        r#"## Task Decomposition

Break the user's task into subtasks and assign each one to a worker role.

### Available roles
{roles}

### Reply format
Reply with a single JSON object and nothing else:
```json
{{
  "name": "short plan name",
  "description": "what the plan achieves",
  "subtasks": [
    {{
      "id": "A",
      "description": "what to do",
      "assignedRole": "one of the roles above",
      "priority": "LOW | MEDIUM | HIGH | URGENT",
      "dependencies": []
    }}
  ]
}}
```

### Rules
1. Subtask ids are unique within the plan
2. `dependencies` lists ids of subtasks that must succeed first
3. No dependency cycles
4. Prefer independent subtasks where the work allows it
"#,
        roles = roles
            .iter()
            .map(|(role, description)| match description.trim() {
                "" => format!("- {}", role),
                description => format!("- {}: {}", role, description),
            })
            .collect::<Vec<_>>()
            .join("\n")
    )
}
