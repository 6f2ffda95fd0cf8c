//! Minimal interpreter for the serverless-workflow scenario documents that
//! drive the provisioning run. Supports `call`, `do`, and `switch` tasks
//! over a mutable JSON context; everything the runs need and nothing more.

use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map as JsonMap, Value};
use serverless_workflow_core::models::{
    map::Map as TaskMap,
    task::{
        CallTaskDefinition, DoTaskDefinition, SwitchTaskDefinition, TaskDefinition,
        TaskDefinitionFields,
    },
    workflow::WorkflowDefinition,
};

/// Transition ceiling across one task map; a scenario that runs longer is
/// stuck in a gate loop.
const MAX_STEPS: usize = 2048;

pub trait ScenarioRuntime {
    fn invoke(&mut self, action: &str, args: &Value, context: &mut Value) -> Result<()>;
}

pub fn load_scenario(path: &Path) -> Result<WorkflowDefinition> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading scenario file {}", path.display()))?;
    serde_yaml::from_str::<WorkflowDefinition>(&raw)
        .with_context(|| format!("failed parsing scenario file {}", path.display()))
}

pub fn run_scenario<R: ScenarioRuntime>(
    scenario: &WorkflowDefinition,
    runtime: &mut R,
    input: &Value,
) -> Result<Value> {
    let mut context = input.clone();
    run_task_map(&scenario.do_, runtime, &mut context)?;
    Ok(context)
}

fn run_task_map<R: ScenarioRuntime>(
    tasks: &TaskMap<String, TaskDefinition>,
    runtime: &mut R,
    context: &mut Value,
) -> Result<()> {
    let entries = ordered_tasks(tasks)?;
    let Some((first, _)) = entries.first() else {
        return Ok(());
    };

    let mut current = first.clone();
    for _ in 0..MAX_STEPS {
        let index = entries
            .iter()
            .position(|(name, _)| name == &current)
            .ok_or_else(|| anyhow!("scenario transitions to unknown task '{current}'"))?;
        let task = entries[index].1;

        let next = match task {
            TaskDefinition::Call(def) => run_call_task(def, runtime, context)?,
            TaskDefinition::Do(def) => run_do_task(def, runtime, context)?,
            TaskDefinition::Switch(def) => run_switch_task(def, context)?,
            _ => bail!("task '{current}' uses an unsupported task type (only call/do/switch)"),
        };

        match next {
            Some(name) => current = name,
            None if index + 1 == entries.len() => return Ok(()),
            None => current = entries[index + 1].0.clone(),
        }
    }

    bail!("scenario did not terminate within {MAX_STEPS} transitions")
}

fn ordered_tasks(tasks: &TaskMap<String, TaskDefinition>) -> Result<Vec<(String, &TaskDefinition)>> {
    let mut out: Vec<(String, &TaskDefinition)> = Vec::new();
    for entry in &tasks.entries {
        let Some((name, task)) = entry.iter().next() else {
            continue;
        };
        if entry.len() != 1 {
            bail!("task entry '{name}' must hold exactly one name/definition pair");
        }
        if out.iter().any(|(existing, _)| existing == name) {
            bail!("duplicate task name '{name}' in scenario");
        }
        out.push((name.clone(), task));
    }
    Ok(out)
}

fn run_call_task<R: ScenarioRuntime>(
    task: &CallTaskDefinition,
    runtime: &mut R,
    context: &mut Value,
) -> Result<Option<String>> {
    if !gate_open(&task.common, context)? {
        return Ok(task.common.then.clone());
    }

    let mut args = JsonMap::new();
    if let Some(with) = &task.with {
        for (key, value) in with {
            args.insert(key.clone(), value.clone());
        }
    }

    runtime.invoke(&task.call, &Value::Object(args), context)?;
    Ok(task.common.then.clone())
}

fn run_do_task<R: ScenarioRuntime>(
    task: &DoTaskDefinition,
    runtime: &mut R,
    context: &mut Value,
) -> Result<Option<String>> {
    if !gate_open(&task.common, context)? {
        return Ok(task.common.then.clone());
    }
    run_task_map(&task.do_, runtime, context)?;
    Ok(task.common.then.clone())
}

fn run_switch_task(task: &SwitchTaskDefinition, context: &Value) -> Result<Option<String>> {
    if !gate_open(&task.common, context)? {
        return Ok(task.common.then.clone());
    }

    for entry in &task.switch.entries {
        let Some((_, case)) = entry.iter().next() else {
            continue;
        };
        let matched = match &case.when {
            Some(condition) => eval_condition(condition, context)?,
            None => true,
        };
        if matched {
            return Ok(case.then.clone().or_else(|| task.common.then.clone()));
        }
    }

    Ok(task.common.then.clone())
}

fn gate_open(common: &TaskDefinitionFields, context: &Value) -> Result<bool> {
    match &common.if_ {
        Some(condition) => eval_condition(condition, context),
        None => Ok(true),
    }
}

#[derive(Clone, Copy, Debug)]
enum Comparator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// Longest operators first so `>=` is never read as `>` followed by `=`.
const COMPARATORS: [(&str, Comparator); 6] = [
    ("==", Comparator::Eq),
    ("!=", Comparator::Ne),
    (">=", Comparator::Ge),
    ("<=", Comparator::Le),
    (">", Comparator::Gt),
    ("<", Comparator::Lt),
];

fn eval_condition(raw: &str, context: &Value) -> Result<bool> {
    let expr = strip_expression_braces(raw);

    if expr.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if expr.eq_ignore_ascii_case("false") {
        return Ok(false);
    }

    for (symbol, comparator) in COMPARATORS {
        let Some((left, right)) = expr.split_once(symbol) else {
            continue;
        };
        let lhs = resolve_operand(context, left.trim())?;
        let rhs = resolve_operand(context, right.trim())?;
        return match comparator {
            Comparator::Eq => Ok(lhs == rhs),
            Comparator::Ne => Ok(lhs != rhs),
            Comparator::Ge => compare_numeric(&lhs, &rhs, expr, |l, r| l >= r),
            Comparator::Le => compare_numeric(&lhs, &rhs, expr, |l, r| l <= r),
            Comparator::Gt => compare_numeric(&lhs, &rhs, expr, |l, r| l > r),
            Comparator::Lt => compare_numeric(&lhs, &rhs, expr, |l, r| l < r),
        };
    }

    bail!("unsupported condition syntax: {raw}")
}

fn strip_expression_braces(raw: &str) -> &str {
    let expr = raw.trim();
    match expr.strip_prefix("${").and_then(|inner| inner.strip_suffix('}')) {
        Some(inner) => inner.trim(),
        None => expr,
    }
}

fn resolve_operand(context: &Value, raw: &str) -> Result<Value> {
    if let Some(path) = raw.strip_prefix('.') {
        let mut current = context;
        for segment in path.split('.').filter(|segment| !segment.is_empty()) {
            current = current
                .get(segment)
                .ok_or_else(|| anyhow!("missing context field in condition path: .{path}"))?;
        }
        return Ok(current.clone());
    }
    Ok(parse_literal(raw))
}

fn parse_literal(raw: &str) -> Value {
    if let Some(quoted) = raw
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        return Value::String(quoted.to_string());
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(num) = raw.parse::<i64>() {
        return Value::Number(num.into());
    }
    if let Ok(num) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(num) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

fn compare_numeric<F>(lhs: &Value, rhs: &Value, expr: &str, cmp: F) -> Result<bool>
where
    F: Fn(f64, f64) -> bool,
{
    let l = lhs
        .as_f64()
        .ok_or_else(|| anyhow!("non-numeric left operand in condition: {expr}"))?;
    let r = rhs
        .as_f64()
        .ok_or_else(|| anyhow!("non-numeric right operand in condition: {expr}"))?;
    Ok(cmp(l, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CountingRuntime {
        actions: Vec<String>,
    }

    impl ScenarioRuntime for CountingRuntime {
        fn invoke(&mut self, action: &str, _args: &Value, context: &mut Value) -> Result<()> {
            self.actions.push(action.to_string());
            if action == "take_device" {
                let remaining = context
                    .get("remaining")
                    .and_then(|value| value.as_i64())
                    .unwrap_or(0)
                    - 1;
                context["remaining"] = Value::from(remaining.max(0));
            }
            Ok(())
        }
    }

    #[test]
    fn switch_loops_until_the_gate_closes() -> Result<()> {
        let yaml = r#"
document:
  dsl: "1.0.0"
  namespace: "plugctl"
  name: "drain"
  version: "1.0.0"
do:
  - take_device:
      call: "take_device"
      then: "gate"
  - gate:
      switch:
        - more:
            when: ".remaining > 0"
            then: "take_device"
        - done:
            then: "wrap_up"
  - wrap_up:
      call: "wrap_up"
"#;
        let scenario: WorkflowDefinition = serde_yaml::from_str(yaml)?;
        let mut runtime = CountingRuntime {
            actions: Vec::new(),
        };
        let context = run_scenario(&scenario, &mut runtime, &json!({ "remaining": 3 }))?;

        assert_eq!(context["remaining"].as_i64(), Some(0));
        assert_eq!(
            runtime.actions,
            vec!["take_device", "take_device", "take_device", "wrap_up"]
        );
        Ok(())
    }

    #[test]
    fn conditions_compare_paths_and_literals() -> Result<()> {
        let context = json!({ "count": 2, "limit": 2, "name": "plug" });
        assert!(eval_condition(".count >= .limit", &context)?);
        assert!(eval_condition(".count < 3", &context)?);
        assert!(!eval_condition(".count > 2", &context)?);
        assert!(eval_condition(r#".name == "plug""#, &context)?);
        assert!(eval_condition(".count != 5", &context)?);
        assert!(eval_condition("${ .count <= .limit }", &context)?);
        Ok(())
    }

    #[test]
    fn missing_context_path_is_an_error() {
        let err = eval_condition(".absent > 0", &json!({})).expect_err("missing path");
        assert!(err.to_string().contains("missing context field"));
    }

    #[test]
    fn unknown_transition_target_is_an_error() {
        let yaml = r#"
document:
  dsl: "1.0.0"
  namespace: "plugctl"
  name: "broken"
  version: "1.0.0"
do:
  - start:
      call: "start"
      then: "nowhere"
"#;
        let scenario: WorkflowDefinition = serde_yaml::from_str(yaml).expect("yaml");
        let mut runtime = CountingRuntime {
            actions: Vec::new(),
        };
        let err = run_scenario(&scenario, &mut runtime, &json!({})).expect_err("broken scenario");
        assert!(err.to_string().contains("unknown task"));
    }
}
