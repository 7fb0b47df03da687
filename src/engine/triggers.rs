//! Cron trigger management for registered getters.
//!
//! Each armed trigger is one tokio task that sleeps until the expression's
//! next occurrence, then hands a refresh cycle to the task registry and
//! goes back to sleep — firing never blocks the scheduler. The effective
//! set is the instance `override_trigger` when present, else the class
//! `trigger` list, re-evaluated at every cycle start and on registration
//! changes so config edits take effect on the next firing.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Engine, GetterSlot};
use crate::adapter::AdapterSpec;
use crate::config::AppConfig;

/// Accept classic 5-field cron lines by prepending a seconds field;
/// 6/7-field expressions pass through unchanged.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).with_context(|| format!("invalid cron expression {expr:?}"))
}

pub(crate) fn effective_triggers(cfg: &AppConfig, spec: &AdapterSpec) -> Vec<String> {
    if spec.instance_id.is_some() {
        if let Some(over) = cfg
            .adapter_config(&spec.name())
            .and_then(|c| c.override_trigger.clone())
        {
            return over;
        }
    }
    cfg.adapter_config(&spec.class_name)
        .map(|c| c.trigger.clone())
        .unwrap_or_default()
}

/// Diff the effective trigger set against what is armed: disarm removed
/// expressions, arm new ones. Armed expressions keep their task untouched,
/// so repeated calls with unchanged config are no-ops.
pub(crate) fn update_triggers(engine: &Arc<Engine>, slot: &Arc<GetterSlot>) {
    let cfg = engine.config.snapshot();
    let desired = effective_triggers(&cfg, &slot.spec);

    let mut armed = slot.triggers.lock().expect("trigger mutex poisoned");

    armed.retain(|expr, handle| {
        let keep = desired.contains(expr);
        if !keep {
            handle.abort();
            debug!(target: "engine", getter = %slot.spec, trigger = %expr, "trigger disarmed");
        }
        keep
    });

    for expr in desired {
        if armed.contains_key(&expr) {
            continue;
        }
        match arm(engine, slot, &expr) {
            Ok(handle) => {
                debug!(target: "engine", getter = %slot.spec, trigger = %expr, "trigger armed");
                armed.insert(expr, handle);
            }
            Err(e) => {
                warn!(target: "engine", getter = %slot.spec, trigger = %expr, error = %e, "trigger not armed");
            }
        }
    }
}

fn arm(engine: &Arc<Engine>, slot: &Arc<GetterSlot>, expr: &str) -> Result<JoinHandle<()>> {
    let schedule = parse_cron(expr)?;
    let engine = engine.clone();
    let slot = slot.clone();
    let expr = expr.to_string();
    Ok(tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                // expression has no future occurrence
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            let task = engine.spawn_refresh(slot.clone());
            debug!(target: "engine", getter = %slot.spec, trigger = %expr, task = %task, "trigger fired");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterConfig;

    #[test]
    fn five_field_expressions_are_normalized() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn override_trigger_wins_for_instances() {
        let mut cfg = AppConfig::default();
        cfg.adapter.insert(
            "G".to_string(),
            AdapterConfig {
                trigger: vec!["0 * * * * *".to_string()],
                ..Default::default()
            },
        );
        cfg.adapter.insert(
            "G.a".to_string(),
            AdapterConfig {
                override_trigger: Some(vec!["0 0 * * * *".to_string()]),
                ..Default::default()
            },
        );

        let class_level = AdapterSpec::new("G", None);
        assert_eq!(
            effective_triggers(&cfg, &class_level),
            vec!["0 * * * * *".to_string()]
        );

        let overridden = AdapterSpec::new("G", Some("a".to_string()));
        assert_eq!(
            effective_triggers(&cfg, &overridden),
            vec!["0 0 * * * *".to_string()]
        );

        let plain = AdapterSpec::new("G", Some("b".to_string()));
        assert_eq!(
            effective_triggers(&cfg, &plain),
            vec!["0 * * * * *".to_string()]
        );
    }
}
