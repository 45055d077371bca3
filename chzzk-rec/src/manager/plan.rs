//! Diff between the running task set and a new configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{Channel, Config};

/// A channel that should have a task, with its start delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredTask {
    pub channel: Channel,
    pub delay: Duration,
}

/// Active channels of `config`, one per identifier.
pub fn desired_tasks(config: &Config) -> Vec<DesiredTask> {
    config
        .active_channels()
        .into_iter()
        .map(|channel| DesiredTask {
            delay: config.start_delay(&channel),
            channel,
        })
        .collect()
}

/// What a reload has to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadPlan {
    pub start: Vec<DesiredTask>,
    /// Identifiers whose task must stop.
    pub stop: Vec<String>,
    /// Channels whose definition changed: stop, then start again.
    pub restart: Vec<DesiredTask>,
    pub unchanged: usize,
}

impl ReloadPlan {
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty() && self.restart.is_empty()
    }
}

pub fn plan_reload(running: &HashMap<String, Channel>, desired: Vec<DesiredTask>) -> ReloadPlan {
    let mut plan = ReloadPlan::default();

    for task in &desired {
        match running.get(&task.channel.identifier) {
            None => plan.start.push(task.clone()),
            Some(current) if *current != task.channel => plan.restart.push(task.clone()),
            Some(_) => plan.unchanged += 1,
        }
    }

    plan.stop = running
        .keys()
        .filter(|id| !desired.iter().any(|t| &t.channel.identifier == *id))
        .cloned()
        .collect();
    plan.stop.sort();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn channel(id: &str, active: bool) -> Channel {
        Channel {
            id: format!("{id}-platform"),
            name: id.to_uppercase(),
            output_dir: PathBuf::from("./recordings"),
            identifier: id.to_string(),
            active,
            delay: None,
        }
    }

    #[test]
    fn test_desired_skips_inactive_and_applies_delays() {
        let mut config = Config {
            channels: vec![channel("a", true), channel("b", false), channel("c", true)],
            ..Default::default()
        };
        config.delays.insert("c".to_string(), 5);

        let desired = desired_tasks(&config);
        let ids: Vec<_> = desired.iter().map(|t| t.channel.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(desired[0].delay, Duration::ZERO);
        assert_eq!(desired[1].delay, Duration::from_secs(5));
    }

    #[test]
    fn test_plan_reload() {
        let running: HashMap<_, _> = [
            ("a".to_string(), channel("a", true)),
            ("b".to_string(), channel("b", true)),
            ("c".to_string(), channel("c", true)),
        ]
        .into_iter()
        .collect();

        let mut changed = channel("b", true);
        changed.output_dir = PathBuf::from("/elsewhere");
        let desired = vec![
            DesiredTask { channel: channel("a", true), delay: Duration::ZERO },
            DesiredTask { channel: changed.clone(), delay: Duration::ZERO },
            DesiredTask { channel: channel("d", true), delay: Duration::from_secs(3) },
        ];

        let plan = plan_reload(&running, desired);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.stop, vec!["c".to_string()]);
        assert_eq!(plan.restart.len(), 1);
        assert_eq!(plan.restart[0].channel, changed);
        assert_eq!(plan.start.len(), 1);
        assert_eq!(plan.start[0].channel.identifier, "d");
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_identical_config_is_noop() {
        let running: HashMap<_, _> = [("a".to_string(), channel("a", true))].into_iter().collect();
        let plan = plan_reload(
            &running,
            vec![DesiredTask { channel: channel("a", true), delay: Duration::ZERO }],
        );
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }
}
