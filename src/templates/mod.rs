//! Embedded templates written by `sandloop init`.

/// Default `sandloop.toml` configuration.
pub(crate) const SANDLOOP_TOML: &str = include_str!("sandloop.toml");

/// Example tasks file for `sandloop session`.
pub(crate) const TASKS_TXT: &str = include_str!("tasks.txt");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::parse_tasks;

    #[test]
    fn test_config_template_is_valid() {
        let config: Config = toml::from_str(SANDLOOP_TOML).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.method, "subprocess");
        assert_eq!(config.task.max_attempts, 3);
        assert!(config.generator.command.is_none());
    }

    #[test]
    fn test_tasks_template_parses() {
        assert_eq!(parse_tasks(TASKS_TXT).len(), 3);
    }
}
