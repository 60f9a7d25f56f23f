use clap::{Parser, Subcommand};
use zenith_core::config::{ConfigOverrides, canonical_key};
use zenith_core::filters::View;
use zenith_core::model::Tag;
use zenith_core::sync::RecoveryPolicy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in to the configured backend
    ///
    /// Example: zenith login me@example.com hunter2
    Login { email: String, password: String },
    /// Sign out and forget the stored session
    Logout,
    /// Show who is signed in
    Whoami,
    /// Add a new task
    ///
    /// Example: zenith add "Buy milk" --due 2026-10-20 --tag personal
    Add {
        title: Option<String>,
        /// Due date, YYYY-MM-DD or RFC 3339
        #[arg(long)]
        due: Option<String>,
        /// personal, work or learning
        #[arg(long)]
        tag: Option<String>,
        /// low, medium or high
        #[arg(long)]
        priority: Option<String>,
    },
    /// List tasks, active first, then completed
    ///
    /// Example: zenith list
    /// Example: zenith list tag work
    List {
        #[command(subcommand)]
        view: Option<ListCommand>,
    },
    /// Toggle a task between todo and done
    ///
    /// Example: zenith done 3
    Done { id: String },
    /// Toggle a task's importance
    ///
    /// Example: zenith star 3
    Star { id: String },
    /// Edit a task's title
    ///
    /// Example: zenith edit 3 "Buy oat milk"
    Edit { id: String, new_title: String },
    /// Delete a task
    ///
    /// Example: zenith delete 3
    Delete { id: String },
    /// Move a task to another task's position (interactive session only)
    ///
    /// Example: move 3 1
    Move { active_id: String, over_id: String },
}

impl Command {
    /// Commands that read or change the task list.
    pub fn needs_tasks(&self) -> bool {
        !matches!(self, Self::Login { .. } | Self::Logout | Self::Whoami)
    }

    pub fn changes_identity(&self) -> bool {
        matches!(self, Self::Login { .. } | Self::Logout)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ListCommand {
    /// Every task
    All,
    /// Tasks due today
    Today,
    /// High-priority tasks
    Important,
    /// Tasks with the given tag
    ///
    /// Example: zenith list tag work
    Tag { name: String },
}

impl ListCommand {
    pub fn view(&self) -> Result<View, String> {
        match self {
            Self::All => Ok(View::All),
            Self::Today => Ok(View::Today),
            Self::Important => Ok(View::Important),
            Self::Tag { name } => Tag::parse(name)
                .map(View::Tag)
                .map_err(|err| err.message().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    Theme,
    BackendUrl,
    AnonKey,
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let field = canonical_key(key_raw);
    if field.is_empty() {
        return Err("override key cannot be empty".to_string());
    }

    let target = match field.as_str() {
        "theme" => ConfigOverrideTarget::Theme,
        "backend_url" | "url" => ConfigOverrideTarget::BackendUrl,
        "anon_key" | "key" => ConfigOverrideTarget::AnonKey,
        "recovery" => {
            RecoveryPolicy::parse(&value).map_err(|err| err.message().to_string())?;
            ConfigOverrideTarget::Recovery
        }
        other => return Err(format!("unknown config field '{other}'")),
    };

    Ok(ParsedConfigOverride { target, value })
}

/// Folds every `--config-override` argument into one set; later values win.
pub fn collect_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry)?;
        match parsed.target {
            ConfigOverrideTarget::Theme => overrides.theme = Some(parsed.value),
            ConfigOverrideTarget::BackendUrl => overrides.backend_url = Some(parsed.value),
            ConfigOverrideTarget::AnonKey => overrides.anon_key = Some(parsed.value),
            ConfigOverrideTarget::Recovery => {
                overrides.recovery =
                    Some(RecoveryPolicy::parse(&parsed.value).map_err(|err| err.to_string())?);
            }
        }
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, Command, ConfigOverrideTarget, ListCommand, collect_overrides, parse_config_override,
    };
    use clap::Parser;
    use zenith_core::filters::View;
    use zenith_core::model::Tag;
    use zenith_core::sync::RecoveryPolicy;

    #[test]
    fn parse_config_override_canonicalizes_field_names() {
        let parsed = parse_config_override(" THEME = Midnight ").unwrap();

        assert_eq!(parsed.target, ConfigOverrideTarget::Theme);
        assert_eq!(parsed.value, "Midnight");

        let parsed = parse_config_override("Backend-URL=https://demo.example.co").unwrap();
        assert_eq!(parsed.target, ConfigOverrideTarget::BackendUrl);
    }

    #[test]
    fn parse_config_override_rejects_unknown_fields() {
        let err = parse_config_override("unknown.field=value").unwrap_err();
        assert!(err.contains("unknown config field"));
    }

    #[test]
    fn parse_config_override_rejects_missing_equals() {
        let err = parse_config_override("themenoir").unwrap_err();
        assert!(err.contains("KEY=VALUE"));
    }

    #[test]
    fn parse_config_override_validates_recovery_policy() {
        let err = parse_config_override("recovery=retry").unwrap_err();
        assert!(err.contains("unknown recovery policy"));
    }

    #[test]
    fn collect_overrides_lets_later_values_win() {
        let raw = vec![
            "theme=noir".to_string(),
            "recovery=resync".to_string(),
            "theme=solarized".to_string(),
        ];

        let overrides = collect_overrides(&raw).unwrap();

        assert_eq!(overrides.theme.as_deref(), Some("solarized"));
        assert_eq!(overrides.recovery, Some(RecoveryPolicy::Resync));
        assert_eq!(overrides.backend_url, None);
    }

    #[test]
    fn list_defaults_to_no_view_and_parses_tags() {
        let cli = Cli::try_parse_from(["zenith", "list"]).unwrap();
        match cli.command {
            Command::List { view } => assert_eq!(view, None),
            other => panic!("unexpected command: {other:?}"),
        }

        let tag = ListCommand::Tag {
            name: "WORK".to_string(),
        };
        assert_eq!(tag.view().unwrap(), View::Tag(Tag::Work));

        let unknown = ListCommand::Tag {
            name: "chores".to_string(),
        };
        assert!(unknown.view().is_err());
    }

    #[test]
    fn identity_commands_do_not_need_tasks() {
        let login = Cli::try_parse_from(["zenith", "login", "a@b.co", "pw"]).unwrap();
        assert!(!login.command.needs_tasks());
        assert!(login.command.changes_identity());

        let done = Cli::try_parse_from(["zenith", "done", "1", "--json"]).unwrap();
        assert!(done.command.needs_tasks());
        assert!(done.json);
    }
}
