use clap::Command;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Groups shown in `drivesync commands`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCategory {
    Core,
    Account,
    Sync,
    System,
}

impl CommandCategory {
    /// All categories in display order.
    pub fn all() -> &'static [CommandCategory] {
        &[
            CommandCategory::Core,
            CommandCategory::Account,
            CommandCategory::Sync,
            CommandCategory::System,
        ]
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCategory::Core => write!(f, "core"),
            CommandCategory::Account => write!(f, "account"),
            CommandCategory::Sync => write!(f, "sync"),
            CommandCategory::System => write!(f, "system"),
        }
    }
}

/// Metadata for a registered command.
#[derive(Debug, Clone)]
pub struct CommandMeta {
    pub name: String,
    pub category: CommandCategory,
    pub description: String,
    pub hidden: bool,
    pub command: Command,
}

/// Collects subcommands before the root command is built.
pub struct CommandRegistry {
    commands: HashMap<String, CommandMeta>,
    root: Command,
}

impl CommandRegistry {
    pub fn new(root: Command) -> Self {
        Self {
            commands: HashMap::new(),
            root,
        }
    }

    /// Registers a command. Fails if the name is already taken.
    pub fn register(&mut self, meta: CommandMeta) -> crate::errors::Result<()> {
        if self.commands.contains_key(&meta.name) {
            return Err(crate::errors::SyncError::Command(format!(
                "duplicate command name: {}",
                meta.name
            )));
        }
        self.commands.insert(meta.name.clone(), meta);
        Ok(())
    }

    pub fn get_by_category(&self, cat: CommandCategory) -> Vec<&CommandMeta> {
        let mut cmds: Vec<_> = self
            .commands
            .values()
            .filter(|m| m.category == cat)
            .collect();
        cmds.sort_by(|a, b| a.name.cmp(&b.name));
        cmds
    }

    /// Human-readable listing grouped by category. Hidden commands are left out.
    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        for cat in CommandCategory::all() {
            let cmds: Vec<_> = self
                .get_by_category(*cat)
                .into_iter()
                .filter(|m| !m.hidden)
                .collect();
            if cmds.is_empty() {
                continue;
            }
            out.push_str(&format!("{}:\n", cat));
            for cmd in cmds {
                out.push_str(&format!("  {:<12} {}\n", cmd.name, cmd.description));
            }
        }
        out
    }

    /// Consumes the registry and attaches every subcommand to the root.
    pub fn build_root(self) -> Command {
        let mut metas: Vec<_> = self.commands.into_values().collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        metas
            .into_iter()
            .fold(self.root, |root, meta| root.subcommand(meta.command))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sorted names of all registered commands.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Builder for `CommandMeta`.
pub struct CommandBuilder {
    category: Option<CommandCategory>,
    hidden: bool,
    command: Command,
}

impl CommandBuilder {
    /// Takes name and description from the clap command.
    pub fn from_clap(cmd: Command) -> Self {
        Self {
            category: None,
            hidden: false,
            command: cmd,
        }
    }

    pub fn category(mut self, cat: CommandCategory) -> Self {
        self.category = Some(cat);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Category defaults to `Core`.
    pub fn build(self) -> CommandMeta {
        let command = if self.hidden {
            self.command.hide(true)
        } else {
            self.command
        };
        CommandMeta {
            name: command.get_name().to_string(),
            category: self.category.unwrap_or(CommandCategory::Core),
            description: command
                .get_about()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            hidden: self.hidden,
            command,
        }
    }
}
