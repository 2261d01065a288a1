//! Commands and command tables.
//!
//! Handlers are written against typed arguments and results; the JSON
//! conversion happens once, here, when the command is built.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PortSession;
use crate::errors::{CommandError, PortError};

/// Definition of a command parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ParamDef {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Introspection record for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamDef>,
}

/// What a handler knows about the call it serves.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub port: &'a str,
    pub command: &'a str,
    pub session: &'a PortSession,
}

type Handler = dyn Fn(&CommandContext<'_>, Value) -> Result<Value, CommandError> + Send + Sync;

pub struct Command {
    def: CommandDef,
    handler: Box<Handler>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("def", &self.def).finish()
    }
}

impl Command {
    /// Build a command from a typed handler.
    ///
    /// Arguments that fail to deserialize into `A` become
    /// [`CommandError::InvalidArguments`] before the handler runs.
    pub fn new<A, R, F>(name: &str, description: &str, handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(&CommandContext<'_>, A) -> Result<R, CommandError> + Send + Sync + 'static,
    {
        let command = name.to_owned();
        let erased = move |ctx: &CommandContext<'_>, args: Value| {
            let typed: A =
                serde_json::from_value(args).map_err(|e| CommandError::InvalidArguments {
                    command: command.clone(),
                    detail: e.to_string(),
                })?;
            let result = handler(ctx, typed)?;
            serde_json::to_value(result)
                .map_err(|e| CommandError::failed(format!("result serialization failed: {e}")))
        };
        Self {
            def: CommandDef {
                name: name.into(),
                description: description.into(),
                params: Vec::new(),
            },
            handler: Box::new(erased),
        }
    }

    pub fn param(mut self, param: ParamDef) -> Self {
        self.def.params.push(param);
        self
    }

    pub fn def(&self) -> &CommandDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub(crate) fn invoke(
        &self,
        ctx: &CommandContext<'_>,
        args: Value,
    ) -> Result<Value, CommandError> {
        (self.handler)(ctx, args)
    }
}

/// Serialized form of a port's command set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    pub port: String,
    pub description: String,
    pub commands: Vec<CommandDef>,
}

/// Immutable command set of one port, shared by every handle to it.
#[derive(Debug)]
pub struct CommandTable {
    name: String,
    description: String,
    commands: BTreeMap<String, Command>,
}

impl CommandTable {
    pub fn builder(name: &str) -> CommandTableBuilder {
        CommandTableBuilder {
            name: name.to_owned(),
            description: String::new(),
            commands: BTreeMap::new(),
            duplicate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, command: &str) -> Option<&Command> {
        self.commands.get(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn describe(&self) -> PortDescription {
        PortDescription {
            port: self.name.clone(),
            description: self.description.clone(),
            commands: self.commands.values().map(|c| c.def.clone()).collect(),
        }
    }
}

pub struct CommandTableBuilder {
    name: String,
    description: String,
    commands: BTreeMap<String, Command>,
    duplicate: Option<String>,
}

impl CommandTableBuilder {
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    pub fn command(mut self, command: Command) -> Self {
        let name = command.name().to_owned();
        if self.commands.contains_key(&name) {
            self.duplicate.get_or_insert(name);
        } else {
            self.commands.insert(name, command);
        }
        self
    }

    /// Fails if any command name was added twice.
    pub fn build(self) -> Result<CommandTable, PortError> {
        if let Some(command) = self.duplicate {
            return Err(PortError::DuplicateCommand {
                port: self.name,
                command,
            });
        }
        Ok(CommandTable {
            name: self.name,
            description: self.description,
            commands: self.commands,
        })
    }
}
