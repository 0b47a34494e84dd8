use conductor_backend_client::ChatTarget;
use strum::IntoEnumIterator;
use strum_macros::AsRefStr;
use strum_macros::EnumIter;
use strum_macros::EnumString;
use strum_macros::IntoStaticStr;

use crate::app_event::UserAction;

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    // Enum order is presentation order in the help line.
    Run,
    Cancel,
    Refresh,
    Ack,
    Agent,
    Main,
    Clear,
    Login,
    #[strum(to_string = "quit", serialize = "exit")]
    Quit,
}

impl SlashCommand {
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Run => "start a workflow run: /run <workflow>",
            SlashCommand::Cancel => "cancel the most recently started run",
            SlashCommand::Refresh => "re-fetch the run list",
            SlashCommand::Ack => "mark finished runs as seen",
            SlashCommand::Agent => "chat with a named agent: /agent <name>",
            SlashCommand::Main => "chat with the main orchestrator",
            SlashCommand::Clear => "clear this conversation (press twice)",
            SlashCommand::Login => "reload credentials",
            SlashCommand::Quit => "exit (press twice)",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

pub fn built_in_slash_commands() -> Vec<(&'static str, SlashCommand)> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Turn a submitted composer line into an action. Anything that does not
/// start with `/` is a chat prompt.
pub(crate) fn parse_submission(message: &str) -> Option<UserAction> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Some(command_portion) = trimmed.strip_prefix('/') else {
        return Some(UserAction::SubmitPrompt(trimmed.to_string()));
    };

    let (name, args) = match command_portion.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (command_portion, ""),
    };
    let Ok(command) = name.to_ascii_lowercase().parse::<SlashCommand>() else {
        return Some(UserAction::Unrecognized(trimmed.to_string()));
    };

    let action = match command {
        SlashCommand::Run => UserAction::TriggerWorkflow(args.to_string()),
        SlashCommand::Cancel => UserAction::CancelMostRecentRun,
        SlashCommand::Refresh => UserAction::RefreshRuns,
        SlashCommand::Ack => UserAction::AcknowledgeRuns,
        SlashCommand::Agent => {
            let name = args.trim_start_matches('@');
            if name.is_empty() {
                return Some(UserAction::Unrecognized(trimmed.to_string()));
            }
            UserAction::SelectTarget(ChatTarget::agent(name))
        }
        SlashCommand::Main => UserAction::SelectTarget(ChatTarget::Main),
        SlashCommand::Clear => UserAction::ClearConversation,
        SlashCommand::Login => UserAction::Reauthenticate,
        SlashCommand::Quit => UserAction::Quit,
    };
    Some(action)
}
