use runner::{Intent, RejectionStage, Reply};

use crate::session::{SessionError, SessionErrorKind};

pub const WELCOME_TEXT: &str = "Welcome!\nPlease read /policy before using this bot.";

pub const HELP_TEXT: &str = "Send Python code after /run, for example:\n\
/run print(2 ** 10)\n\
Scripts may call input(); the bot asks for each value in turn.\n\
Use /cancel to abandon a script that is waiting for input.";

pub const ABOUT_TEXT: &str =
    "pyrelay runs short Python scripts and sends back what they print.";

pub const POLICY_TEXT: &str = "=======================\n\
 BOT USAGE POLICY\n\
=======================\n\
- Basic Python features are available: print, len, input, and so on.\n\
- Libraries allowed: math, random, hashlib, base64.\n\
- Dangerous operations like os, subprocess and eval are blocked.\n\
- Scripts are stopped after a few seconds and long output is cut.\n\
- Do not spam or misuse the bot.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    About,
    Policy,
    /// Anything that goes through the session pipeline.
    Converse(Intent),
}

/// Classifies trimmed message text. Empty text yields `None`.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let command = match text {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/about" => Command::About,
        "/policy" => Command::Policy,
        "/cancel" => Command::Converse(Intent::Cancel),
        _ => match run_script(text) {
            Some(script) => Command::Converse(Intent::Submit(script.to_owned())),
            None => Command::Converse(Intent::Reply(text.to_owned())),
        },
    };
    Some(command)
}

fn run_script(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("/run")?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

pub fn render_reply(reply: &Reply) -> String {
    match reply {
        Reply::Prompt(prompt) => prompt.clone(),
        Reply::Output(result) => format!("Output:\n{}", result.render()),
        Reply::Rejected(RejectionStage::Submission) => {
            "Code contains forbidden functions/libraries.".to_owned()
        }
        Reply::Rejected(RejectionStage::Final) => {
            "Final code contains unsafe functions.".to_owned()
        }
        Reply::MissingScript => "Please provide code after /run.".to_owned(),
        Reply::Cancelled => "Session cancelled.".to_owned(),
        Reply::NoActiveSession => "No active session to cancel.".to_owned(),
        Reply::NoPendingPrompt => "Unknown command! Send code with /run.".to_owned(),
    }
}

pub fn render_session_error(err: &SessionError) -> String {
    match err.kind {
        SessionErrorKind::Overloaded => "The bot is busy right now, please retry shortly.",
        SessionErrorKind::Internal => "Something went wrong, please try again.",
    }
    .to_owned()
}
