//! Interactive menu.
//!
//! Each screen is a finite list of keyed choices. Empty input or `b` goes back
//! one level, an unknown key redisplays the screen with an error, and end of
//! input leaves the menu cleanly.
use std::io;

use strum::IntoEnumIterator;
use tracing::debug;

use crate::{
    dispatch::{Action, Composite, Dispatch, Invocation, Outcome, ServiceOp},
    prompt::Prompter,
};

const PROMPT: &str = "> ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Screen {
    Main,
    Service(String),
    AllServices,
    Git,
}

#[derive(Debug, Clone)]
enum Entry {
    Open(Screen),
    Run(Action),
}

#[derive(Debug, Clone)]
struct Choice {
    key: String,
    label: String,
    entry: Entry,
}

impl Choice {
    fn new(key: impl Into<String>, label: impl Into<String>, entry: Entry) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            entry,
        }
    }
}

impl Screen {
    fn title(&self) -> String {
        match self {
            Screen::Main => "devctl".to_string(),
            Screen::Service(name) => format!("devctl > {name}"),
            Screen::AllServices => "devctl > all services".to_string(),
            Screen::Git => "devctl > git".to_string(),
        }
    }

    fn choices(&self, dispatcher: &dyn Dispatch) -> Vec<Choice> {
        match self {
            Screen::Main => {
                let services = dispatcher.service_names();
                let mut choices: Vec<Choice> = services
                    .iter()
                    .enumerate()
                    .map(|(index, name)| {
                        Choice::new(
                            (index + 1).to_string(),
                            name.clone(),
                            Entry::Open(Screen::Service(name.clone())),
                        )
                    })
                    .collect();
                let next = choices.len();
                choices.push(Choice::new(
                    (next + 1).to_string(),
                    "All services",
                    Entry::Open(Screen::AllServices),
                ));
                choices.push(Choice::new(
                    (next + 2).to_string(),
                    "Git",
                    Entry::Open(Screen::Git),
                ));
                choices.push(Choice::new(
                    (next + 3).to_string(),
                    Composite::Diagnostics.description(),
                    Entry::Run(Action::Composite(Composite::Diagnostics)),
                ));
                choices.push(Choice::new(
                    "h",
                    Composite::Help.description(),
                    Entry::Run(Action::Composite(Composite::Help)),
                ));
                choices
            }
            Screen::Service(name) => ServiceOp::iter()
                .filter(|op| dispatcher.supports(name, *op))
                .enumerate()
                .map(|(index, op)| {
                    Choice::new(
                        (index + 1).to_string(),
                        op.description(),
                        Entry::Run(Action::service(name, op)),
                    )
                })
                .collect(),
            Screen::AllServices => [
                Composite::SetupAll,
                Composite::StartAll,
                Composite::StopAll,
                Composite::RestartAll,
                Composite::StatusAll,
            ]
            .into_iter()
            .enumerate()
            .map(|(index, composite)| {
                Choice::new(
                    (index + 1).to_string(),
                    composite.description(),
                    Entry::Run(Action::Composite(composite)),
                )
            })
            .collect(),
            Screen::Git => vec![Choice::new(
                "1",
                Composite::Push.description(),
                Entry::Run(Action::Composite(Composite::Push)),
            )],
        }
    }
}

/// Runs the menu until the user exits or input ends.
pub fn run(dispatcher: &dyn Dispatch, prompter: &mut dyn Prompter) -> io::Result<()> {
    let mut stack = vec![Screen::Main];
    let mut notice: Option<String> = None;

    while let Some(screen) = stack.last().cloned() {
        let choices = screen.choices(dispatcher);

        prompter.clear()?;
        prompter.say(&screen.title())?;
        for choice in &choices {
            prompter.say(&format!("  {:>2}) {}", choice.key, choice.label))?;
        }
        if screen == Screen::Main {
            prompter.say("   q) Exit")?;
        } else {
            prompter.say("   b) Back")?;
        }
        if let Some(notice) = notice.take() {
            prompter.say(&notice)?;
        }

        let Some(input) = prompter.ask(PROMPT)? else {
            debug!("End of input; leaving menu");
            return Ok(());
        };
        let input = input.to_ascii_lowercase();

        if input.is_empty() || input == "b" {
            if stack.len() > 1 {
                stack.pop();
            }
            continue;
        }
        if screen == Screen::Main && (input == "q" || input == "0") {
            return Ok(());
        }

        match choices.into_iter().find(|choice| choice.key == input) {
            Some(Choice {
                entry: Entry::Open(next),
                ..
            }) => stack.push(next),
            Some(Choice {
                entry: Entry::Run(action),
                ..
            }) => {
                let outcome = dispatcher.dispatch(&action, &Invocation::default(), prompter);
                show_outcome(&outcome, prompter)?;
                if prompter.is_interactive()
                    && prompter.ask("Press Enter to continue")?.is_none()
                {
                    return Ok(());
                }
            }
            None => notice = Some(format!("Invalid choice '{input}'")),
        }
    }

    Ok(())
}

fn show_outcome(outcome: &Outcome, prompter: &mut dyn Prompter) -> io::Result<()> {
    match outcome {
        Outcome::Success(message) => prompter.say(message),
        Outcome::Warning(message) => prompter.say(&format!("Warning: {message}")),
        Outcome::Failure { message, .. } => prompter.say(&format!("Error: {message}")),
    }
}
