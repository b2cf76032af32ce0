use std::{
    io::{self, IsTerminal},
    process::ExitCode,
};

use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use devctl::{
    cli::{Cli, Request, parse_args},
    config::Settings,
    dispatch::{Action, Dispatch, Dispatcher, Outcome},
    error::{GENERIC_FAILURE_CODE, USAGE_ERROR_CODE},
    interrupt, menu,
    prompt::LinePrompter,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    if let Err(err) = interrupt::install_handler() {
        error!("Failed to install interrupt handler: {err}");
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {err}");
            return exit_code(err.exit_code());
        }
    };
    debug!("Project root {}", settings.root.display());

    let request = match args.command {
        Some(command) => match command.into_request(&settings.service_names()) {
            Ok(request) => request,
            Err(err) => {
                eprintln!("Error: {err}");
                return exit_code(err.exit_code());
            }
        },
        None if io::stdin().is_terminal() => Request::Menu,
        None => {
            eprintln!("No command given and stdin is not a terminal; see `devctl --help`");
            return exit_code(USAGE_ERROR_CODE);
        }
    };

    let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
    let dispatcher = Dispatcher::system(settings);
    let mut prompter = LinePrompter::new(io::stdin().lock(), io::stdout(), interactive);

    match request {
        Request::Menu => match menu::run(&dispatcher, &mut prompter) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Error: {err}");
                exit_code(GENERIC_FAILURE_CODE)
            }
        },
        Request::List => {
            for (name, description) in Action::catalog(&dispatcher.settings().service_names()) {
                println!("{name:<22} {description}");
            }
            ExitCode::SUCCESS
        }
        Request::Action(action, invocation) => {
            let outcome = dispatcher.dispatch(&action, &invocation, &mut prompter);
            print_outcome(&outcome);
            exit_code(outcome.exit_code())
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Success(message) if message.is_empty() => {}
        Outcome::Success(message) => println!("{message}"),
        Outcome::Warning(message) => eprintln!("Warning: {message}"),
        Outcome::Failure { message, .. } => eprintln!("Error: {message}"),
    }
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::from(GENERIC_FAILURE_CODE as u8),
    }
}
