use std::{error::Error, path::Path, process, time::Duration};
use tracing::{info, warn};

use svcwatch::{
    cancel::CancellationToken,
    cli::{Commands, MailArgs, parse_args},
    config::load_config,
    logs::init_logging,
    monitor::Monitor,
    notify::{Credentials, LogNotifier, NotificationDispatcher, SmtpNotifier},
    probe::SystemctlProbe,
    status::{ServiceOutcome, TickReport},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(args.log_level, args.log_file.as_deref())?;
    let probe = SystemctlProbe::new()
        .user(args.user)
        .restart_timeout(Duration::from_secs(args.restart_timeout));

    match args.command {
        Commands::Run { config, mail } => {
            let dispatcher = build_dispatcher(&mail)?;
            let mut handle = Monitor::new(&config, probe, dispatcher).spawn();

            let token = handle.cancellation_token();
            ctrlc::set_handler(move || {
                info!("svcwatch is shutting down...");
                token.cancel();
            })?;

            handle.join();
            if let Some(outcome) = handle.last_outcome() {
                info!("Last outcome: {}", outcome.message());
            }
        }
        Commands::Check { config, mail, json } => {
            let dispatcher = build_dispatcher(&mail)?;
            let monitor = Monitor::new(&config, probe, dispatcher);
            let report = monitor.tick(&CancellationToken::new());

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Validate { config } => validate(&config),
    }

    Ok(())
}

fn build_dispatcher(mail: &MailArgs) -> Result<NotificationDispatcher, Box<dyn Error>> {
    match mail.credentials()? {
        Some(credentials) => Ok(NotificationDispatcher::new(
            SmtpNotifier::new(mail.relay()),
            credentials,
        )),
        None => {
            warn!("No mail credentials supplied; alerts will only be logged");
            Ok(NotificationDispatcher::new(
                LogNotifier,
                Credentials::default(),
            ))
        }
    }
}

fn validate(path: &Path) {
    match load_config(path) {
        Ok(config) => {
            println!(
                "{}: {} service(s), checked every {}s",
                path.display(),
                config.services.len(),
                config.interval.as_secs()
            );
        }
        Err(err) => {
            eprintln!("Invalid configuration {}: {err}", path.display());
            process::exit(1);
        }
    }
}

fn print_report(report: &TickReport) {
    if let Some(err) = &report.config_error {
        println!("Configuration unavailable: {err}");
    }

    for service in &report.services {
        let detail = match &service.outcome {
            ServiceOutcome::Running => "running".to_string(),
            ServiceOutcome::Recovered => "restarted".to_string(),
            ServiceOutcome::DependencyFailed { dependency } => {
                format!("skipped, dependency {dependency} is not running")
            }
            ServiceOutcome::RestartFailed { reason } => format!("restart failed: {reason}"),
        };
        println!("{:<32} {detail}", service.service);
    }

    println!("{}", report.outcome().message());
}
