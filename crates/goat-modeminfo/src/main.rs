//! modeminfo: query a modem and print what it says about itself.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use goat_modeminfo::{
    query, send_sms, watch, write_notification, Args, ModemInfoResult, Report, INFO_COMMANDS,
};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
    goat_metrics::describe_metrics();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> ModemInfoResult<()> {
    let config = args.engine_config()?;
    let engine = args.open_engine(config)?;
    let timeout = args.timeout();

    engine.init(Instant::now() + timeout)?;

    let mut report = Report {
        device: args.target().to_string(),
        echo: engine.state().echo_enabled,
        ..Default::default()
    };
    let stdout = io::stdout();

    report.commands = query(&engine, INFO_COMMANDS, timeout);
    if !args.json {
        let mut out = stdout.lock();
        for command in &report.commands {
            command.write_text(&mut out)?;
        }
    }

    if let (Some(to), Some(body)) = (&args.sms_to, &args.sms_body) {
        let sms = send_sms(&engine, to, body, timeout);
        if !args.json {
            sms.write_text(&mut stdout.lock())?;
        }
        report.sms = Some(sms);
    }

    if let Some(secs) = args.watch_secs {
        let stop = Arc::new(AtomicBool::new(false));
        {
            let stop = stop.clone();
            ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))?;
        }
        let json = args.json;
        report.notifications = watch(&engine, Duration::from_secs(secs), &stop, |n| {
            if !json {
                let mut out = stdout.lock();
                if let Err(e) = write_notification(&mut out, n).and_then(|_| out.flush()) {
                    error!("failed to print notification: {}", e);
                }
            }
        });
    }

    if args.json {
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
    }
    Ok(())
}
