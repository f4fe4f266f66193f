use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use futures::StreamExt;
use recon::config::{ScanOptions, DEFAULT_EXTERNAL_RESOLVER, DEFAULT_THREADS};
use recon::domain::validate_target;
use recon::model::{ensure_dir, export_to_json, Method, SourceId, SubdomainRecord};
use recon::orchestrator::Orchestrator;
use recon::sources;
use recon::store::JobStore;
use recon::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Command::new(clap::crate_name!())
        .version(clap::crate_version!())
        .subcommand(Command::new("sources").about("List all passive sources"))
        .subcommand(
            Command::new("scan")
                .about("Enumerate the subdomains of a target")
                .arg(
                    Arg::new("target")
                        .help("The domain name to enumerate")
                        .value_name("TARGET")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("methods")
                        .short('m')
                        .long("methods")
                        .help("Comma separated enumeration methods (all by default)")
                        .value_name("METHODS")
                        .value_delimiter(','),
                )
                .arg(
                    Arg::new("sources")
                        .long("sources")
                        .help("Comma separated passive sources (all by default)")
                        .value_name("SOURCES")
                        .value_delimiter(','),
                )
                .arg(
                    Arg::new("wordlist")
                        .short('w')
                        .long("wordlist")
                        .help("Wordlist for DNS brute-forcing")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("Concurrent DNS resolutions")
                        .value_name("THREADS")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("fingerprint")
                        .short('f')
                        .long("fingerprint")
                        .action(ArgAction::SetTrue)
                        .help("Probe live subdomains over HTTP"),
                )
                .arg(
                    Arg::new("takeover")
                        .long("takeover")
                        .action(ArgAction::SetTrue)
                        .help("Flag CNAMEs pointing to claimable services"),
                )
                .arg(
                    Arg::new("resolver-bin")
                        .long("resolver-bin")
                        .help("External mass DNS resolver, used when installed")
                        .value_name("BIN")
                        .default_value(DEFAULT_EXTERNAL_RESOLVER),
                )
                .arg(
                    Arg::new("logs")
                        .short('s')
                        .long("logs")
                        .action(ArgAction::SetTrue)
                        .help("Save logs into a .log file"),
                ),
        )
        .arg_required_else_help(true)
        .get_matches();

    match cli.subcommand() {
        Some(("sources", _)) => sources::display_all(),
        Some(("scan", args)) => scan(args).await?,

        // fallback if a cmd is not handled (should not possible)
        _ => {
            error!("{:12} - Command not handled, exit program", "CLI ERROR");
            return Err(Error::CliUsage("Command not handled".into()));
        }
    }

    Ok(())
}

async fn scan(args: &ArgMatches) -> Result<()> {
    let target = args
        .get_one::<String>("target")
        .ok_or_else(|| Error::CliUsage("missing target".into()))?;
    let target = validate_target(target)?;

    // create filename
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let filename = format!("{}", timestamp);

    // create output dir
    let output_dir = format!("output/recon/{}", target);
    ensure_dir(output_dir.as_ref())?;

    init_tracing_subscriber(args.get_flag("logs"), output_dir.as_ref(), &filename);

    let methods: Vec<Method> = match args.get_many::<String>("methods") {
        Some(values) => values
            .map(|value| value.parse())
            .collect::<Result<_>>()?,
        None => Method::all().to_vec(),
    };
    let sources: Vec<SourceId> = match args.get_many::<String>("sources") {
        Some(values) => values
            .map(|value| value.parse())
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };
    let options = ScanOptions {
        threads: *args.get_one::<usize>("threads").unwrap_or(&DEFAULT_THREADS),
        sources,
        enable_fingerprint: args.get_flag("fingerprint"),
        enable_takeover: args.get_flag("takeover"),
        wordlist: args.get_one::<PathBuf>("wordlist").cloned(),
        ..Default::default()
    };

    let resolver_bin = args
        .get_one::<String>("resolver-bin")
        .map(String::as_str)
        .unwrap_or(DEFAULT_EXTERNAL_RESOLVER);
    let orchestrator = Orchestrator::new(JobStore::new())
        .detect_external_resolver(Path::new(resolver_bin))
        .await;

    // run the enumeration
    info!("Enumerating {} (run_{})", target, timestamp);
    let id = orchestrator.submit_job(&target, methods, options).await?;
    let mut progress = Box::pin(orchestrator.stream_progress(id).await?);
    loop {
        tokio::select! {
            event = progress.next() => match event {
                Some(event) => println!(
                    "[{:>5.1}%] {:?} {:24} {} found",
                    event.progress_percentage,
                    event.status,
                    event.current_method.unwrap_or_default(),
                    event.subdomains_found
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling {}", id);
                orchestrator.cancel_job(id).await?;
            }
        }
    }

    let job = orchestrator.get_job(id).await?;
    display_results(&orchestrator.get_results(id).await?);
    for producer in &job.producers {
        println!("- {:14}{:?}", producer.name, producer.outcome);
    }

    // write result
    let json_path = Path::new(&output_dir)
        .join(&filename)
        .with_extension("json");
    export_to_json(&job, &json_path)?;
    println!("\nJob {} {:?}, saved in {}", id, job.status, json_path.display());

    Ok(())
}

fn display_results(records: &[SubdomainRecord]) {
    println!("\n{} subdomains", records.len());
    for record in records {
        let ips: Vec<String> = record.ip_addresses.iter().map(|ip| ip.to_string()).collect();
        let takeover = match &record.takeover_service {
            Some(service) if record.takeover_vulnerable => match record.takeover_confidence {
                Some(confidence) => format!("TAKEOVER ({}, {:?})", service, confidence),
                None => format!("TAKEOVER ({})", service),
            },
            _ => String::new(),
        };
        println!(
            "{:40} {:32} {:>5} {}",
            record.hostname,
            ips.join(","),
            record
                .http_status
                .map(|status| status.to_string())
                .unwrap_or_default(),
            takeover
        );
    }
}

fn init_tracing_subscriber(save_logs_file: bool, output_dir: &Path, filename: &str) {
    // base for the subscriber
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(FmtSpan::CLOSE);

    if save_logs_file {
        let filename = format!("{}.log", filename);
        let file_appender = RollingFileAppender::new(Rotation::NEVER, output_dir, filename);
        let suscriber = subscriber
            .with_ansi(false)
            .with_file(false)
            .with_target(false)
            .with_writer(file_appender)
            .finish();

        // add log in terminal as an additional layer
        let stdout_layer = layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true)
            .with_file(false)
            .with_target(false);

        // init the subscriber
        tracing::subscriber::set_global_default(suscriber.with(stdout_layer))
            .expect("Unable to set global subscriber with 2 layer");
    } else {
        let suscriber = subscriber
            .with_ansi(true)
            .with_file(false)
            .with_target(false)
            .finish();

        // init the subscriber
        tracing::subscriber::set_global_default(suscriber)
            .expect("Unable to set global subscriber");
    }
}
