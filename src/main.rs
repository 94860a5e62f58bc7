use anyhow::Context;
use log::{error, info};
use std::io;
use structopt::StructOpt;

mod cli;
mod flow;
mod logger;
mod monitor;
mod report;
mod settings;
mod signal;
mod source;
mod tracker;

use crate::flow::Decoder;
use crate::monitor::LossMonitor;
use crate::report::Report;
use crate::settings::{CaptureSource, Settings};
use crate::signal::ShutdownFlag;
use crate::source::capture::CaptureReader;
use crate::source::listener::UdpListener;
use crate::source::{Filter, PacketSource, SourceError};
use crate::tracker::LossTracker;

fn main() {
    if let Err(e) = run(cli::Opt::from_args()) {
        error!("{:#}", e);
        eprintln!("flowloss: {:#}", e);
        std::process::exit(1);
    }
}

fn run(opt: cli::Opt) -> anyhow::Result<()> {
    let mut settings = Settings::init(opt.config.as_deref()).context("failed to load configuration")?;
    settings.apply(&opt);

    logger::init(&settings.log.level);

    let capture_source = settings.validate()?;
    info!("Starting flowloss, {}s snapshot window", settings.report.window);

    let shutdown = ShutdownFlag::new();
    let filter = Filter { port: settings.capture.port, host: settings.capture.host };
    let mut source: Box<dyn PacketSource> = match capture_source {
        CaptureSource::Interface(name) => open_interface(&name, filter, shutdown)?,
        CaptureSource::Listen(addr) => Box::new(UdpListener::bind(addr, settings.capture.host, shutdown)?),
        CaptureSource::File(path) => Box::new(CaptureReader::open(&path, filter, shutdown)?),
    };

    let tracker = LossTracker::new(settings.report.window).with_idle_eviction(settings.report.idle_windows);
    let mut monitor = LossMonitor::new(Decoder::new(settings.capture.ipfix_as_v9), tracker);

    loop {
        match source.next_packet() {
            Ok(Some(packet)) => {
                if let Some(report) = monitor.process(&packet) {
                    emit(&report, settings.report.color)?;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Error while reading packets: {}", e);
                break;
            }
        }
    }

    if let Some(report) = monitor.finish() {
        emit(&report, settings.report.color)?;
    }

    info!("Closing flowloss, {} packets accounted, {} skipped", monitor.decoded(), monitor.skipped());
    Ok(())
}

#[cfg(feature = "live-capture")]
fn open_interface(name: &str, filter: Filter, shutdown: ShutdownFlag) -> Result<Box<dyn PacketSource>, SourceError> {
    Ok(Box::new(source::interface::InterfaceCapture::open(name, filter, shutdown)?))
}

#[cfg(not(feature = "live-capture"))]
fn open_interface(name: &str, _filter: Filter, _shutdown: ShutdownFlag) -> Result<Box<dyn PacketSource>, SourceError> {
    Err(SourceError::Interface { name: name.to_string(), reason: "built without the live-capture feature".to_string() })
}

fn emit(report: &Report, color: bool) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    report.write_to(&mut out, color).context("failed to write report")
}
