use std::net::IpAddr;
use std::path::PathBuf;
use structopt::StructOpt;

/// Estimate flow export loss per exporter from NetFlow v5/v9 and IPFIX sequence numbers.
#[derive(Debug, StructOpt)]
#[structopt(name = "flowloss")]
pub struct Opt {
    /// Sniff export packets on this network interface
    #[structopt(short = "i", long, conflicts_with_all = &["listen", "file"])]
    pub interface: Option<String>,

    /// Receive export packets on this local address instead of sniffing
    #[structopt(short = "l", long, conflicts_with = "file")]
    pub listen: Option<IpAddr>,

    /// Replay a pcap capture instead of listening
    #[structopt(short = "f", long, parse(from_os_str))]
    pub file: Option<PathBuf>,

    /// UDP port of the export traffic [default: 2055]
    #[structopt(short = "p", long)]
    pub port: Option<u16>,

    /// Only account export packets from (or, in captures, to) this host
    #[structopt(long)]
    pub host: Option<IpAddr>,

    /// Snapshot window in seconds [default: 60]
    #[structopt(short = "t", long)]
    pub window: Option<u64>,

    /// Count IPFIX loss in messages rather than flow records
    #[structopt(long)]
    pub ipfix_as_v9: bool,

    /// Do not highlight lossy exporters
    #[structopt(long)]
    pub no_color: bool,

    /// Forget exporters silent for this many windows
    #[structopt(long)]
    pub idle_windows: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[structopt(long)]
    pub log_level: Option<String>,

    /// Configuration file, overridden by command line flags
    #[structopt(short = "c", long, parse(from_os_str))]
    pub config: Option<PathBuf>,
}
