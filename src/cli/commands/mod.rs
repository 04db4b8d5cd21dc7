use crate::client::DEFAULT_BASE_URL;
use crate::exporter::GIT_COMMIT_HASH;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

mod collectors;

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let cmd = Command::new("bitbucket_exporter")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(GIT_COMMIT_HASH)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("9171")
                .env("BITBUCKET_EXPORTER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .help("IP address to bind to, default tries [::] then 0.0.0.0")
                .env("BITBUCKET_EXPORTER_LISTEN")
                .value_name("IP"),
        )
        .arg(
            Arg::new("config.file")
                .long("config.file")
                .help("Path to the YAML configuration file")
                .default_value("config.yaml")
                .env("BITBUCKET_EXPORTER_CONFIG_FILE")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("web.telemetry-path")
                .long("web.telemetry-path")
                .help("Path under which to expose metrics")
                .default_value("/metrics")
                .env("BITBUCKET_EXPORTER_WEB_TELEMETRY_PATH")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("api.url")
                .long("api.url")
                .help("Base URL of the Bitbucket Cloud API")
                .default_value(DEFAULT_BASE_URL)
                .env("BITBUCKET_EXPORTER_API_URL")
                .value_name("URL"),
        )
        .arg(
            Arg::new("collect.interval")
                .long("collect.interval")
                .help("Seconds between collection cycles, 0 runs a single cycle")
                .default_value("300")
                .env("BITBUCKET_EXPORTER_COLLECT_INTERVAL")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("metric.prom-file")
                .long("metric.prom-file")
                .help("Serve this exposition file verbatim instead of collecting")
                .env("BITBUCKET_EXPORTER_PROM_FILE")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        );

    collectors::add_collectors_args(cmd)
}
