/*
FaF DNS Monitor records outbound DNS queries and the processes behind them
Copyright (C) 2022  James Bates

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

mod args;
mod config;
mod statics;

use anyhow::Context;
use faf_dns_trace::process::default_resolver;
use faf_dns_trace::{DisplayZone, DnsMonitor, Emitter, EventSource, FilterConfig, OutputStyle};

pub fn main() {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   if !statics::ARGS.quiet {
      print_banner();
      print_version();
   }

   if let Err(err) = run() {
      log::error!("{:#}", err);
      std::process::exit(1);
   }
}

fn run() -> anyhow::Result<()> {
   let args = &*statics::ARGS;

   let (source, defaults, default_style) = platform_backend(args);
   let filter = config::filter_config(args, &defaults);
   let style = config::output_style(args, default_style);
   let zone = DisplayZone::from_name(&args.timezone);

   log::info!(
      "monitoring with the {} backend, allowed event ids: {:?}, denied domains: {:?}",
      source.name(),
      filter.event_id_allow_list(),
      filter.domain_deny_list()
   );

   let monitor = DnsMonitor::new(source);
   let stop = monitor.stop_signal();
   ctrlc::set_handler(move || {
      log::info!("interrupted, stopping capture");
      stop.stop();
   })
   .context("failed to install the Ctrl-C handler")?;

   let emitter = Emitter::new(std::io::stdout(), style, zone);
   monitor.run(&filter, default_resolver(), emitter).context("DNS monitoring stopped")?;

   Ok(())
}

#[cfg(target_os = "linux")]
fn platform_backend(args: &args::Args) -> (Box<dyn EventSource>, FilterConfig, OutputStyle) {
   use faf_dns_trace::source::KprobeSource;

   let source = match &args.bpf_object {
      Some(path) => KprobeSource::with_object_path(path.clone()),
      None => KprobeSource::new(),
   };
   (Box::new(source), FilterConfig::kernel_probe_defaults(), OutputStyle::Compact)
}

#[cfg(windows)]
fn platform_backend(args: &args::Args) -> (Box<dyn EventSource>, FilterConfig, OutputStyle) {
   use faf_dns_trace::source::EtwSource;

   if args.bpf_object.is_some() {
      log::warn!("--bpf-object only applies on Linux, ignoring it");
   }
   (Box::new(EtwSource::new()), FilterConfig::structured_trace_defaults(), OutputStyle::Verbose)
}

fn print_banner() {
   println!();
   println!(
      r"
    ███████╗ █████╗ ███████╗    ██████╗ ███╗   ██╗███████╗
    ██╔════╝██╔══██╗██╔════╝    ██╔══██╗████╗  ██║██╔════╝
    █████╗  ███████║█████╗      ██║  ██║██╔██╗ ██║███████╗
    ██╔══╝  ██╔══██║██╔══╝      ██║  ██║██║╚██╗██║╚════██║
    ██║     ██║  ██║██║         ██████╔╝██║ ╚████║███████║
    ╚═╝     ╚═╝  ╚═╝╚═╝         ╚═════╝ ╚═╝  ╚═══╝╚══════╝
    "
   );
   println!("\n");
}

fn print_version() {
   println!("{} v{} | kernel-level DNS query monitor\n", statics::PROJECT_NAME, statics::VERSION);
}
