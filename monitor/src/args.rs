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

use clap::Parser;

/// FaF DNS Monitor - which process asked for which name
#[derive(Parser, Debug, Default)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
   /// only report events with this id. Repeatable. Replaces the backend's default allow-list.
   #[clap(long = "allow-event", value_name = "ID")]
   pub allow_events: Vec<u16>,

   /// report events regardless of their id.
   #[clap(long, conflicts_with = "allow_events")]
   pub allow_all_events: bool,

   /// drop queries whose name contains this text (case-insensitive). Repeatable.
   #[clap(long = "deny-domain", value_name = "SUBSTR")]
   pub deny_domains: Vec<String>,

   /// do not apply the backend's default deny-list ("localhost").
   #[clap(long)]
   pub no_default_deny: bool,

   /// one multi-line block per query. Default on Windows.
   #[clap(long, conflicts_with = "compact_output")]
   pub verbose_output: bool,

   /// one aligned line per query. Default on Linux.
   #[clap(long)]
   pub compact_output: bool,

   /// IANA timezone used to display timestamps. Unknown names fall back to local time.
   #[clap(long, default_value = faf_dns_trace::emit::DEFAULT_TIMEZONE)]
   pub timezone: String,

   /// [Linux Only] load the eBPF program from this object file instead of the one embedded at build time.
   #[clap(long, value_name = "PATH")]
   pub bpf_object: Option<std::path::PathBuf>,

   /// no banner.
   #[clap(short, long)]
   pub quiet: bool,
}
