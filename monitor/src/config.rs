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

use crate::args::Args;
use faf_dns_trace::{FilterConfig, OutputStyle};

/// Applies the command line on top of the backend's default filter
pub fn filter_config(args: &Args, defaults: &FilterConfig) -> FilterConfig {
   let mut builder = FilterConfig::builder();

   if !args.allow_all_events {
      if args.allow_events.is_empty() {
         builder = builder.allow_events(defaults.event_id_allow_list().iter().copied());
      } else {
         builder = builder.allow_events(args.allow_events.iter().copied());
      }
   }

   if !args.no_default_deny {
      builder = builder.deny_domains(defaults.domain_deny_list());
   }

   builder.deny_domains(&args.deny_domains).build()
}

pub fn output_style(args: &Args, default_style: OutputStyle) -> OutputStyle {
   if args.verbose_output {
      OutputStyle::Verbose
   } else if args.compact_output {
      OutputStyle::Compact
   } else {
      default_style
   }
}
