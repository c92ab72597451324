// Copyright (C) 2024 Jelmer Vernooij <jelmer@samba.org>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line interface for sundown.
//!
//! Subcommands:
//!
//! - `migrate`: rewrite calls to `@replace_me` constructs with their
//!   replacement templates.
//! - `cleanup`: delete deprecated definitions whose window has closed
//!   (for library maintainers).
//! - `check`: verify that every marker can be processed.
//! - `info`: list markers and their replacements.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

use sundown::cleanup::CleanupPolicy;
use sundown::driver::{self, CancelFlag, CleanupOptions, MigrateOptions};
use sundown::typeinfo::{TypeMethod, DEFAULT_QUERY_TIMEOUT};
use sundown::version::Version;

#[derive(Parser)]
#[command(name = "sundown")]
#[command(about = "Replace deprecated Python API usage")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite deprecated call sites with their replacement expressions
    Migrate {
        /// Python files or directories to migrate
        #[arg(required = true)]
        paths: Vec<String>,

        /// Write changes back to files (default: print a diff to stdout)
        #[arg(short, long, group = "mode")]
        write: bool,

        /// Report which files would change; exit 1 if any
        #[arg(long, group = "mode")]
        check: bool,

        /// Confirm each replacement before applying it
        #[arg(long, group = "mode")]
        interactive: bool,

        /// Type resolver backend for method receivers
        #[arg(long, value_enum, default_value = "pyright")]
        type_method: TypeMethodArg,

        /// Per-query type resolver deadline in seconds
        #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT.as_secs())]
        timeout: u64,

        /// Worker pool size (default: CPU count)
        #[arg(long)]
        jobs: Option<usize>,
    },

    /// Remove deprecated definitions whose deprecation window has closed
    Cleanup {
        /// Python files or directories to process
        #[arg(required = true)]
        paths: Vec<String>,

        /// Write changes back to files (default: print a diff to stdout)
        #[arg(short, long, group = "mode")]
        write: bool,

        /// Report which files would change; exit 1 if any
        #[arg(long, group = "mode")]
        check: bool,

        /// Remove every deprecated construct
        #[arg(long)]
        all: bool,

        /// Remove constructs deprecated before this version
        #[arg(long, value_name = "VERSION")]
        before: Option<String>,

        /// Remove constructs whose remove_in is at or before this version
        #[arg(long, value_name = "VERSION")]
        current_version: Option<String>,

        /// Worker pool size (default: CPU count)
        #[arg(long)]
        jobs: Option<usize>,
    },

    /// Verify that every @replace_me construct can be processed
    Check {
        /// Python files or directories to check
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List @replace_me constructs and their replacements
    Info {
        /// Python files or directories to inspect
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum TypeMethodArg {
    Pyright,
    Mypy,
    None,
}

impl From<TypeMethodArg> for TypeMethod {
    fn from(arg: TypeMethodArg) -> Self {
        match arg {
            TypeMethodArg::Pyright => TypeMethod::Pyright,
            TypeMethodArg::Mypy => TypeMethod::Mypy,
            TypeMethodArg::None => TypeMethod::Disabled,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if cli.debug => tracing_subscriber::EnvFilter::new("debug"),
        Err(_) => tracing_subscriber::EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match cli.command {
        Commands::Migrate {
            paths,
            write,
            check,
            interactive,
            type_method,
            timeout,
            jobs,
        } => {
            let options = MigrateOptions {
                write,
                check,
                interactive,
                type_method: type_method.into(),
                timeout: Duration::from_secs(timeout),
                jobs,
                cancel: CancelFlag::new(),
            };
            driver::run_migrate(&paths, &options)?
        }

        Commands::Cleanup {
            paths,
            write,
            check,
            all,
            before,
            current_version,
            jobs,
        } => {
            let policy = CleanupPolicy {
                all,
                before: before.as_deref().map(Version::parse),
                current_version: current_version.as_deref().map(Version::parse),
            };
            if policy.is_empty() {
                eprintln!(
                    "cleanup: pass --all, --before or --current-version to select constructs"
                );
                std::process::exit(2);
            }
            let options = CleanupOptions {
                write,
                check,
                policy,
                jobs,
                cancel: CancelFlag::new(),
            };
            driver::run_cleanup(&paths, &options)?
        }

        Commands::Check { paths } => driver::run_check(&paths)?,

        Commands::Info { paths } => driver::run_info(&paths)?,
    };

    std::process::exit(code);
}
